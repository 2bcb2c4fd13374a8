use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub clients_tracked: u32,
    pub results_processed: u64,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
    pub worker: bool,
}

/// État de santé du kernel, partagé entre le listener MQTT et l'API
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    results_processed: Arc<AtomicU64>,
    mqtt_status: Arc<parking_lot::Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            results_processed: Arc::new(AtomicU64::new(0)),
            mqtt_status: Arc::new(parking_lot::Mutex::new("connecting".to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn record_result(&self) {
        self.results_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, clients_tracked: usize, worker: bool) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            clients_tracked: clients_tracked as u32,
            results_processed: self.results_processed.load(Ordering::Relaxed),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let health = HealthTracker::new();
        assert_eq!(health.get_health(0, false).mqtt_status, "connecting");

        health.increment_reconnects();
        let snapshot = health.get_health(3, true);
        assert_eq!(snapshot.mqtt_status, "reconnecting");
        assert_eq!(snapshot.mqtt_reconnects, 1);
        assert_eq!(snapshot.clients_tracked, 3);

        health.mark_mqtt_connected();
        health.record_result();
        health.record_result();
        let snapshot = health.get_health(3, true);
        assert_eq!(snapshot.mqtt_status, "connected");
        assert_eq!(snapshot.results_processed, 2);
    }
}
