#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::QoS;
use serde_json::Value;
use std::sync::Arc;
use vigil_devkit::{MessageBuilder, MockMqttClient};
use vigil_kernel::config::KernelConfig;
use vigil_kernel::dispatch::Dispatch;
use vigil_kernel::ingest::ResultIngestor;
use vigil_kernel::models::EventPayload;
use vigil_kernel::mqtt::{route_message, Publish, PublishError, Routed, Subscribe, KEEPALIVES_TOPIC, RESULTS_TOPIC};
use vigil_kernel::store::{MemoryStore, Store};

/// Adapte le client MQTT simulé au trait de publication du kernel
pub struct MockPublisher(pub MockMqttClient);

#[async_trait]
impl Publish for MockPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        // le mock ne peut pas échouer
        let _ = self.0.publish(topic, QoS::AtLeastOnce, false, payload).await;
        Ok(())
    }
}

#[async_trait]
impl Subscribe for MockPublisher {
    async fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        let _ = self.0.subscribe(topic, QoS::AtLeastOnce).await;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDispatch(pub Mutex<Vec<EventPayload>>);

impl Dispatch for RecordingDispatch {
    fn dispatch(&self, payload: EventPayload) {
        self.0.lock().push(payload);
    }
}

impl RecordingDispatch {
    pub fn take(&self) -> Vec<EventPayload> {
        std::mem::take(&mut *self.0.lock())
    }
}

pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub dispatched: Arc<RecordingDispatch>,
    pub ingestor: ResultIngestor,
}

pub fn build_context(config: KernelConfig) -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let dispatched = Arc::new(RecordingDispatch::default());
    let ingestor = ResultIngestor::new(store.clone(), Arc::new(config), dispatched.clone());
    TestContext { store, dispatched, ingestor }
}

impl TestContext {
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub async fn keepalive(&self, name: &str, timestamp: i64) -> Routed {
        let msg = MessageBuilder::keepalive(name, &["linux"], timestamp);
        self.deliver(KEEPALIVES_TOPIC, &msg).await
    }

    pub async fn result(&self, client: &str, check: &str, status: i64, output: &str, executed: i64) -> Routed {
        let msg = MessageBuilder::check_result(client, check, status, output, executed);
        self.deliver(RESULTS_TOPIC, &msg).await
    }

    pub async fn deliver(&self, topic: &str, msg: &Value) -> Routed {
        route_message(&self.ingestor, topic, &MessageBuilder::to_bytes(msg))
            .await
            .expect("message should route")
    }
}
