/**
 * CHECK PUBLISHER - Demandes d'exécution périodiques vers les abonnés
 *
 * Pour le i-ème check configuré, on attend i * stagger secondes puis on
 * publie {name, issued} sur vigil/checks/<subscriber> toutes les `interval`
 * secondes. En mode test : pas de décalage et un intervalle de 500ms.
 */

use crate::config::{CheckDefinition, KernelConfig};
use crate::models::{now_unix, CheckRequest};
use crate::mqtt::{check_topic, Publish, PublishError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};

const TEST_MODE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct CheckPublisher {
    config: Arc<KernelConfig>,
    publisher: Arc<dyn Publish>,
}

/// Planification d'un check : décalage initial et période
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub check: String,
    pub subscribers: Vec<String>,
    pub delay: Duration,
    pub period: Duration,
}

impl CheckPublisher {
    pub fn new(config: Arc<KernelConfig>, publisher: Arc<dyn Publish>) -> Self {
        Self { config, publisher }
    }

    /// Checks publiables ; l'index de décalage compte tous les checks configurés
    pub fn schedules(&self) -> Vec<Schedule> {
        let conf = &self.config.publisher;
        let mut schedules = Vec::new();

        for (index, (name, def)) in self.config.checks.iter().enumerate() {
            if def.subscribers.is_empty() {
                continue;
            }
            let period = match (conf.test_mode, def.interval) {
                (true, _) => TEST_MODE_INTERVAL,
                (false, Some(secs)) if secs > 0 => Duration::from_secs(secs),
                (false, _) => {
                    tracing::warn!(check = %name, "check has subscribers but no interval, not published");
                    continue;
                }
            };
            let stagger = if conf.test_mode { 0 } else { conf.stagger_secs };

            schedules.push(Schedule {
                check: name.clone(),
                subscribers: def.subscribers.clone(),
                delay: Duration::from_secs(stagger * index as u64),
                period,
            });
        }
        schedules
    }

    /// Publie une demande pour chaque abonné du check
    pub async fn publish_request(&self, name: &str, def: &CheckDefinition, now: i64) -> Result<usize, PublishError> {
        let request = CheckRequest { name: name.to_string(), issued: now };
        let payload = serde_json::to_vec(&request)?;

        for subscriber in &def.subscribers {
            self.publisher.publish(&check_topic(subscriber), payload.clone()).await?;
            tracing::debug!(check = %name, %subscriber, "published check request");
        }
        Ok(def.subscribers.len())
    }

    pub fn start(self) -> Vec<JoinHandle<()>> {
        self.schedules()
            .into_iter()
            .filter_map(|schedule| {
                let def = self.config.checks.get(&schedule.check)?.clone();
                let this = self.clone();
                Some(tokio::spawn(async move {
                    sleep(schedule.delay).await;
                    let mut ticker = interval_at(Instant::now() + schedule.period, schedule.period);
                    loop {
                        ticker.tick().await;
                        if let Err(e) = this.publish_request(&schedule.check, &def, now_unix()).await {
                            tracing::error!(check = %schedule.check, error = %e, "failed to publish check request");
                        }
                    }
                }))
            })
            .collect()
    }
}
