//! Vigil Agent - client de surveillance
//!
//! - Publie un keepalive périodique sur vigil/keepalives
//! - S'abonne à vigil/checks/<subscription> pour chaque abonnement
//! - Exécute les checks demandés qu'il connaît et publie le résultat sur vigil/results

mod config;
mod execution;

use anyhow::{Context, Result};
use config::AgentConfig;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const KEEPALIVES_TOPIC: &str = "vigil/keepalives";
const RESULTS_TOPIC: &str = "vigil/results";

#[derive(Debug, Serialize)]
struct KeepaliveMessage<'a> {
    name: &'a str,
    address: &'a str,
    subscriptions: &'a [String],
    timestamp: i64,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    name: String,
    issued: i64,
}

#[derive(Debug, Serialize)]
struct ResultMessage<'a> {
    client: &'a str,
    check: execution::CheckOutput,
}

fn check_topic(subscription: &str) -> String {
    format!("vigil/checks/{subscription}")
}

fn keepalive_payload(cfg: &AgentConfig, now: i64) -> Result<Vec<u8>> {
    let msg = KeepaliveMessage {
        name: &cfg.name,
        address: &cfg.address,
        subscriptions: &cfg.subscriptions,
        timestamp: now,
        version: env!("CARGO_PKG_VERSION"),
    };
    serde_json::to_vec(&msg).context("Failed to serialize keepalive")
}

/// Décode une demande et retourne le check à exécuter s'il est connu
fn parse_request(cfg: &AgentConfig, payload: &[u8]) -> Option<CheckRequest> {
    let request: CheckRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("Invalid check request: {}", e);
            return None;
        }
    };
    if !cfg.checks.contains_key(&request.name) {
        debug!("Ignoring request for unknown check {}", request.name);
        return None;
    }
    Some(request)
}

struct Agent {
    config: AgentConfig,
    mqtt_client: AsyncClient,
    requests: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Agent {
    fn new(config: AgentConfig) -> Self {
        let mut mqtt_options = MqttOptions::new(format!("vigil-agent-{}", config.name), &config.mqtt.host, config.mqtt.port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(true);

        let (mqtt_client, mut eventloop) = AsyncClient::new(mqtt_options, 10);
        let (tx, requests) = mpsc::unbounded_channel();

        // boucle MQTT : (re)souscription à chaque connexion, demandes vers la boucle principale
        let client = mqtt_client.clone();
        let topics: Vec<String> = config.subscriptions.iter().map(|s| check_topic(s)).collect();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        for topic in &topics {
                            if let Err(e) = client.subscribe(topic, QoS::AtLeastOnce).await {
                                error!("Failed to subscribe to {}: {}", topic, e);
                            }
                        }
                        info!("Connected, subscribed to {} check topics", topics.len());
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if tx.send(publish.payload.to_vec()).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self { config, mqtt_client, requests }
    }

    async fn run(&mut self) -> Result<()> {
        info!("Agent {} starting, subscriptions: {:?}", self.config.name, self.config.subscriptions);
        let mut keepalive_timer = interval(Duration::from_secs(self.config.keepalive_interval.max(1)));

        loop {
            tokio::select! {
                _ = keepalive_timer.tick() => {
                    if let Err(e) = self.send_keepalive().await {
                        error!("Failed to send keepalive: {:#}", e);
                    }
                }
                payload = self.requests.recv() => {
                    let Some(payload) = payload else {
                        anyhow::bail!("MQTT event loop stopped");
                    };
                    if let Some(request) = parse_request(&self.config, &payload) {
                        self.spawn_check(request);
                    }
                }
            }
        }
    }

    async fn send_keepalive(&self) -> Result<()> {
        let payload = keepalive_payload(&self.config, time::OffsetDateTime::now_utc().unix_timestamp())?;
        self.mqtt_client
            .publish(KEEPALIVES_TOPIC, QoS::AtLeastOnce, false, payload)
            .await
            .context("Failed to publish keepalive")?;
        debug!("Keepalive sent");
        Ok(())
    }

    fn spawn_check(&self, request: CheckRequest) {
        let Some(def) = self.config.checks.get(&request.name).cloned() else {
            return;
        };
        let client = self.mqtt_client.clone();
        let name = self.config.name.clone();
        tokio::spawn(async move {
            let check = execution::run_check(&request.name, request.issued, &def).await;
            let status = check.status;
            let message = ResultMessage { client: &name, check };
            match serde_json::to_vec(&message) {
                Ok(payload) => match client.publish(RESULTS_TOPIC, QoS::AtLeastOnce, false, payload).await {
                    Ok(()) => debug!("Published result for {} (status {})", request.name, status),
                    Err(e) => error!("Failed to publish result for {}: {}", request.name, e),
                },
                Err(e) => error!("Failed to serialize result: {}", e),
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::load().context("Failed to load agent configuration")?;
    let mut agent = Agent::new(config);
    agent.run().await.context("Agent execution failed")
}
