/**
 * MQTT - Canaux keepalive / résultats et publication sortante
 *
 * TOPICS :
 * - vigil/keepalives          : KeepaliveIn, alimente le ClientRegistry
 * - vigil/results             : CheckResult, alimente le ResultIngestor
 * - vigil/checks/<subscriber> : CheckRequest publiés par le kernel
 *
 * FONCTIONNEMENT :
 * - (Re)souscription aux deux canaux à chaque ConnAck
 * - Le poll pousse chaque message dans un canal mpsc vidé par un consommateur
 *   unique : deux résultats d'un même couple (client, check) sont appliqués
 *   dans l'ordre de publication. Les handlers tournent déjà hors de ce chemin.
 * - JSON invalide : loggé puis ignoré
 * - Erreur broker : loggée, pause de 2s, le poll reprend (rumqttc reconnecte)
 */

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::ingest::{IngestOutcome, PipelineError, ResultIngestor};
use crate::models::{CheckResult, KeepaliveIn};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};

pub const KEEPALIVES_TOPIC: &str = "vigil/keepalives";
pub const RESULTS_TOPIC: &str = "vigil/results";
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

pub fn check_topic(subscriber: &str) -> String {
    format!("vigil/checks/{subscriber}")
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Publication sortante ; AsyncClient en production, mock en test
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[async_trait]
impl Publish for AsyncClient {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        AsyncClient::publish(self, topic, QoS::AtLeastOnce, false, payload).await?;
        Ok(())
    }
}

#[async_trait]
pub trait Subscribe: Send + Sync {
    async fn subscribe(&self, topic: &str) -> Result<(), PublishError>;
}

#[async_trait]
impl Subscribe for AsyncClient {
    async fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        AsyncClient::subscribe(self, topic, QoS::AtLeastOnce).await?;
        Ok(())
    }
}

pub fn create_mqtt_client(conf: &MqttConf) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

/// Résultat du routage d'un message entrant
#[derive(Debug, PartialEq, Eq)]
pub enum Routed {
    Keepalive(String),
    Result(IngestOutcome),
    Ignored,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid JSON on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Aiguille un message vers le registre ou l'ingestor selon son topic
pub async fn route_message(ingestor: &ResultIngestor, topic: &str, payload: &[u8]) -> Result<Routed, RouteError> {
    let malformed = |source| RouteError::Malformed { topic: topic.to_string(), source };
    match topic {
        KEEPALIVES_TOPIC => {
            let msg: KeepaliveIn = serde_json::from_slice(payload).map_err(malformed)?;
            let client = ingestor
                .registry()
                .handle_keepalive(msg)
                .await
                .map_err(PipelineError::from)?;
            Ok(Routed::Keepalive(client.name))
        }
        RESULTS_TOPIC => {
            let result: CheckResult = serde_json::from_slice(payload).map_err(malformed)?;
            Ok(Routed::Result(ingestor.process_result(result).await?))
        }
        _ => Ok(Routed::Ignored),
    }
}

/// Message reçu du broker, tel que transmis au consommateur
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// À chaque ConnAck : état connecté puis (re)souscription aux deux canaux
pub async fn on_connected(client: &dyn Subscribe, health: &HealthTracker) {
    health.mark_mqtt_connected();
    for topic in [KEEPALIVES_TOPIC, RESULTS_TOPIC] {
        if let Err(e) = client.subscribe(topic).await {
            tracing::error!(%topic, error = %e, "MQTT subscribe failed");
        }
    }
    tracing::info!("MQTT connected, subscribed to keepalives and results");
}

pub fn on_connection_error(health: &HealthTracker, error: &ConnectionError) {
    tracing::error!(error = %error, "MQTT error");
    health.increment_reconnects();
}

async fn handle_inbound(ingestor: &ResultIngestor, health: &HealthTracker, msg: &Inbound) {
    match route_message(ingestor, &msg.topic, &msg.payload).await {
        Ok(Routed::Result(_)) => health.record_result(),
        Ok(Routed::Keepalive(name)) => tracing::trace!(client = %name, "keepalive"),
        Ok(Routed::Ignored) => {}
        Err(e @ RouteError::Malformed { .. }) => tracing::warn!(error = %e, "discarding message"),
        Err(e) => tracing::error!(topic = %msg.topic, error = %e, "failed to process message"),
    }
}

/// Consommateur unique : les messages sont traités un par un, dans l'ordre reçu
pub fn spawn_message_consumer(
    mut messages: mpsc::UnboundedReceiver<Inbound>,
    ingestor: ResultIngestor,
    health: HealthTracker,
) -> JoinHandle<()> {
    task::spawn(async move {
        while let Some(msg) = messages.recv().await {
            handle_inbound(&ingestor, &health, &msg).await;
        }
        tracing::debug!("MQTT message channel closed");
    })
}

pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    ingestor: ResultIngestor,
    health: HealthTracker,
) -> JoinHandle<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    spawn_message_consumer(rx, ingestor, health.clone());

    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => on_connected(&client, &health).await,
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    let msg = Inbound { topic: p.topic, payload: p.payload.to_vec() };
                    if tx.send(msg).is_err() {
                        tracing::error!("MQTT message consumer stopped");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    on_connection_error(&health, &e);
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    })
}
