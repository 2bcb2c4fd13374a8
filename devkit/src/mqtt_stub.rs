/*!
Mock MQTT Client pour tester sans broker

Enregistre tous les messages publiés et les abonnements, et permet de
simuler la réception de messages sur un canal.
*/

use anyhow::Result;
use parking_lot::Mutex;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Mock MQTT Client aux signatures de rumqttc::AsyncClient
#[derive(Clone, Default)]
pub struct MockMqttClient {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    message_sender: Arc<Mutex<Option<mpsc::UnboundedSender<MockMessage>>>>,
}

impl MockMqttClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel recevant les messages simulés
    pub fn setup_receiver(&self) -> mpsc::UnboundedReceiver<MockMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.message_sender.lock() = Some(sender);
        receiver
    }

    pub async fn publish<S, V>(&self, topic: S, qos: QoS, retain: bool, payload: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let message = MockMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain,
        };
        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "mock publish");
        self.published_messages.lock().push(message);
        Ok(())
    }

    pub async fn subscribe<S: Into<String>>(&self, topic: S, _qos: QoS) -> Result<()> {
        let topic = topic.into();
        tracing::debug!(%topic, "mock subscribe");
        self.subscriptions.lock().push(topic);
        Ok(())
    }

    /// Simule un message entrant ; seuls les topics abonnés sont livrés
    pub async fn simulate_incoming<S, V>(&self, topic: S, payload: V) -> Result<bool>
    where
        S: Into<String>,
        V: Into<Vec<u8>>,
    {
        let topic = topic.into();
        if !self.subscriptions.lock().iter().any(|t| topic_matches(t, &topic)) {
            return Ok(false);
        }

        let message = MockMessage {
            topic,
            payload: payload.into(),
            qos: QoS::AtLeastOnce,
            retain: false,
        };
        if let Some(sender) = self.message_sender.lock().as_ref() {
            sender
                .send(message)
                .map_err(|e| anyhow::anyhow!("Send error: {}", e))?;
        }
        Ok(true)
    }

    pub fn get_subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Attend qu'au moins `count` messages soient publiés sur `topic`
    pub async fn wait_for_messages(&self, topic: &str, count: usize, within: Duration) -> Result<Vec<MockMessage>> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let found = self.find_messages_by_topic(topic);
            if found.len() >= count {
                return Ok(found);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("expected {} messages on {}, got {}", count, topic, found.len());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Correspondance de topic MQTT avec jokers `+` et `#`
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
