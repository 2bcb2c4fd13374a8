/**
 * EVENTS - Stockage des événements actifs et machine d'état du cycle de vie
 *
 * RÔLE :
 * Décide pour chaque résultat standard si un incident est créé, continue,
 * est résolu, ou si sa résolution est retenue parce que le check oscille.
 *
 * MACHINE D'ÉTAT (par couple client/check) :
 * - événement existant + statut 0 + pas de flapping -> suppression, `resolve`
 * - événement existant + statut 0 + flapping        -> conservé, flapping=true, silence
 * - statut non nul -> occurrences +1 si même statut, sinon 1 ; `create` à chaque fois
 * - pas d'événement + statut 0 -> rien
 */

use crate::history::{
    flapping_verdict, record_status, DEFAULT_HIGH_FLAP_THRESHOLD, DEFAULT_LOW_FLAP_THRESHOLD,
};
use crate::models::{Check, Client, Event, EventAction, EventPayload, STATUS_OK};
use crate::store::{events_key, Store, StoreError};
use std::sync::Arc;

/// Accès à events:<client>, au plus un événement par check
#[derive(Clone)]
pub struct EventStore {
    store: Arc<dyn Store>,
}

impl EventStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, client: &str, check: &str) -> Result<Option<Event>, StoreError> {
        let key = events_key(client);
        match self.store.hget(&key, check).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    pub async fn put(&self, client: &str, check: &str, event: &Event) -> Result<(), StoreError> {
        let key = events_key(client);
        let json = serde_json::to_string(event).map_err(|source| StoreError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.store.hset(&key, check, json).await
    }

    pub async fn delete(&self, client: &str, check: &str) -> Result<bool, StoreError> {
        self.store.hdel(&events_key(client), check).await
    }

    pub async fn exists(&self, client: &str, check: &str) -> Result<bool, StoreError> {
        self.store.hexists(&events_key(client), check).await
    }
}

/// Orchestration flapping + événements pour un résultat standard
#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn Store>,
    events: EventStore,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            events: EventStore::new(store.clone()),
            store,
        }
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Traite un résultat et retourne l'événement à dispatcher, s'il y en a un.
    ///
    /// Une erreur du store interrompt le traitement de ce seul résultat ;
    /// les écritures déjà faites (historique) ne sont pas annulées.
    pub async fn process(&self, client: &Client, mut check: Check) -> Result<Option<EventPayload>, StoreError> {
        let reading = record_status(self.store.as_ref(), &client.name, &check.name, check.status).await?;
        let previous = self.events.get(&client.name, &check.name).await?;

        let was_flapping = previous.as_ref().is_some_and(|e| e.flapping);
        let high = check.high_flap_threshold.unwrap_or(DEFAULT_HIGH_FLAP_THRESHOLD);
        let low = check.low_flap_threshold.unwrap_or(DEFAULT_LOW_FLAP_THRESHOLD);
        let flapping = flapping_verdict(was_flapping, reading.state_change_percent, high, low);

        check.history = Some(reading.history);
        check.total_state_change = Some(reading.state_change_percent.unwrap_or(0));
        check.flapping = Some(flapping);

        match previous {
            Some(previous) if check.status == STATUS_OK => {
                if flapping {
                    let kept = Event { flapping: true, ..previous };
                    self.events.put(&client.name, &check.name, &kept).await?;
                    tracing::debug!(client = %client.name, check = %check.name, "resolution held back while flapping");
                    return Ok(None);
                }

                self.events.delete(&client.name, &check.name).await?;
                tracing::info!(client = %client.name, check = %check.name, "event resolved");
                Ok(Some(EventPayload::new(client.clone(), check, 1, EventAction::Resolve)))
            }
            None if check.status == STATUS_OK => Ok(None),
            previous => {
                let occurrences = match previous {
                    Some(prev) if prev.status == check.status => prev.occurrences + 1,
                    _ => 1,
                };

                let event = Event {
                    status: check.status,
                    output: check.output.clone(),
                    flapping,
                    occurrences,
                };
                self.events.put(&client.name, &check.name, &event).await?;

                if occurrences == 1 {
                    tracing::info!(client = %client.name, check = %check.name, status = check.status, "event created");
                }
                Ok(Some(EventPayload::new(client.clone(), check, occurrences, EventAction::Create)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Check;
    use crate::store::MemoryStore;

    fn client() -> Client {
        Client {
            name: "web-01".into(),
            address: "10.0.0.2".into(),
            subscriptions: vec!["linux".into()],
            timestamp: 0,
            extra: Default::default(),
        }
    }

    fn manager() -> (Arc<MemoryStore>, LifecycleManager) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), LifecycleManager::new(store))
    }

    #[tokio::test]
    async fn test_repeated_status_increments_occurrences() {
        let (_, lifecycle) = manager();
        let prior = Event { status: 2, output: "down".into(), flapping: false, occurrences: 3 };
        lifecycle.events().put("web-01", "http", &prior).await.unwrap();

        let payload = lifecycle
            .process(&client(), Check::new("http", 2, "still down", 10))
            .await
            .unwrap()
            .expect("non-ok results are always dispatched");

        assert_eq!(payload.occurrences, 4);
        assert_eq!(payload.action, EventAction::Create);
        let stored = lifecycle.events().get("web-01", "http").await.unwrap().unwrap();
        assert_eq!(stored.occurrences, 4);
        assert_eq!(stored.output, "still down");
    }

    #[tokio::test]
    async fn test_status_change_restarts_occurrences() {
        let (_, lifecycle) = manager();
        let prior = Event { status: 1, output: "slow".into(), flapping: false, occurrences: 7 };
        lifecycle.events().put("web-01", "http", &prior).await.unwrap();

        let payload = lifecycle.process(&client(), Check::new("http", 2, "down", 10)).await.unwrap().unwrap();
        assert_eq!(payload.occurrences, 1);
        assert_eq!(lifecycle.events().get("web-01", "http").await.unwrap().unwrap().status, 2);
    }

    #[tokio::test]
    async fn test_ok_resolves_existing_event() {
        let (_, lifecycle) = manager();
        let prior = Event { status: 2, output: "down".into(), flapping: false, occurrences: 2 };
        lifecycle.events().put("web-01", "http", &prior).await.unwrap();

        let payload = lifecycle.process(&client(), Check::new("http", 0, "up", 10)).await.unwrap().unwrap();
        assert_eq!(payload.action, EventAction::Resolve);
        assert_eq!(payload.check.flapping, Some(false));
        assert!(!lifecycle.events().exists("web-01", "http").await.unwrap());

        // un second ok ne produit plus rien
        assert!(lifecycle.process(&client(), Check::new("http", 0, "up", 11)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolution_held_while_flapping() {
        let (store, lifecycle) = manager();
        // 20 statuts alternés déjà en historique : le prochain ok fera 101%
        for i in 0..20 {
            store.rpush("history:web-01:http", (i % 2).to_string()).await.unwrap();
        }
        let prior = Event { status: 1, output: "flaky".into(), flapping: true, occurrences: 5 };
        lifecycle.events().put("web-01", "http", &prior).await.unwrap();

        let outcome = lifecycle.process(&client(), Check::new("http", 0, "up", 10)).await.unwrap();
        assert!(outcome.is_none());

        let stored = lifecycle.events().get("web-01", "http").await.unwrap().unwrap();
        assert!(stored.flapping);
        assert_eq!(stored.occurrences, 5);
        assert_eq!(stored.output, "flaky");
    }

    #[tokio::test]
    async fn test_ok_without_event_is_noop() {
        let (store, lifecycle) = manager();
        assert!(lifecycle.process(&client(), Check::new("http", 0, "up", 10)).await.unwrap().is_none());
        assert!(!lifecycle.events().exists("web-01", "http").await.unwrap());
        // l'historique est tout de même alimenté
        assert_eq!(store.lrange("history:web-01:http", 0, -1).await.unwrap(), vec!["0"]);
    }

    #[tokio::test]
    async fn test_flapping_is_recorded_on_create() {
        let (store, lifecycle) = manager();
        for i in 0..20 {
            store.rpush("history:web-01:http", (i % 2).to_string()).await.unwrap();
        }

        let payload = lifecycle.process(&client(), Check::new("http", 2, "down", 10)).await.unwrap().unwrap();
        assert_eq!(payload.check.flapping, Some(true));
        assert_eq!(payload.check.total_state_change, Some(101));
        assert_eq!(payload.check.history.as_ref().map(Vec::len), Some(20));
        assert!(lifecycle.events().get("web-01", "http").await.unwrap().unwrap().flapping);
    }

    #[tokio::test]
    async fn test_custom_thresholds_apply() {
        let (store, lifecycle) = manager();
        // 0 -> ... -> un seul changement récent : 6%
        for _ in 0..20 {
            store.rpush("history:web-01:http", "0".into()).await.unwrap();
        }
        let mut check = Check::new("http", 2, "down", 10);
        check.high_flap_threshold = Some(5);
        check.low_flap_threshold = Some(1);

        let payload = lifecycle.process(&client(), check).await.unwrap().unwrap();
        assert_eq!(payload.check.total_state_change, Some(6));
        assert_eq!(payload.check.flapping, Some(true));
    }
}
