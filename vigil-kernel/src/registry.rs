/**
 * CLIENT REGISTRY - Clients connus et leur dernier signe de vie
 *
 * Chaque keepalive réécrit client:<name> et ajoute le nom au set `clients`.
 * Aucune suppression ici : un client absent du store est simplement inconnu.
 */

use crate::models::{now_unix, Client, KeepaliveIn};
use crate::store::{client_key, Store, StoreError, CLIENTS_KEY};
use std::sync::Arc;

#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<dyn Store>,
}

impl ClientRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Traite un keepalive : crée ou rafraîchit le client
    pub async fn handle_keepalive(&self, msg: KeepaliveIn) -> Result<Client, StoreError> {
        let client = Client {
            timestamp: msg.timestamp.unwrap_or_else(now_unix),
            name: msg.name,
            address: msg.address,
            subscriptions: msg.subscriptions,
            extra: msg.extra,
        };

        let key = client_key(&client.name);
        let json = serde_json::to_string(&client).map_err(|source| StoreError::Corrupt {
            key: key.clone(),
            source,
        })?;
        self.store.set(&key, json).await?;
        if self.store.sadd(CLIENTS_KEY, &client.name).await? {
            tracing::info!(client = %client.name, address = %client.address, "registered new client");
        }
        Ok(client)
    }

    pub async fn get_client(&self, name: &str) -> Result<Option<Client>, StoreError> {
        let key = client_key(name);
        match self.store.get(&key).await? {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|source| StoreError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    pub async fn client_names(&self) -> Result<Vec<String>, StoreError> {
        self.store.smembers(CLIENTS_KEY).await
    }

    /// Liste les clients enregistrés ; un nom sans fiche est ignoré
    pub async fn list_clients(&self) -> Result<Vec<Client>, StoreError> {
        let mut clients = Vec::new();
        for name in self.client_names().await? {
            match self.get_client(&name).await {
                Ok(Some(client)) => clients.push(client),
                Ok(None) => tracing::debug!(client = %name, "client listed without record"),
                Err(StoreError::Corrupt { key, source }) => {
                    tracing::warn!(%key, error = %source, "skipping unreadable client record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn keepalive(name: &str, timestamp: Option<i64>) -> KeepaliveIn {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "address": "10.0.0.2",
            "subscriptions": ["linux"],
            "timestamp": timestamp,
            "version": "0.1.0"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_keepalive_registers_and_refreshes() {
        let store = Arc::new(MemoryStore::new());
        let registry = ClientRegistry::new(store.clone());

        registry.handle_keepalive(keepalive("web-01", Some(1_000))).await.unwrap();
        registry.handle_keepalive(keepalive("web-01", Some(1_030))).await.unwrap();

        let client = registry.get_client("web-01").await.unwrap().unwrap();
        assert_eq!(client.timestamp, 1_030);
        assert_eq!(client.subscriptions, vec!["linux"]);
        assert_eq!(client.extra["version"], "0.1.0");
        assert_eq!(registry.client_names().await.unwrap(), vec!["web-01"]);
    }

    #[tokio::test]
    async fn test_keepalive_without_timestamp_uses_receipt_time() {
        let registry = ClientRegistry::new(Arc::new(MemoryStore::new()));
        let before = now_unix();
        let client = registry.handle_keepalive(keepalive("db-01", None)).await.unwrap();
        assert!(client.timestamp >= before);
    }

    #[tokio::test]
    async fn test_list_skips_names_without_record() {
        let store = Arc::new(MemoryStore::new());
        let registry = ClientRegistry::new(store.clone());
        registry.handle_keepalive(keepalive("web-01", Some(1))).await.unwrap();
        store.sadd(CLIENTS_KEY, "ghost").await.unwrap();
        store.sadd(CLIENTS_KEY, "broken").await.unwrap();
        store.set("client:broken", "{not json".into()).await.unwrap();

        let clients = registry.list_clients().await.unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].name, "web-01");
        assert!(registry.get_client("unknown").await.unwrap().is_none());
    }
}
