/**
 * STORE - Interface clé/valeur partagée par tout le pipeline
 *
 * RÔLE :
 * Source de vérité unique du kernel : clients, historiques, événements,
 * derniers résultats et agrégats vivent tous ici.
 *
 * FONCTIONNEMENT :
 * - Store trait = opérations atomiques par clé (string, set, list, hash)
 * - `exec` = lot d'écritures appliqué d'un bloc (aucun état partiel visible)
 * - Aucune séquence multi-clés n'est atomique en dehors de `exec`
 *
 * SCHÉMA :
 * client:<name>              -> Client sérialisé
 * clients                    -> set des noms de clients
 * history:<client>:<check>   -> liste des derniers statuts (<= 20)
 * events:<client>            -> hash check -> Event sérialisé
 * result:<client>:<check>    -> dernier Check sérialisé
 * aggregates                 -> set des noms d'agrégats
 * aggregates:<name>          -> set de "<client>:<check>"
 */

pub mod memory;

use async_trait::async_trait;

pub use memory::MemoryStore;

/// Erreurs possibles lors des opérations sur le store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),
    #[error("Corrupt value at '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Snapshot IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Écriture élémentaire d'un lot `exec`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: String },
    Del { key: String },
    SAdd { key: String, member: String },
    SRem { key: String, member: String },
}

/// Opérations atomiques par clé, à la manière d'un serveur Redis.
///
/// Les index de `lrange` suivent la convention Redis : négatifs comptés
/// depuis la fin, bornes inclusives.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    /// Retourne true si la clé existait
    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Retourne true si le membre a été ajouté
    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    /// Retourne true si le membre était présent
    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Retourne la nouvelle longueur de la liste
    async fn rpush(&self, key: &str, value: String) -> Result<usize, StoreError>;
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError>;
    async fn lpop(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;
    /// Retourne true si le champ existait
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;
    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Applique toutes les écritures ou aucune
    async fn exec(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;
}

pub fn client_key(name: &str) -> String {
    format!("client:{name}")
}

pub const CLIENTS_KEY: &str = "clients";

pub fn history_key(client: &str, check: &str) -> String {
    format!("history:{client}:{check}")
}

pub fn events_key(client: &str) -> String {
    format!("events:{client}")
}

pub fn result_key(client: &str, check: &str) -> String {
    format!("result:{client}:{check}")
}

pub const AGGREGATES_KEY: &str = "aggregates";

pub fn aggregate_key(name: &str) -> String {
    format!("aggregates:{name}")
}
