/**
 * CONFIG KERNEL - Configuration immuable construite une fois au démarrage
 *
 * Source : fichier YAML (VIGIL_CONFIG, défaut kernel.yaml) puis surcharges
 * d'environnement (VIGIL_MQTT_HOST, VIGIL_MQTT_PORT, VIGIL_API_KEY,
 * VIGIL_WORKER). La valeur obtenue est partagée en Arc par tous les composants.
 */

use crate::models::CheckType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid YAML in {path:?}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {name}: {value}")]
    Env { name: String, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub mqtt: MqttConf,
    pub api: ApiConf,
    pub store: StoreConf,
    pub keepalive: KeepaliveConf,
    pub publisher: PublisherConf,
    pub dispatch: DispatchConf,
    /// Instance qui ne fait que consommer les résultats
    pub worker: bool,
    /// Définitions statiques fusionnées dans les résultats reçus
    pub checks: BTreeMap<String, CheckDefinition>,
    pub handlers: BTreeMap<String, HandlerDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConf {
    pub bind: String,
    /// Si défini, header x-api-key obligatoire (sauf /health)
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConf {
    /// Fichier snapshot JSON ; None = store purement en mémoire
    pub snapshot: Option<PathBuf>,
    pub snapshot_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConf {
    pub interval_secs: u64,
    pub warning_secs: i64,
    pub critical_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConf {
    pub stagger_secs: u64,
    /// Mode diagnostic : pas de décalage, intervalle de 0.5s
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConf {
    pub pool_size: usize,
    pub extensions_dir: Option<PathBuf>,
}

/// Définition statique d'un check ; seuls les champs définis écrasent le résultat
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscribers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub check_type: Option<CheckType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_flap_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_flap_threshold: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandlerDefinition {
    pub command: String,
    #[serde(default)]
    pub mutator: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mqtt: MqttConf::default(),
            api: ApiConf::default(),
            store: StoreConf::default(),
            keepalive: KeepaliveConf::default(),
            publisher: PublisherConf::default(),
            dispatch: DispatchConf::default(),
            worker: false,
            checks: BTreeMap::new(),
            handlers: BTreeMap::new(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883, client_id: "vigil-kernel".into() }
    }
}

impl Default for ApiConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:4567".into(), key: None }
    }
}

impl Default for KeepaliveConf {
    fn default() -> Self {
        Self { interval_secs: 30, warning_secs: 120, critical_secs: 180 }
    }
}

impl Default for PublisherConf {
    fn default() -> Self {
        Self { stagger_secs: 7, test_mode: false }
    }
}

impl Default for DispatchConf {
    fn default() -> Self {
        Self { pool_size: 15, extensions_dir: None }
    }
}

impl KernelConfig {
    pub fn from_yaml(txt: &str, path: &Path) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applique les surcharges d'environnement via un lookup injectable
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("VIGIL_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("VIGIL_MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| ConfigError::Env {
                name: "VIGIL_MQTT_PORT".into(),
                value: port.clone(),
            })?;
        }
        if let Some(key) = lookup("VIGIL_API_KEY") {
            if !key.is_empty() {
                self.api.key = Some(key);
            }
        }
        if let Some(worker) = lookup("VIGIL_WORKER") {
            self.worker = matches!(worker.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn check(&self, name: &str) -> Option<&CheckDefinition> {
        self.checks.get(name)
    }
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = PathBuf::from(std::env::var("VIGIL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into()));

    let mut cfg = if path.exists() {
        let txt = fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        KernelConfig::from_yaml(&txt, &path)?
    } else {
        tracing::warn!(path = %path.display(), "no config file, using defaults");
        KernelConfig::default()
    };

    cfg.apply_env(|name| std::env::var(name).ok())?;
    Ok(cfg)
}
