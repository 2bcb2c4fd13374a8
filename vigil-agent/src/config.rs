//! Configuration de l'agent : fichier YAML (VIGIL_AGENT_CONFIG, défaut
//! agent.yaml) puis surcharges VIGIL_MQTT_HOST / VIGIL_MQTT_PORT.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

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

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub address: String,
    pub subscriptions: Vec<String>,
    pub keepalive_interval: u64,
    pub mqtt: MqttConf,
    pub checks: BTreeMap<String, CheckCommand>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CheckCommand {
    pub command: String,
    /// Secondes
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let name = gethostname::gethostname().to_string_lossy().into_owned();
        Self {
            address: name.clone(),
            name,
            subscriptions: Vec::new(),
            keepalive_interval: 20,
            mqtt: MqttConf::default(),
            checks: BTreeMap::new(),
        }
    }
}

impl Default for MqttConf {
    fn default() -> Self {
        Self { host: "localhost".into(), port: 1883 }
    }
}

impl AgentConfig {
    pub fn from_yaml(txt: &str, path: &Path) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(txt).map_err(|source| ConfigError::Yaml { path: path.to_path_buf(), source })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("VIGIL_MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("VIGIL_MQTT_PORT") {
            self.mqtt.port = port
                .parse()
                .map_err(|_| ConfigError::Env { name: "VIGIL_MQTT_PORT".into(), value: port.clone() })?;
        }
        Ok(())
    }

    /// Fichier absent -> valeurs par défaut
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "no agent config file, using defaults");
            return Ok(Self::default());
        }
        let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_yaml(&txt, path)
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = PathBuf::from(std::env::var("VIGIL_AGENT_CONFIG").unwrap_or_else(|_| "agent.yaml".into()));
        let mut cfg = Self::from_path(&path)?;
        cfg.apply_env(|name| std::env::var(name).ok())?;
        Ok(cfg)
    }
}
