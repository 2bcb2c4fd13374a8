use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const STATUS_OK: i64 = 0;
pub const STATUS_WARNING: i64 = 1;
pub const STATUS_CRITICAL: i64 = 2;

/// Client tel qu'enregistré par son dernier keepalive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Client {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Dernier signe de vie (epoch secondes)
    pub timestamp: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keepalive reçu sur le canal MQTT
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveIn {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub subscriptions: Vec<String>,
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    #[default]
    Standard,
    Metric,
}

fn is_standard(t: &CheckType) -> bool {
    *t == CheckType::Standard
}

/// Résultat d'un check, enrichi au fil du pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Check {
    pub name: String,
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub issued: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<i64>,
    #[serde(rename = "type", default, skip_serializing_if = "is_standard")]
    pub check_type: CheckType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high_flap_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_flap_threshold: Option<u32>,
    /// Renseignés par le détecteur de flapping avant dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_state_change: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flapping: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Check {
    pub fn new(name: &str, status: i64, output: &str, issued: i64) -> Self {
        Self {
            name: name.to_string(),
            status,
            output: output.to_string(),
            issued,
            executed: None,
            check_type: CheckType::Standard,
            handler: None,
            high_flap_threshold: None,
            low_flap_threshold: None,
            history: None,
            total_state_change: None,
            flapping: None,
            extra: Map::new(),
        }
    }

    /// Moment d'exécution, ou d'émission à défaut
    pub fn executed_at(&self) -> i64 {
        self.executed.unwrap_or(self.issued)
    }

    pub fn severity(&self) -> Severity {
        Severity::from_status(self.status)
    }

    pub fn handler_name(&self) -> &str {
        self.handler.as_deref().unwrap_or("default")
    }
}

/// Message publié sur le canal des résultats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub client: String,
    pub check: Check,
}

/// Événement actif stocké dans events:<client>
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub status: i64,
    pub output: String,
    pub flapping: bool,
    pub occurrences: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Resolve,
}

/// Données remises aux handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: uuid::Uuid,
    pub client: Client,
    pub check: Check,
    pub occurrences: u32,
    pub action: EventAction,
}

impl EventPayload {
    pub fn new(client: Client, check: Check, occurrences: u32, action: EventAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            client,
            check,
            occurrences,
            action,
        }
    }
}

/// Demande d'exécution publiée vers les abonnés d'un check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckRequest {
    pub name: String,
    pub issued: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Ok, Severity::Warning, Severity::Critical, Severity::Unknown];

    /// Tout statut hors 0..=2 est classé unknown
    pub fn from_status(status: i64) -> Self {
        match status {
            STATUS_OK => Severity::Ok,
            STATUS_WARNING => Severity::Warning,
            STATUS_CRITICAL => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Severity::ALL
            .into_iter()
            .find(|severity| severity.as_str() == s)
            .ok_or_else(|| format!("unsupported severity '{s}'"))
    }
}

pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
