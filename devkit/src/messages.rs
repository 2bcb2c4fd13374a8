/*!
Construction des messages échangés sur les canaux Vigil

Produit des `serde_json::Value` au format attendu par le kernel, sans
dépendre de ses types : les tests vérifient ainsi le format réel du fil.
*/

use serde_json::{json, Value};

pub struct MessageBuilder;

impl MessageBuilder {
    pub fn now() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Keepalive publié sur vigil/keepalives
    pub fn keepalive(name: &str, subscriptions: &[&str], timestamp: i64) -> Value {
        json!({
            "name": name,
            "address": format!("{name}.local"),
            "subscriptions": subscriptions,
            "timestamp": timestamp
        })
    }

    /// Résultat standard publié sur vigil/results
    pub fn check_result(client: &str, check: &str, status: i64, output: &str, executed: i64) -> Value {
        json!({
            "client": client,
            "check": {
                "name": check,
                "status": status,
                "output": output,
                "issued": executed,
                "executed": executed
            }
        })
    }

    pub fn metric_result(client: &str, check: &str, output: &str, executed: i64) -> Value {
        let mut result = Self::check_result(client, check, 0, output, executed);
        result["check"]["type"] = json!("metric");
        result
    }

    /// Demande publiée sur vigil/checks/<subscriber>
    pub fn check_request(name: &str, issued: i64) -> Value {
        json!({ "name": name, "issued": issued })
    }

    pub fn to_bytes(value: &Value) -> Vec<u8> {
        value.to_string().into_bytes()
    }
}
