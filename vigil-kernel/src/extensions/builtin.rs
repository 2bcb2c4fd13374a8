use super::{Extension, ExtensionError, ExtensionKind, ExtensionOutput, Extensions};
use async_trait::async_trait;
use std::sync::Arc;

/// Enregistre les extensions fournies avec le kernel
pub fn register(extensions: &mut Extensions) {
    extensions.register(ExtensionKind::Handler, Arc::new(DebugHandler));
    extensions.register(ExtensionKind::Mutator, Arc::new(JsonMutator));
    extensions.register(ExtensionKind::Mutator, Arc::new(OnlyCheckOutput));
}

/// Renvoie l'événement en JSON indenté, une ligne par champ dans les logs
pub struct DebugHandler;

#[async_trait]
impl Extension for DebugHandler {
    fn name(&self) -> &str {
        "debug"
    }

    fn description(&self) -> &str {
        "outputs event data for debugging"
    }

    async fn run(&self, data: &str) -> Result<ExtensionOutput, ExtensionError> {
        let event: serde_json::Value = serde_json::from_str(data)?;
        Ok(ExtensionOutput::ok(serde_json::to_string_pretty(&event)?))
    }
}

pub struct JsonMutator;

#[async_trait]
impl Extension for JsonMutator {
    fn name(&self) -> &str {
        "json"
    }

    fn description(&self) -> &str {
        "returns event data as JSON"
    }

    async fn run(&self, data: &str) -> Result<ExtensionOutput, ExtensionError> {
        Ok(ExtensionOutput::ok(data))
    }
}

pub struct OnlyCheckOutput;

#[async_trait]
impl Extension for OnlyCheckOutput {
    fn name(&self) -> &str {
        "only_check_output"
    }

    fn description(&self) -> &str {
        "returns check output"
    }

    async fn run(&self, data: &str) -> Result<ExtensionOutput, ExtensionError> {
        let event: serde_json::Value = serde_json::from_str(data)?;
        event
            .pointer("/check/output")
            .and_then(|v| v.as_str())
            .map(ExtensionOutput::ok)
            .ok_or_else(|| ExtensionError::InvalidInput("event has no check output".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"{"client":{"name":"web-01"},"check":{"name":"disk","status":2,"output":"disk 95% full\n"}}"#;

    #[tokio::test]
    async fn test_only_check_output_extracts_output() {
        let out = OnlyCheckOutput.run(EVENT).await.unwrap();
        assert_eq!(out, ExtensionOutput::ok("disk 95% full\n"));

        let err = OnlyCheckOutput.run(r#"{"check":{}}"#).await.unwrap_err();
        assert!(matches!(err, ExtensionError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_json_is_identity_and_debug_pretty_prints() {
        assert_eq!(JsonMutator.run(EVENT).await.unwrap().output, EVENT);

        let out = DebugHandler.run(EVENT).await.unwrap();
        assert!(out.output.lines().count() > 1);
        assert!(out.output.contains("\"name\": \"web-01\""));
        assert!(DebugHandler.run("not json").await.is_err());
    }
}
