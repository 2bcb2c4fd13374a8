/**
 * EXTENSIONS - Registre des handlers et mutators du kernel
 *
 * RÔLE :
 * Associe un nom à une implémentation, pour deux catégories : les handlers
 * (reçoivent l'événement et agissent) et les mutators (transforment les
 * données sérialisées avant le handler).
 *
 * FONCTIONNEMENT :
 * - Enregistrement explicite uniquement : `builtin::register`, les handlers
 *   déclarés dans la config, puis les manifests du dossier d'extensions
 * - Un nom déjà pris est remplacé (le dernier enregistré gagne, avec un warn)
 * - Une fois construit, le registre est figé et partagé en Arc
 */

pub mod builtin;
pub mod loader;
pub mod pipe;

use crate::config::KernelConfig;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use pipe::PipeExtension;

/// Erreurs possibles lors de la construction ou de l'exécution d'une extension
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Unknown handler: {0}")]
    UnknownHandler(String),
    #[error("Unknown mutator: {0}")]
    UnknownMutator(String),
    #[error("Invalid command '{command}': {reason}")]
    BadCommand { command: String, reason: String },
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Execution timed out after {0}s")]
    Timeout(u64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Extension manifest error: {0}")]
    Manifest(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Résultat d'une exécution : texte produit et code de sortie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionOutput {
    pub output: String,
    pub status: i32,
}

impl ExtensionOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { output: output.into(), status: 0 }
    }
}

#[async_trait]
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Mutator à appliquer avant ce handler ; ignoré pour un mutator
    fn mutator(&self) -> Option<&str> {
        None
    }

    async fn run(&self, data: &str) -> Result<ExtensionOutput, ExtensionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionKind {
    Handler,
    Mutator,
}

#[derive(Default)]
pub struct Extensions {
    handlers: BTreeMap<String, Arc<dyn Extension>>,
    mutators: BTreeMap<String, Arc<dyn Extension>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registre complet : built-ins, handlers de la config, dossier d'extensions
    pub async fn from_config(cfg: &KernelConfig) -> Self {
        let mut extensions = Self::new();
        builtin::register(&mut extensions);

        for (name, def) in &cfg.handlers {
            match PipeExtension::from_definition(name, def) {
                Ok(ext) => extensions.register(ExtensionKind::Handler, Arc::new(ext)),
                Err(e) => tracing::error!(handler = %name, error = %e, "invalid handler definition"),
            }
        }

        if let Some(dir) = &cfg.dispatch.extensions_dir {
            match loader::load_dir(&mut extensions, dir).await {
                Ok(loaded) => tracing::info!(count = loaded.len(), dir = %dir.display(), "loaded extension manifests"),
                Err(e) => tracing::error!(dir = %dir.display(), error = %e, "failed to read extensions directory"),
            }
        }

        extensions
    }

    pub fn register(&mut self, kind: ExtensionKind, ext: Arc<dyn Extension>) {
        let name = ext.name().to_string();
        let map = match kind {
            ExtensionKind::Handler => &mut self.handlers,
            ExtensionKind::Mutator => &mut self.mutators,
        };
        if map.insert(name.clone(), ext).is_some() {
            tracing::warn!(%name, ?kind, "extension replaced");
        }
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.handlers.get(name).cloned()
    }

    pub fn mutator(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.mutators.get(name).cloned()
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn mutator_names(&self) -> Vec<String> {
        self.mutators.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerDefinition;

    #[tokio::test]
    async fn test_from_config_registers_builtins_and_pipes() {
        let mut cfg = KernelConfig::default();
        cfg.handlers.insert(
            "mail".into(),
            HandlerDefinition { command: "mail-handler --to ops".into(), mutator: Some("only_check_output".into()), timeout_secs: None },
        );
        cfg.handlers.insert(
            "broken".into(),
            HandlerDefinition { command: "'unterminated".into(), mutator: None, timeout_secs: None },
        );

        let extensions = Extensions::from_config(&cfg).await;
        assert_eq!(extensions.handler_names(), vec!["debug", "mail"]);
        assert_eq!(extensions.mutator_names(), vec!["json", "only_check_output"]);
        let mail = extensions.handler("mail").unwrap();
        assert_eq!(mail.mutator(), Some("only_check_output"));
        assert!(extensions.handler("broken").is_none());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut extensions = Extensions::new();
        extensions.register(ExtensionKind::Handler, Arc::new(PipeExtension::new("mail", "first").unwrap()));
        extensions.register(ExtensionKind::Handler, Arc::new(PipeExtension::new("mail", "second").unwrap()));
        assert_eq!(extensions.handler_names(), vec!["mail"]);
        assert_eq!(extensions.handler("mail").unwrap().description(), "second");
    }
}
