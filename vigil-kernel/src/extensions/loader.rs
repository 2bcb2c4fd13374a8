/**
 * EXTENSION LOADER - Découverte des extensions depuis un dossier de manifests
 *
 * Chaque fichier *.json du dossier décrit une extension pipe :
 * ```json
 * {
 *   "name": "pagerduty",
 *   "type": "handler",
 *   "command": "/opt/vigil/bin/pagerduty --service ops",
 *   "mutator": "only_check_output",
 *   "timeout": 10
 * }
 * ```
 * Un manifest invalide est loggé puis ignoré, les autres sont chargés.
 */

use super::{ExtensionError, ExtensionKind, Extensions, PipeExtension};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExtensionKind,
    pub command: String,
    #[serde(default)]
    pub mutator: Option<String>,
    /// Secondes
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// Enregistre toutes les extensions valides du dossier, retourne leurs noms
pub async fn load_dir(extensions: &mut Extensions, dir: &Path) -> Result<Vec<String>, ExtensionError> {
    let mut loaded = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    for path in paths {
        match load_manifest(&path).await {
            Ok(manifest) => {
                let ext = PipeExtension::new(&manifest.name, &manifest.command)
                    .map(|ext| ext.with_mutator(manifest.mutator.clone()).with_timeout(manifest.timeout));
                match ext {
                    Ok(ext) => {
                        extensions.register(manifest.kind, Arc::new(ext));
                        tracing::debug!(name = %manifest.name, kind = ?manifest.kind, file = %path.display(), "extension registered");
                        loaded.push(manifest.name);
                    }
                    Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping extension"),
                }
            }
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to load extension manifest"),
        }
    }

    Ok(loaded)
}

async fn load_manifest(path: &Path) -> Result<ExtensionManifest, ExtensionError> {
    let content = fs::read_to_string(path).await?;
    let manifest: ExtensionManifest = serde_json::from_str(&content)?;

    if manifest.name.is_empty() {
        return Err(ExtensionError::Manifest("name cannot be empty".to_string()));
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bad_manifest_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mail.json"),
            r#"{"name":"mail","type":"handler","command":"mail-handler --to ops","mutator":"only_check_output","timeout":5}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("tag.json"), r#"{"name":"tag","type":"mutator","command":"jq ."}"#).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(dir.path().join("nameless.json"), r#"{"name":"","type":"handler","command":"true"}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut extensions = Extensions::new();
        let loaded = load_dir(&mut extensions, dir.path()).await.unwrap();

        assert_eq!(loaded, vec!["mail", "tag"]);
        assert_eq!(extensions.handler("mail").unwrap().mutator(), Some("only_check_output"));
        assert!(extensions.mutator("tag").is_some());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let mut extensions = Extensions::new();
        let err = load_dir(&mut extensions, Path::new("/nonexistent/vigil/extensions")).await;
        assert!(matches!(err, Err(ExtensionError::Io(_))));
    }
}
