/**
 * PIPE EXTENSION - Commande externe recevant les données sur stdin
 *
 * La commande est découpée façon shell (quotes respectées) puis lancée sans
 * shell intermédiaire. stdout et stderr sont capturés ensemble ; le code de
 * sortie est remonté tel quel. Au-delà du timeout le processus est tué.
 */

use super::{Extension, ExtensionError, ExtensionOutput};
use crate::config::HandlerDefinition;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct PipeExtension {
    name: String,
    command: String,
    argv: Vec<String>,
    mutator: Option<String>,
    timeout: Option<u64>,
}

impl PipeExtension {
    pub fn new(name: &str, command: &str) -> Result<Self, ExtensionError> {
        let argv = shell_words::split(command).map_err(|e| ExtensionError::BadCommand {
            command: command.to_string(),
            reason: e.to_string(),
        })?;
        if argv.is_empty() {
            return Err(ExtensionError::BadCommand {
                command: command.to_string(),
                reason: "empty command".into(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            command: command.to_string(),
            argv,
            mutator: None,
            timeout: None,
        })
    }

    pub fn from_definition(name: &str, def: &HandlerDefinition) -> Result<Self, ExtensionError> {
        Ok(Self::new(name, &def.command)?
            .with_mutator(def.mutator.clone())
            .with_timeout(def.timeout_secs))
    }

    pub fn with_mutator(mut self, mutator: Option<String>) -> Self {
        self.mutator = mutator;
        self
    }

    pub fn with_timeout(mut self, secs: Option<u64>) -> Self {
        self.timeout = secs;
        self
    }

    async fn execute(&self, data: &str) -> Result<ExtensionOutput, ExtensionError> {
        let program = &self.argv[0];
        let mut child = Command::new(program)
            .args(&self.argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtensionError::Spawn { program: program.clone(), source })?;

        // stdin écrit pendant la lecture de stdout/stderr : une commande qui écrit
        // avant d'avoir tout lu ne remplit jamais le pipe
        let stdin = child.stdin.take();
        let feed = async {
            if let Some(mut stdin) = stdin {
                // Une commande qui ne lit pas stdin ferme le pipe : ce n'est pas une erreur
                if let Err(e) = stdin.write_all(data.as_bytes()).await {
                    tracing::debug!(extension = %self.name, error = %e, "stdin not fully consumed");
                }
            }
        };
        let ((), out) = tokio::join!(feed, child.wait_with_output());
        let out = out?;
        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(ExtensionOutput {
            output,
            status: out.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl Extension for PipeExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.command
    }

    fn mutator(&self) -> Option<&str> {
        self.mutator.as_deref()
    }

    async fn run(&self, data: &str) -> Result<ExtensionOutput, ExtensionError> {
        match self.timeout {
            // le futur abandonné drop le Child, kill_on_drop termine le processus
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), self.execute(data))
                .await
                .map_err(|_| ExtensionError::Timeout(secs))?,
            None => self.execute(data).await,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_data_is_piped_to_stdin() {
        let cat = PipeExtension::new("cat", "cat").unwrap();
        let out = cat.run("{\"a\":1}").await.unwrap();
        assert_eq!(out, ExtensionOutput::ok("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_large_output_before_reading_input() {
        // écrit bien plus qu'un buffer de pipe avant de lire stdin
        let ext = PipeExtension::new("chatty", "sh -c 'head -c 200000 /dev/zero; cat > /dev/null'")
            .unwrap()
            .with_timeout(Some(10));
        let data = "x".repeat(200_000);
        let out = ext.run(&data).await.unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(out.output.len(), 200_000);
    }

    #[tokio::test]
    async fn test_exit_status_and_stderr_are_captured() {
        let ext = PipeExtension::new("failing", "sh -c 'echo out; echo err >&2; exit 3'").unwrap();
        let out = ext.run("").await.unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.output, "out\nerr\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_the_command() {
        let ext = PipeExtension::new("slow", "sleep 5").unwrap().with_timeout(Some(1));
        let started = std::time::Instant::now();
        let err = ext.run("").await.unwrap_err();
        assert!(matches!(err, ExtensionError::Timeout(1)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let ext = PipeExtension::new("ghost", "/nonexistent/vigil-handler --flag").unwrap();
        assert!(matches!(ext.run("").await, Err(ExtensionError::Spawn { .. })));
    }

    #[test]
    fn test_invalid_commands_are_rejected() {
        assert!(matches!(PipeExtension::new("x", "   "), Err(ExtensionError::BadCommand { .. })));
        assert!(matches!(PipeExtension::new("x", "echo 'open"), Err(ExtensionError::BadCommand { .. })));
    }
}
