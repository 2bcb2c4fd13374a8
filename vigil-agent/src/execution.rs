//! Exécution d'un check demandé par le kernel.
//!
//! Le statut est le code de sortie de la commande. Une commande impossible à
//! lancer donne 3 (unknown) avec l'erreur en sortie ; au-delà du timeout le
//! processus est tué et le statut vaut 2.

use crate::config::CheckCommand;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

pub const STATUS_CRITICAL: i64 = 2;
pub const STATUS_UNKNOWN: i64 = 3;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckOutput {
    pub name: String,
    pub issued: i64,
    pub executed: i64,
    pub output: String,
    pub status: i64,
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub async fn run_check(name: &str, issued: i64, def: &CheckCommand) -> CheckOutput {
    let executed = now_unix();
    let (status, output) = execute(def).await;
    CheckOutput { name: name.to_string(), issued, executed, output, status }
}

async fn execute(def: &CheckCommand) -> (i64, String) {
    let argv = match shell_words::split(&def.command) {
        Ok(argv) if !argv.is_empty() => argv,
        Ok(_) => return (STATUS_UNKNOWN, "empty command".to_string()),
        Err(e) => return (STATUS_UNKNOWN, format!("invalid command: {e}")),
    };

    let child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let child = match child {
        Ok(child) => child,
        Err(e) => return (STATUS_UNKNOWN, format!("{}: {e}", argv[0])),
    };

    let waited = match def.timeout {
        Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => return (STATUS_CRITICAL, "Execution timed out".to_string()),
        },
        None => child.wait_with_output().await,
    };

    match waited {
        Ok(out) => {
            let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&out.stderr));
            (out.status.code().map(i64::from).unwrap_or(STATUS_UNKNOWN), output)
        }
        Err(e) => (STATUS_UNKNOWN, e.to_string()),
    }
}
