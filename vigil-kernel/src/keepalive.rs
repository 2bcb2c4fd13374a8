/**
 * KEEPALIVE MONITOR - Surveillance de la présence des clients
 *
 * RÔLE :
 * Parcourt périodiquement les clients enregistrés et fabrique un résultat
 * de check "keepalive" à partir de l'âge de leur dernier signe de vie.
 * Ces résultats repassent par l'ingestor comme n'importe quel autre.
 *
 * SEUILS (configurables) :
 * - âge >= critical (180s)  -> statut 2
 * - âge >= warning  (120s)  -> statut 1
 * - sinon statut 0, seulement si un événement keepalive est ouvert
 */

use crate::config::KeepaliveConf;
use crate::ingest::ResultIngestor;
use crate::models::{now_unix, Check, CheckResult, Client, STATUS_CRITICAL, STATUS_OK, STATUS_WARNING};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

pub const KEEPALIVE_CHECK: &str = "keepalive";

#[derive(Clone)]
pub struct KeepaliveMonitor {
    ingestor: ResultIngestor,
    conf: KeepaliveConf,
}

impl KeepaliveMonitor {
    pub fn new(ingestor: ResultIngestor, conf: KeepaliveConf) -> Self {
        Self { ingestor, conf }
    }

    /// Statut et sortie pour un âge donné, None si tout va bien
    fn verdict(&self, elapsed: i64) -> Option<(i64, String)> {
        if elapsed >= self.conf.critical_secs {
            Some((
                STATUS_CRITICAL,
                format!("No keep-alive sent from host in over {} seconds", self.conf.critical_secs),
            ))
        } else if elapsed >= self.conf.warning_secs {
            Some((
                STATUS_WARNING,
                format!("No keep-alive sent from host in over {} seconds", self.conf.warning_secs),
            ))
        } else {
            None
        }
    }

    async fn check_client(&self, client: &Client, now: i64) -> Result<bool, crate::ingest::PipelineError> {
        let (status, output) = match self.verdict(now - client.timestamp) {
            Some(verdict) => verdict,
            None => {
                let open = self
                    .ingestor
                    .lifecycle()
                    .events()
                    .exists(&client.name, KEEPALIVE_CHECK)
                    .await?;
                if !open {
                    return Ok(false);
                }
                (STATUS_OK, "Keep-alive sent from host".to_string())
            }
        };

        let mut check = Check::new(KEEPALIVE_CHECK, status, &output, now);
        check.executed = Some(now);
        self.ingestor
            .process_result(CheckResult { client: client.name.clone(), check })
            .await?;
        Ok(true)
    }

    /// Un passage complet ; retourne le nombre de résultats synthétisés
    pub async fn sweep(&self, now: i64) -> usize {
        let clients = match self.ingestor.registry().list_clients().await {
            Ok(clients) => clients,
            Err(e) => {
                tracing::error!(error = %e, "keepalive sweep could not list clients");
                return 0;
            }
        };

        let mut synthesized = 0;
        for client in &clients {
            match self.check_client(client, now).await {
                Ok(true) => synthesized += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(client = %client.name, error = %e, "keepalive check failed"),
            }
        }
        synthesized
    }

    /// Démarre la surveillance périodique ; premier passage après une période
    pub fn start(self) -> JoinHandle<()> {
        let period = Duration::from_secs(self.conf.interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let count = self.sweep(now_unix()).await;
                if count > 0 {
                    tracing::debug!(count, "keepalive results synthesized");
                }
            }
        })
    }
}
