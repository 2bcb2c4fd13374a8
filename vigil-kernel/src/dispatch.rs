/**
 * DISPATCH - Remise des événements aux handlers
 *
 * RÔLE :
 * Reçoit un EventPayload, le sérialise, le passe éventuellement par le
 * mutator du handler, puis exécute le handler. La sortie est loggée ligne
 * par ligne en debug ; le code de retour n'est jamais remonté à l'appelant.
 *
 * FONCTIONNEMENT :
 * - `dispatch` rend la main immédiatement (tokio::spawn)
 * - Un sémaphore borne le nombre d'exécutions simultanées (pool_size)
 * - Handler inconnu -> warn ; mutator inconnu ou en échec -> error ; drop
 */

use crate::extensions::{ExtensionError, ExtensionOutput, Extensions};
use crate::models::EventPayload;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Point de sortie du pipeline ; implémenté par Dispatcher
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, payload: EventPayload);
}

#[derive(Clone)]
pub struct Dispatcher {
    extensions: Arc<Extensions>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(extensions: Arc<Extensions>, pool_size: usize) -> Self {
        Self {
            extensions,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Exécution complète mutator + handler, sans passer par le pool
    pub async fn handle(&self, payload: &EventPayload) -> Result<ExtensionOutput, ExtensionError> {
        let handler_name = payload.check.handler_name();
        let handler = self
            .extensions
            .handler(handler_name)
            .ok_or_else(|| ExtensionError::UnknownHandler(handler_name.to_string()))?;

        let mut data = serde_json::to_string(payload)?;
        if let Some(mutator_name) = handler.mutator() {
            let mutator = self
                .extensions
                .mutator(mutator_name)
                .ok_or_else(|| ExtensionError::UnknownMutator(mutator_name.to_string()))?;
            let mutated = mutator.run(&data).await?;
            if mutated.status != 0 {
                return Err(ExtensionError::InvalidInput(format!(
                    "mutator {mutator_name} exited with status {}",
                    mutated.status
                )));
            }
            data = mutated.output;
        }

        handler.run(&data).await
    }
}

impl Dispatch for Dispatcher {
    fn dispatch(&self, payload: EventPayload) {
        let this = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = this.permits.clone().acquire_owned().await else {
                return;
            };

            let client = payload.client.name.as_str();
            let check = payload.check.name.as_str();
            let handler = payload.check.handler_name();
            match this.handle(&payload).await {
                Ok(out) => {
                    for line in out.output.lines() {
                        tracing::debug!(%client, %check, %handler, "{line}");
                    }
                    tracing::debug!(%client, %check, %handler, status = out.status, action = ?payload.action, "handler finished");
                }
                Err(e @ ExtensionError::UnknownHandler(_)) => {
                    tracing::warn!(%client, %check, error = %e, "event dropped");
                }
                Err(e) => {
                    tracing::error!(%client, %check, %handler, error = %e, "handler failed");
                }
            }
        });
    }
}
