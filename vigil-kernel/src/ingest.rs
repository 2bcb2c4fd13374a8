/**
 * INGEST - Point d'entrée des résultats de checks
 *
 * RÔLE :
 * Chaque résultat (publié par un agent ou synthétisé par le moniteur de
 * keepalive) passe ici : rattachement au client, fusion avec la définition
 * statique du check, persistance du dernier résultat, puis aiguillage.
 *
 * AIGUILLAGE :
 * - client inconnu      -> ignoré (debug)
 * - type "metric"       -> dispatch direct, ni historique ni événement
 * - sinon               -> LifecycleManager, dispatch si un événement en sort
 */

use crate::config::{CheckDefinition, KernelConfig};
use crate::dispatch::Dispatch;
use crate::events::LifecycleManager;
use crate::models::{Check, CheckResult, CheckType, EventAction, EventPayload};
use crate::registry::ClientRegistry;
use crate::store::{result_key, Store, StoreError};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ce qu'il est advenu d'un résultat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    UnknownClient,
    Recorded,
    Dispatched(EventAction),
}

#[derive(Clone)]
pub struct ResultIngestor {
    store: Arc<dyn Store>,
    registry: ClientRegistry,
    lifecycle: LifecycleManager,
    config: Arc<KernelConfig>,
    dispatcher: Arc<dyn Dispatch>,
}

impl ResultIngestor {
    pub fn new(store: Arc<dyn Store>, config: Arc<KernelConfig>, dispatcher: Arc<dyn Dispatch>) -> Self {
        Self {
            registry: ClientRegistry::new(store.clone()),
            lifecycle: LifecycleManager::new(store.clone()),
            store,
            config,
            dispatcher,
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub async fn process_result(&self, result: CheckResult) -> Result<IngestOutcome, PipelineError> {
        let Some(client) = self.registry.get_client(&result.client).await? else {
            tracing::debug!(client = %result.client, check = %result.check.name, "result from unregistered client dropped");
            return Ok(IngestOutcome::UnknownClient);
        };

        let mut check = match self.config.check(&result.check.name) {
            Some(def) => merge_definition(result.check, def)?,
            None => result.check,
        };
        if check.handler.is_none() {
            check.handler = Some("default".into());
        }

        self.store
            .set(&result_key(&client.name, &check.name), serde_json::to_string(&check)?)
            .await?;

        if check.check_type == CheckType::Metric {
            self.dispatcher
                .dispatch(EventPayload::new(client, check, 1, EventAction::Create));
            return Ok(IngestOutcome::Dispatched(EventAction::Create));
        }

        match self.lifecycle.process(&client, check).await? {
            Some(payload) => {
                let action = payload.action;
                self.dispatcher.dispatch(payload);
                Ok(IngestOutcome::Dispatched(action))
            }
            None => Ok(IngestOutcome::Recorded),
        }
    }
}

/// Les champs définis par la configuration écrasent ceux du résultat
fn merge_definition(check: Check, def: &CheckDefinition) -> Result<Check, serde_json::Error> {
    let mut merged = serde_json::to_value(check)?;
    if let (Value::Object(base), Value::Object(overlay)) = (&mut merged, serde_json::to_value(def)?) {
        base.extend(overlay);
    }
    serde_json::from_value(merged)
}
