/**
 * API REST VIGIL - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose le moteur d'agrégats et l'état du kernel.
 *
 * ROUTES :
 * - GET    /health                                  -> "ok" (toujours accessible)
 * - GET    /info                                    -> KernelHealth
 * - GET    /aggregates                              -> [{name}]
 * - GET    /aggregates/{name}?max_age=N             -> résumé
 * - DELETE /aggregates/{name}                       -> 204
 * - GET    /aggregates/{name}/clients               -> [{name, checks}]
 * - GET    /aggregates/{name}/checks                -> [{name, clients}]
 * - GET    /aggregates/{name}/results/{severity}    -> [{check, summary}]
 *
 * SÉCURITÉ :
 * Si api.key est configurée, header x-api-key obligatoire sauf /health.
 */

use crate::aggregates::{
    AggregateEngine, AggregateError, AggregateName, AggregateSummary, CheckBreakdown, CheckClients, ClientChecks,
};
use crate::health::{HealthTracker, KernelHealth};
use crate::models::now_unix;
use crate::registry::ClientRegistry;
use crate::store::StoreError;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub aggregates: AggregateEngine,
    pub registry: ClientRegistry,
    pub health: HealthTracker,
    pub api_key: Option<Arc<str>>,
    pub worker: bool,
}

/// Erreurs de /info, propres à l'état du kernel
#[derive(Debug, thiserror::Error)]
pub enum InfoError {
    #[error("Client registry unavailable: {0}")]
    Registry(#[from] StoreError),
}

impl IntoResponse for InfoError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "kernel info query failed");
        (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AgeParams {
    /// Secondes ; une valeur non entière est ignorée
    #[serde(default, deserialize_with = "lenient_i64")]
    max_age: Option<i64>,
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()))
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);
    if !ok {
        tracing::warn!(path = %req.uri().path(), "rejected request without valid API key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/info", get(get_info))
        .route("/aggregates", get(list_aggregates))
        .route("/aggregates/{name}", get(get_aggregate).delete(delete_aggregate))
        .route("/aggregates/{name}/clients", get(get_aggregate_clients))
        .route("/aggregates/{name}/checks", get(get_aggregate_checks))
        .route("/aggregates/{name}/results/{severity}", get(get_aggregate_results))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /info
async fn get_info(State(app): State<AppState>) -> Result<Json<KernelHealth>, InfoError> {
    let clients = app.registry.client_names().await?.len();
    Ok(Json(app.health.get_health(clients, app.worker)))
}

async fn list_aggregates(State(app): State<AppState>) -> Result<Json<Vec<AggregateName>>, AggregateError> {
    Ok(Json(app.aggregates.list().await?))
}

async fn get_aggregate(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<AgeParams>,
) -> Result<Json<AggregateSummary>, AggregateError> {
    Ok(Json(app.aggregates.summarize(&name, params.max_age, now_unix()).await?))
}

async fn delete_aggregate(State(app): State<AppState>, Path(name): Path<String>) -> Result<StatusCode, AggregateError> {
    app.aggregates.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_aggregate_clients(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ClientChecks>>, AggregateError> {
    Ok(Json(app.aggregates.clients(&name).await?))
}

async fn get_aggregate_checks(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<CheckClients>>, AggregateError> {
    Ok(Json(app.aggregates.checks(&name).await?))
}

async fn get_aggregate_results(
    State(app): State<AppState>,
    Path((name, severity)): Path<(String, String)>,
    Query(params): Query<AgeParams>,
) -> Result<Json<Vec<CheckBreakdown>>, AggregateError> {
    Ok(Json(
        app.aggregates
            .results_by_severity(&name, &severity, params.max_age, now_unix())
            .await?,
    ))
}
