/**
 * VIGIL KERNEL - Point d'entrée du serveur de surveillance
 *
 * RÔLE : Orchestration de tous les modules : config, store, extensions,
 * MQTT, moniteur de keepalive, publication des checks, API HTTP.
 *
 * MODE WORKER : seule l'ingestion tourne (ni keepalive monitor, ni publisher).
 * ARRÊT : ctrl-c -> fin du serveur HTTP, snapshot final du store, sortie
 * sans attendre les dispatchs en cours.
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use vigil_kernel::aggregates::AggregateEngine;
use vigil_kernel::config::load_config;
use vigil_kernel::dispatch::Dispatcher;
use vigil_kernel::extensions::Extensions;
use vigil_kernel::health::HealthTracker;
use vigil_kernel::http::{build_router, AppState};
use vigil_kernel::ingest::ResultIngestor;
use vigil_kernel::keepalive::KeepaliveMonitor;
use vigil_kernel::mqtt::{create_mqtt_client, spawn_mqtt_listener};
use vigil_kernel::publisher::CheckPublisher;
use vigil_kernel::store::{MemoryStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(load_config().await.context("Failed to load kernel configuration")?);
    tracing::info!(worker = cfg.worker, checks = cfg.checks.len(), handlers = cfg.handlers.len(), "configuration loaded");

    let memory = Arc::new(match &cfg.store.snapshot {
        Some(path) => MemoryStore::with_snapshot(path).context("Failed to load store snapshot")?,
        None => MemoryStore::new(),
    });
    let store: Arc<dyn Store> = memory.clone();

    if let Some(secs) = cfg.store.snapshot_interval_secs.filter(|s| *s > 0) {
        let memory = memory.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = memory.save_snapshot().await {
                    tracing::error!(error = %e, "periodic snapshot failed");
                }
            }
        });
    }

    let extensions = Arc::new(Extensions::from_config(&cfg).await);
    tracing::info!(handlers = ?extensions.handler_names(), mutators = ?extensions.mutator_names(), "extensions ready");
    let dispatcher = Arc::new(Dispatcher::new(extensions, cfg.dispatch.pool_size));

    let ingestor = ResultIngestor::new(store.clone(), cfg.clone(), dispatcher);
    let health = HealthTracker::new();

    let (mqtt_client, eventloop) = create_mqtt_client(&cfg.mqtt);
    spawn_mqtt_listener(mqtt_client.clone(), eventloop, ingestor.clone(), health.clone());

    if cfg.worker {
        tracing::info!("worker mode: keepalive monitor and check publisher disabled");
    } else {
        KeepaliveMonitor::new(ingestor.clone(), cfg.keepalive.clone()).start();
        let scheduled = CheckPublisher::new(cfg.clone(), Arc::new(mqtt_client)).start();
        tracing::info!(count = scheduled.len(), "check publisher started");
    }

    let app_state = AppState {
        aggregates: AggregateEngine::new(store.clone()),
        registry: ingestor.registry().clone(),
        health,
        api_key: cfg.api.key.as_deref().map(Arc::from),
        worker: cfg.worker,
    };
    let app = build_router(app_state);

    let listener = TcpListener::bind(&cfg.api.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.api.bind))?;
    tracing::info!(addr = %cfg.api.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await
        .context("HTTP server error")?;

    memory.save_snapshot().await.context("Failed to write final store snapshot")?;
    tracing::info!("kernel stopped");
    Ok(())
}
