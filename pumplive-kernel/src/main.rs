/**
 * PUMP LIVE KERNEL - Point d'entrée du service de statistiques de fédération
 *
 * RÔLE : Bootstrap de tous les modules : config, store, registries, updater,
 * callback PuSH et API HTTP.
 *
 * ARCHITECTURE : chemin "pull" (updater périodique) + chemin "push" (callback
 * PuSH signé), tous deux vers le même CounterStore.
 */

mod activity;
mod config;
mod health;
mod hosts;
mod http;
mod models;
mod registry;
mod signature;
mod state;
mod stats;
mod store;
mod subscriber;
mod updater;

use crate::activity::ActivityAggregator;
use crate::config::load_config;
use crate::health::HealthTracker;
use crate::hosts::{HostRegistry, StoreHostRegistry};
use crate::registry::StoreRegistry;
use crate::state::AppState;
use crate::store::{CounterStore, FileStore};
use crate::subscriber::PushSubscriber;
use crate::updater::Updater;

use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pumplive_kernel=info")),
        )
        .init();

    let cfg = load_config().await;

    // store partagé par les deux chemins
    let store: Arc<dyn CounterStore> = match cfg.data_path() {
        Some(path) => Arc::new(
            FileStore::open(path).with_context(|| format!("failed to open store at {path}"))?,
        ),
        None => {
            tracing::warn!("no data_file configured, statistics are kept in memory only");
            Arc::new(FileStore::in_memory())
        }
    };

    let health_tracker = HealthTracker::new();
    let activity = ActivityAggregator::new(store.clone());
    let hosts: Arc<dyn HostRegistry> = Arc::new(
        StoreHostRegistry::new(store.clone(), cfg.updater.request_timeout())
            .context("failed to build HTTP client")?,
    );
    let registry = Arc::new(StoreRegistry::new(store.clone()));

    // chemin pull : polling périodique des hosts
    let updater = Updater::new(
        store.clone(),
        hosts.clone(),
        activity.clone(),
        cfg.updater.clone(),
        health_tracker.clone(),
    );
    updater.start();

    // chemin push : callback PuSH
    let subscriber = PushSubscriber::new(
        registry.clone(),
        registry,
        hosts,
        activity.clone(),
        health_tracker.clone(),
    );

    let app_state = AppState {
        store,
        activity,
        subscriber,
        health_tracker,
    };
    let app = http::build_router(app_state);

    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    tracing::info!(addr = %cfg.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
