use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use hadir_core::{EmbeddingStore, RosterMatcher};

mod config;
mod engine;
mod http;
mod ledger;
mod session;

use config::Config;
use http::AppState;
use ledger::Ledger;
use session::SessionCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("hadird starting");
    let config = Config::from_env();

    let ledger = Arc::new(Ledger::open(&config.db_path).await?);
    let swept = ledger.close_dangling_sessions(Utc::now()).await?;
    if swept > 0 {
        tracing::warn!(count = swept, "closed sessions left open by a previous run");
    }

    let store = Arc::new(EmbeddingStore::new(&config.snapshot_path));
    match store.load() {
        Ok(report) => {
            tracing::info!(
                loaded = report.loaded,
                skipped = report.skipped,
                "master embeddings loaded"
            );
        }
        Err(err) => {
            tracing::warn!(
                error = %err,
                path = %config.snapshot_path.display(),
                "no master embeddings loaded; build a roster snapshot and POST /api/reload_embeddings"
            );
        }
    }

    let engine = engine::spawn_engine(
        &config.detector_model_path(),
        &config.embedder_model_path(),
    )?;

    let coordinator = Arc::new(SessionCoordinator::new(ledger.clone()));
    let state = AppState {
        coordinator,
        store,
        engine,
        matcher: RosterMatcher::new(config.similarity_threshold),
        ledger,
    };

    let app = http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %config.bind, "hadird listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("hadird shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
