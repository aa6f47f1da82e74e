//! askgate - question-routing gateway for department knowledge stores.
//!
//! Loads configuration, wires the account directory, stores, external
//! backends and persistence worker together, and serves the HTTP API until
//! Ctrl-C.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use askgate_api::auth::load_or_generate_token;
use askgate_api::{start_server, AppState};
use askgate_chat::{
    AskOrchestrator, ClassifierAdapter, HttpClassifierBackend, HttpRetrievalBackend,
    PersistenceQueue, SessionQueryService,
};
use askgate_core::config::AskgateConfig;
use askgate_storage::{AccountDirectory, AuditLogSink, ConversationStore};

use cli::{resolve_data_dir, CliArgs};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let config_file = args.resolve_config_path();
    let mut config = AskgateConfig::load_or_default(&config_file);
    args.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    info!("Starting askgate v{}", env!("CARGO_PKG_VERSION"));
    info!(path = %config_file.display(), "Configuration loaded");

    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }

    // Storage.
    let accounts = AccountDirectory::load(&data_dir).await?;
    let conversations = Arc::new(ConversationStore::new(&data_dir));
    let audit = Arc::new(AuditLogSink::new(&data_dir));
    let (queue, worker) = PersistenceQueue::start(
        Arc::clone(&conversations),
        audit,
        config.persistence.queue_capacity,
    );
    info!(path = %data_dir.display(), "Storage ready");

    // External services.
    let classifier = ClassifierAdapter::new(Arc::new(HttpClassifierBackend::new(
        &config.classifier,
    )?));
    let retrieval = Arc::new(HttpRetrievalBackend::new(&config.retrieval)?);
    info!(
        classifier = %config.classifier.endpoint,
        retrieval = %config.retrieval.endpoint,
        "External backends configured"
    );

    let orchestrator = AskOrchestrator::new(Arc::new(accounts), classifier, retrieval, queue.clone());
    let sessions = SessionQueryService::new(conversations);
    let api_token = load_or_generate_token(&data_dir.join("api_token"));
    let grace = Duration::from_secs(config.persistence.shutdown_grace_secs);

    let state = AppState::new(config, orchestrator, sessions, api_token);
    start_server(state, shutdown_signal()).await?;

    // Drain queued history and audit writes before exiting.
    if tokio::time::timeout(grace, queue.wait_idle()).await.is_err() {
        warn!(pending = queue.pending(), "Shutdown grace expired with persistence jobs pending");
    }
    drop(queue);
    worker.abort();
    info!("askgate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
