//! Removal Efficiency Predictor - Main Entry Point
//!
//! Loads the reference dataset and the trained model, then serves the
//! prediction form over HTTP until interrupted.

use anyhow::{Context, Result};
use removal_efficiency_predictor::{
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, ServiceMetrics},
    models::loader::{ArtifactCache, FileArtifacts},
    server::{self, AppState},
    session::{SessionStore, SessionSweeper},
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "removal_efficiency_predictor={}",
            logging.level
        ))
    })?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration comes first so it can choose the log format
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Removal Efficiency Predictor");
    info!(
        dataset = %config.artifacts.dataset_path,
        model = %config.artifacts.model_path,
        kind = ?config.artifacts.model_kind,
        "Configuration loaded successfully"
    );

    // Artifacts are read once and shared by every session
    let artifacts = ArtifactCache::new(FileArtifacts::new(config.artifacts.clone()));
    let dataset = artifacts
        .dataset()
        .await
        .context("Failed to load reference dataset")?;
    let model = artifacts.model().await.context("Failed to load model")?;

    let metrics = Arc::new(ServiceMetrics::new());
    let sessions = Arc::new(SessionStore::new(config.session.ttl_secs));
    let state = AppState::build(dataset, model, sessions.clone(), metrics.clone())?;
    info!(
        features = state.predictor.schema().feature_count(),
        rows = state.dataset.len(),
        "Predictor initialized"
    );

    tokio::spawn(SessionSweeper::new(sessions, config.session.sweep_interval_secs).start());

    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    server::serve(&config.server.bind, state).await?;

    info!("Predictor shutting down...");
    metrics.print_summary();

    Ok(())
}
