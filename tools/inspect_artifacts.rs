//! Artifact Inspector
//!
//! Loads the configured dataset and model, prints the category universe and
//! scores a few randomly drawn dataset rows.

use removal_efficiency_predictor::{
    config::AppConfig,
    form::random_fill,
    metrics::ServiceMetrics,
    models::loader::{ArtifactCache, FileArtifacts},
    server::AppState,
    session::SessionStore,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("inspect_artifacts=info".parse()?)
                .add_directive("removal_efficiency_predictor=info".parse()?),
        )
        .init();

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let config_path = args.get(1).map(|s| s.as_str()).unwrap_or("config/config.toml");
    let samples: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(5);

    let config = AppConfig::load_from_path(config_path)?;
    let artifacts = ArtifactCache::new(FileArtifacts::new(config.artifacts.clone()));
    let dataset = artifacts.dataset().await?;
    let model = artifacts.model().await?;

    let metrics = Arc::new(ServiceMetrics::new());
    let state = AppState::build(dataset, model, Arc::new(SessionStore::new(60)), metrics.clone())?;
    let schema = state.predictor.schema();
    let universe = state.predictor.engine().encoder().universe();

    println!("Dataset: {} rows, target {:?}", state.dataset.len(), state.dataset.target_column());
    println!("Model:   {}", state.predictor.engine().model_name());
    println!();
    for spec in schema.categorical() {
        let categories = universe.categories(&spec.name).unwrap_or_default();
        println!("{} ({} categories)", spec.name, categories.len());
        for (code, category) in categories.iter().enumerate() {
            println!("  {:>3}  {}", code, category);
        }
    }
    println!();
    println!(
        "Numeric: {}",
        schema
            .numeric()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    let mut rng = rand::thread_rng();
    for i in 0..samples {
        let Some(record) = random_fill(&state.dataset, schema, &mut rng) else {
            warn!("Dataset has no rows to sample");
            break;
        };
        match state.predictor.predict(&record) {
            Ok(prediction) => println!("#{:<3} {}", i + 1, prediction.formatted()),
            Err(e) => println!("#{:<3} {}", i + 1, e),
        }
        for (name, value) in record.iter() {
            println!("       {} = {}", name, value);
        }
    }

    let s = metrics.snapshot();
    info!(
        predictions = s.predictions,
        rejected = s.validation_rejections,
        mean_us = s.latency.mean_us,
        "Inspection complete"
    );
    Ok(())
}
