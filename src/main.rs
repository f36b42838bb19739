use std::sync::Arc;

use affinity_service::jobs::{AggregateRefreshJob, NeighborRefreshJob, RefreshConfig};
use affinity_service::{Config, PgEventStore, ScoringParams};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;

    info!(
        service = %config.service.service_name,
        window_days = config.pipeline.window_days,
        run_once = config.pipeline.run_once,
        "Starting refresh pipeline"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;

    let store: Arc<dyn affinity_service::EventStore> = Arc::new(PgEventStore::new(pool));
    let params = ScoringParams::default();
    params.validate()?;
    let refresh_config = RefreshConfig::from_pipeline(&config.pipeline);

    let aggregate_job =
        AggregateRefreshJob::new(refresh_config.clone(), store.clone(), params.clone());
    let neighbor_job = NeighborRefreshJob::new(refresh_config.clone(), store.clone(), params);

    if config.pipeline.run_once {
        aggregate_job.run().await?;
        neighbor_job.run().await?;
        return Ok(());
    }

    // Looping mode: run both refresh cycles concurrently on their own
    // intervals. Either job erroring out stops the process.
    let aggregate_handle = tokio::spawn(async move { aggregate_job.run().await });
    let neighbor_handle = tokio::spawn(async move { neighbor_job.run().await });
    let (aggregate_result, neighbor_result) = tokio::try_join!(aggregate_handle, neighbor_handle)?;
    aggregate_result?;
    neighbor_result?;

    Ok(())
}
