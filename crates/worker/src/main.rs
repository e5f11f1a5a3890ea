//! Tollgate background worker
//!
//! Runs the scheduled compensation sweep: every tick it claims a batch of
//! eligible tasks and attempts settlement. The gateway's operator endpoint
//! triggers the identical sweep on demand; this binary only adds the clock.

use anyhow::Context;
use tokio_cron_scheduler::{Job, JobScheduler};
use tollgate_billing::CompensationProcessor;
use tollgate_gateway::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    let pool = tollgate_shared::db::create_pool(
        &config.database_url,
        config.database_max_connections,
    )
    .await
    .context("failed to create database pool")?;

    let processor = CompensationProcessor::new(pool);
    let batch_size = config.sweep_batch_size;

    let scheduler = JobScheduler::new()
        .await
        .context("failed to create scheduler")?;

    let sweep = Job::new_async(config.sweep_schedule.as_str(), move |_id, _scheduler| {
        let processor = processor.clone();
        Box::pin(async move {
            if let Err(e) = processor.run_sweep(batch_size).await {
                tracing::error!(error = %e, "compensation sweep failed");
            }
        })
    })
    .with_context(|| format!("invalid sweep schedule: {}", config.sweep_schedule))?;

    scheduler.add(sweep).await.context("failed to add sweep job")?;
    scheduler.start().await.context("failed to start scheduler")?;

    tracing::info!(schedule = %config.sweep_schedule, "tollgate worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");

    Ok(())
}
