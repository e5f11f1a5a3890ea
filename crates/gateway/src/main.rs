//! Tollgate gateway server

use anyhow::Context;
use tollgate_gateway::{routes, AppState, Config};
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

    // Migrations run on a dedicated single-connection pool before the
    // serving pool opens.
    let migration_pool = tollgate_shared::db::create_migration_pool(&config.database_url)
        .await
        .context("failed to connect for migrations")?;
    tollgate_shared::db::run_migrations(&migration_pool)
        .await
        .context("failed to run migrations")?;
    migration_pool.close().await;

    let pool = tollgate_shared::db::create_pool(
        &config.database_url,
        config.database_max_connections,
    )
    .await
    .context("failed to create database pool")?;

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config, pool).context("failed to build application state")?;

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(address = %bind_address, "tollgate gateway listening");

    axum::serve(listener, routes::create_router(state))
        .await
        .context("server error")?;

    Ok(())
}
