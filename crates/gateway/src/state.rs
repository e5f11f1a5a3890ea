//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tollgate_billing::{
    CompensationProcessor, CompensationStore, RetryPolicy, SettlementEngine,
};

use crate::config::Config;
use crate::proxy::classifier::{FieldHeuristic, OutcomePolicy};

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub settlement: SettlementEngine,
    pub compensation: CompensationStore,
    pub processor: CompensationProcessor,
    pub retry: RetryPolicy,
    /// Billability strategy; the field-sniffing default until providers need
    /// their own.
    pub outcome: Arc<dyn OutcomePolicy>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.upstream_timeout_ms))
            .build()?;

        Ok(Self {
            settlement: SettlementEngine::new(pool.clone()),
            compensation: CompensationStore::new(pool.clone()),
            processor: CompensationProcessor::new(pool.clone()),
            retry: RetryPolicy::default(),
            outcome: Arc::new(FieldHeuristic),
            config: Arc::new(config),
            http,
            pool,
        })
    }
}
