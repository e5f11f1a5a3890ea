//! Tollgate Gateway
//!
//! The HTTP surface of the metered gateway: resolves inbound credentials,
//! forwards calls to the configured upstream provider, classifies the outcome
//! for billability, and hands settlement to the billing crate off the
//! caller's critical path. Also hosts the operator endpoints for
//! compensation tasks.

pub mod config;
pub mod error;
pub mod proxy;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
