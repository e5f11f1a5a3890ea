//! HTTP routes

pub mod compensation;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::proxy;
use crate::state::AppState;

/// Create all routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Operator API under /api/v1
    let operator_routes = Router::new()
        .route("/compensation-tasks", get(compensation::list_tasks))
        .route("/compensation-tasks/process", post(compensation::process_pending))
        .route("/compensation-tasks/batch-reset", post(compensation::batch_reset))
        .route("/compensation-tasks/:task_id", get(compensation::get_task))
        .route("/compensation-tasks/:task_id/reset", post(compensation::reset_task))
        .route("/compensation-tasks/:task_id/process", post(compensation::process_task));

    // The metered proxy: any method, any sub-path, API key auth inside the
    // handler. Body size is enforced again in the handler when buffering.
    let proxy_routes = Router::new()
        .route("/gateway/*path", any(proxy::handler))
        .layer(DefaultBodyLimit::max(state.config.max_request_body_bytes));

    Router::new()
        .merge(health_routes)
        .merge(proxy_routes)
        .nest("/api/v1", operator_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
