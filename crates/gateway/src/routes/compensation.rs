//! Operator endpoints for compensation tasks
//!
//! Inspection and recovery controls for charges the hot path could not
//! settle. These sit behind the operator surface, not the caller-facing
//! proxy; nothing here is reachable with a caller API key.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tollgate_billing::{CompensationTask, ProcessOutcome, SweepReport, TaskStatus};
use tollgate_shared::TaskId;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub tasks: Vec<CompensationTask>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// List compensation tasks, newest first
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let (tasks, total) = state.compensation.list(query.status, limit, offset).await?;

    Ok(Json(ListResponse {
        tasks,
        total,
        limit,
        offset,
    }))
}

/// Fetch one task with its embedded audit payload
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<CompensationTask>, ApiError> {
    let task = state
        .compensation
        .get(task_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(task))
}

/// Reset a failed task back to pending
///
/// 404 covers both a missing task and one not in `failed`; the distinction
/// does not matter to the operator tooling, which re-lists afterwards.
pub async fn reset_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<CompensationTask>, ApiError> {
    let task = state
        .compensation
        .reset(task_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    tracing::info!(task_id = %task.id, "compensation task reset to pending");
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct BatchResetRequest {
    pub task_ids: Vec<TaskId>,
}

#[derive(Serialize)]
pub struct BatchResetResponse {
    pub reset: u64,
}

/// Reset a batch of failed tasks back to pending
pub async fn batch_reset(
    State(state): State<AppState>,
    Json(request): Json<BatchResetRequest>,
) -> Result<Json<BatchResetResponse>, ApiError> {
    if request.task_ids.is_empty() {
        return Err(ApiError::BadRequest("task_ids must not be empty".to_string()));
    }

    let reset = state.compensation.reset_batch(&request.task_ids).await?;
    tracing::info!(requested = request.task_ids.len(), reset, "batch reset");

    Ok(Json(BatchResetResponse { reset }))
}

#[derive(Serialize)]
pub struct ProcessResponse {
    pub outcome: ProcessOutcome,
}

/// Attempt settlement of a single task immediately
pub async fn process_task(
    State(state): State<AppState>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let outcome = state.processor.process_one(task_id).await?;

    if outcome == ProcessOutcome::NotFound {
        return Err(ApiError::NotFound);
    }

    Ok(Json(ProcessResponse { outcome }))
}

/// Run one sweep over eligible tasks, same as the scheduled worker does
pub async fn process_pending(
    State(state): State<AppState>,
) -> Result<Json<SweepReport>, ApiError> {
    let report = state
        .processor
        .run_sweep(state.config.sweep_batch_size)
        .await?;

    Ok(Json(report))
}
