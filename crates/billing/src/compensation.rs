//! Compensation task store
//!
//! A compensation task is the durable backstop for a charge that could not be
//! settled on the immediate or retry path: the upstream provider already
//! delivered value, so the debit must eventually happen or an operator must
//! be left an auditable reason why it never will. Tasks embed the full audit
//! payload so later settlement needs nothing from the original request.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tollgate_shared::{AccountId, BindingId, TaskId};

use crate::audit::AuditEntry;

/// Default retry ceiling for a task before it goes terminally failed
const DEFAULT_MAX_RETRIES: i32 = 3;

/// Compensation task state machine
///
/// `pending → processing → completed` on success, `pending → failed` once
/// `retry_count` reaches `max_retries` or a permanent condition is detected,
/// and `failed → pending` only via explicit operator reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One durable settlement-recovery record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CompensationTask {
    pub id: TaskId,
    pub account_id: AccountId,
    pub binding_id: BindingId,
    pub amount_cents: i64,
    pub status: TaskStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    // Embedded audit payload, written back as the log row on settlement
    pub provider: String,
    pub request_api: String,
    pub request_body: String,
    pub response_body: String,
    pub display_response_body: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl CompensationTask {
    /// Rebuild the audit entry this task was created from
    pub fn audit_entry(&self) -> AuditEntry {
        AuditEntry {
            account_id: self.account_id,
            provider: self.provider.clone(),
            request_api: self.request_api.clone(),
            request_body: self.request_body.clone(),
            response_body: self.response_body.clone(),
            display_response_body: self.display_response_body.clone(),
        }
    }
}

/// Persistence layer for compensation tasks
#[derive(Clone)]
pub struct CompensationStore {
    pool: PgPool,
}

impl CompensationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a task for a charge that could not be settled
    ///
    /// A plain insert: the single point this must not fail at is exactly the
    /// point where nothing can handle the failure, which is why callers treat
    /// it as fire-and-forget and only log errors.
    pub async fn create(
        &self,
        account_id: AccountId,
        binding_id: BindingId,
        amount_cents: i64,
        entry: &AuditEntry,
        error_message: &str,
    ) -> Result<CompensationTask, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO compensation_tasks (
                id, account_id, binding_id, amount_cents, status,
                retry_count, max_retries, error_message,
                provider, request_api, request_body, response_body,
                display_response_body
            ) VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(TaskId::new())
        .bind(account_id)
        .bind(binding_id)
        .bind(amount_cents)
        .bind(DEFAULT_MAX_RETRIES)
        .bind(error_message)
        .bind(&entry.provider)
        .bind(&entry.request_api)
        .bind(&entry.request_body)
        .bind(&entry.response_body)
        .bind(&entry.display_response_body)
        .fetch_one(&self.pool)
        .await
    }

    /// Count tasks in one status, used for backlog reporting
    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM compensation_tasks WHERE status = $1")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<CompensationTask>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM compensation_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// List tasks, optionally filtered by status, newest first
    ///
    /// Returns the page and the total matching count for pagination.
    pub async fn list(
        &self,
        status: Option<TaskStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<CompensationTask>, i64), sqlx::Error> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM compensation_tasks WHERE ($1::task_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let tasks = sqlx::query_as(
            r#"
            SELECT * FROM compensation_tasks
            WHERE ($1::task_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((tasks, total))
    }

    /// Operator reset of one failed task back to pending
    ///
    /// Clears `retry_count` and `error_message`; only valid from `failed`, so
    /// a task that completed in the meantime is left alone.
    pub async fn reset(&self, id: TaskId) -> Result<Option<CompensationTask>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE compensation_tasks
            SET status = 'pending', retry_count = 0, error_message = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Batch variant of [`reset`](Self::reset); returns how many were reset
    pub async fn reset_batch(&self, ids: &[TaskId]) -> Result<u64, sqlx::Error> {
        let ids: Vec<uuid::Uuid> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            r#"
            UPDATE compensation_tasks
            SET status = 'pending', retry_count = 0, error_message = NULL, updated_at = NOW()
            WHERE id = ANY($1) AND status = 'failed'
            "#,
        )
        .bind(&ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim a batch of eligible tasks for processing, oldest first
    ///
    /// SKIP LOCKED plus the status flip to `processing` means concurrent
    /// sweeps never pick up the same task, so a task's `retry_count` moves at
    /// most once per attempt. Tasks stuck in `processing` past the stale
    /// window (a crashed sweep) are reclaimed.
    pub async fn claim_batch(&self, limit: i64) -> Result<Vec<CompensationTask>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE compensation_tasks
            SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM compensation_tasks
                WHERE (status = 'pending' AND retry_count < max_retries)
                   OR (status = 'processing' AND updated_at < NOW() - INTERVAL '10 minutes')
                ORDER BY created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Claim a single pending task for manual reprocessing
    pub async fn claim_one(&self, id: TaskId) -> Result<Option<CompensationTask>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE compensation_tasks
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND retry_count < max_retries
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Record a failed settlement attempt
    ///
    /// Increments `retry_count`; the task goes terminally `failed` once the
    /// ceiling is reached, otherwise back to `pending` for the next sweep.
    /// Returns the resulting status.
    pub async fn record_failure(
        &self,
        id: TaskId,
        error_message: &str,
    ) -> Result<TaskStatus, sqlx::Error> {
        let (status,): (TaskStatus,) = sqlx::query_as(
            r#"
            UPDATE compensation_tasks
            SET retry_count = retry_count + 1,
                status = CASE
                    WHEN retry_count + 1 >= max_retries THEN 'failed'::task_status
                    ELSE 'pending'::task_status
                END,
                error_message = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING status
            "#,
        )
        .bind(id)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await?;

        Ok(status)
    }

    /// Mark a task terminally failed for a permanent condition
    ///
    /// Used when retrying is pointless (inactive account, insufficient
    /// balance); the reason stays on the row for the operator.
    pub async fn mark_failed(&self, id: TaskId, reason: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE compensation_tasks
            SET status = 'failed', error_message = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark a task completed inside the settlement transaction
    ///
    /// Riding the same commit as the debit and log row is what makes
    /// completion exactly-once: either all three land or none do.
    pub(crate) async fn complete_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: TaskId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE compensation_tasks
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
