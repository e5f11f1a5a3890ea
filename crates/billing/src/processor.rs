//! Compensation task processor
//!
//! Sweeps eligible tasks oldest-first and attempts settlement with the same
//! atomic debit-plus-log transaction the gateway path uses, extended with the
//! task completion update so success is recorded in the same commit.

use serde::Serialize;
use sqlx::PgPool;
use tollgate_shared::TaskId;

use crate::compensation::{CompensationStore, CompensationTask, TaskStatus};
use crate::settlement::SettlementEngine;

/// Outcome of processing one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Debit and log landed, task completed
    Settled,
    /// Attempt failed; task is back to pending or terminally failed
    Failed,
    /// Task was already completed, nothing to do
    AlreadyCompleted,
    /// Task is failed or currently claimed by another sweep
    NotEligible,
    /// No such task
    NotFound,
}

/// Summary of one sweep over pending tasks
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Settles pending compensation tasks
#[derive(Clone)]
pub struct CompensationProcessor {
    pool: PgPool,
    store: CompensationStore,
}

impl CompensationProcessor {
    pub fn new(pool: PgPool) -> Self {
        let store = CompensationStore::new(pool.clone());
        Self { pool, store }
    }

    /// Run one sweep: claim up to `batch_size` eligible tasks and settle them
    pub async fn run_sweep(&self, batch_size: i64) -> Result<SweepReport, sqlx::Error> {
        let tasks = self.store.claim_batch(batch_size).await?;
        if tasks.is_empty() {
            return Ok(SweepReport::default());
        }

        tracing::info!(count = tasks.len(), "processing compensation tasks");

        let mut report = SweepReport::default();
        for task in &tasks {
            report.processed += 1;
            match self.settle_task(task).await {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(task_id = %task.id, error = %e, "task processing error");
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "compensation sweep finished"
        );
        Ok(report)
    }

    /// Manually process a single task, e.g. after an operator reset
    pub async fn process_one(&self, id: TaskId) -> Result<ProcessOutcome, sqlx::Error> {
        let Some(task) = self.store.get(id).await? else {
            return Ok(ProcessOutcome::NotFound);
        };

        // Idempotent skip: a completed task never re-debits, even if a sweep
        // races with manual reprocessing.
        if task.status == TaskStatus::Completed {
            return Ok(ProcessOutcome::AlreadyCompleted);
        }

        let Some(claimed) = self.store.claim_one(id).await? else {
            return Ok(ProcessOutcome::NotEligible);
        };

        match self.settle_task(&claimed).await? {
            true => Ok(ProcessOutcome::Settled),
            false => Ok(ProcessOutcome::Failed),
        }
    }

    /// Attempt settlement for one claimed task
    ///
    /// Returns Ok(true) on settlement, Ok(false) when the task was marked
    /// failed or sent back to pending.
    async fn settle_task(&self, task: &CompensationTask) -> Result<bool, sqlx::Error> {
        // Fast-fail on permanent conditions before taking any lock. These are
        // re-checked authoritatively inside the settle transaction; this read
        // only decides whether attempting is worthwhile.
        let account: Option<(i64, bool)> =
            sqlx::query_as("SELECT balance_cents, is_active FROM caller_accounts WHERE id = $1")
                .bind(task.account_id)
                .fetch_optional(&self.pool)
                .await?;

        let permanent_reason = match account {
            None => Some("caller account not found".to_string()),
            Some((_, false)) => Some("caller account is inactive".to_string()),
            Some((balance_cents, true)) if balance_cents < task.amount_cents => Some(format!(
                "insufficient balance: have {} cents, need {} cents",
                balance_cents, task.amount_cents
            )),
            Some(_) => None,
        };

        if let Some(reason) = permanent_reason {
            self.store.mark_failed(task.id, &reason).await?;
            tracing::warn!(task_id = %task.id, reason = %reason, "compensation task failed");
            return Ok(false);
        }

        let entry = task.audit_entry();
        let attempt = async {
            let mut tx = self.pool.begin().await?;
            SettlementEngine::debit_and_log(&mut tx, task.account_id, task.amount_cents, &entry)
                .await?;
            CompensationStore::complete_in_tx(&mut tx, task.id).await?;
            tx.commit().await?;
            Ok::<(), crate::error::SettlementError>(())
        };

        match attempt.await {
            Ok(()) => {
                tracing::info!(
                    task_id = %task.id,
                    account_id = %task.account_id,
                    amount_cents = task.amount_cents,
                    "compensation task settled"
                );
                Ok(true)
            }
            Err(err) => {
                let status = self.store.record_failure(task.id, &err.to_string()).await?;
                match status {
                    TaskStatus::Failed => tracing::error!(
                        task_id = %task.id,
                        error = %err,
                        "compensation task permanently failed after max retries"
                    ),
                    _ => tracing::warn!(
                        task_id = %task.id,
                        error = %err,
                        "compensation attempt failed, task back to pending"
                    ),
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_completed_task_is_never_recharged() {
        let pool = testutil::pool().await;
        let account_id = testutil::seed_account(&pool, 100).await;
        let binding_id = testutil::seed_binding(&pool, account_id, 10).await;
        let store = CompensationStore::new(pool.clone());
        let task = store
            .create(account_id, binding_id, 10, &testutil::entry(account_id), "lock timeout")
            .await
            .unwrap();
        sqlx::query(
            "UPDATE compensation_tasks SET status = 'completed', completed_at = NOW() WHERE id = $1",
        )
        .bind(task.id)
        .execute(&pool)
        .await
        .unwrap();

        let processor = CompensationProcessor::new(pool.clone());
        let outcome = processor.process_one(task.id).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::AlreadyCompleted);
        assert_eq!(testutil::balance(&pool, account_id).await, 100);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_reset_failed_task_then_settles() {
        let pool = testutil::pool().await;
        let account_id = testutil::seed_account(&pool, 100).await;
        let binding_id = testutil::seed_binding(&pool, account_id, 10).await;
        let store = CompensationStore::new(pool.clone());
        let task = store
            .create(account_id, binding_id, 10, &testutil::entry(account_id), "lock timeout")
            .await
            .unwrap();
        store.mark_failed(task.id, "account inactive").await.unwrap();
        store.reset(task.id).await.unwrap().unwrap();

        let processor = CompensationProcessor::new(pool.clone());
        let outcome = processor.process_one(task.id).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Settled);
        assert_eq!(testutil::balance(&pool, account_id).await, 90);
        let (rows, billed) = testutil::billed_rows(&pool, account_id).await;
        assert_eq!(rows, 1);
        assert_eq!(billed, 10);

        let task = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_sweep_settles_pending_tasks() {
        let pool = testutil::pool().await;
        let account_id = testutil::seed_account(&pool, 100).await;
        let binding_id = testutil::seed_binding(&pool, account_id, 10).await;
        let store = CompensationStore::new(pool.clone());
        let first = store
            .create(account_id, binding_id, 10, &testutil::entry(account_id), "lock timeout")
            .await
            .unwrap();
        let second = store
            .create(account_id, binding_id, 10, &testutil::entry(account_id), "lock timeout")
            .await
            .unwrap();

        let processor = CompensationProcessor::new(pool.clone());
        let report = processor.run_sweep(100).await.unwrap();
        assert!(report.succeeded >= 2);

        assert_eq!(testutil::balance(&pool, account_id).await, 80);
        for id in [first.id, second.id] {
            let task = store.get(id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_sweep_fails_underfunded_task_without_retrying() {
        let pool = testutil::pool().await;
        let account_id = testutil::seed_account(&pool, 5).await;
        let binding_id = testutil::seed_binding(&pool, account_id, 10).await;
        let store = CompensationStore::new(pool.clone());
        let task = store
            .create(account_id, binding_id, 10, &testutil::entry(account_id), "lock timeout")
            .await
            .unwrap();

        let processor = CompensationProcessor::new(pool.clone());
        processor.run_sweep(100).await.unwrap();

        let task = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.as_deref().unwrap().contains("insufficient"));
        assert_eq!(testutil::balance(&pool, account_id).await, 5);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_process_one_unknown_task_is_not_found() {
        let pool = testutil::pool().await;
        let processor = CompensationProcessor::new(pool);
        let outcome = processor.process_one(TaskId::new()).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::NotFound);
    }
}
