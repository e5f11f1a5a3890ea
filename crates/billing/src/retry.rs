//! Bounded retry for transient settlement failures
//!
//! Runs detached from the caller's request cycle: by the time anything here
//! executes, the upstream call has succeeded and the caller already has its
//! response. Billing failure must never change what was returned, so this
//! path only ever degrades to a compensation task, never to an HTTP error.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tollgate_shared::BindingId;

use crate::audit::AuditEntry;
use crate::compensation::CompensationStore;
use crate::error::SettlementResult;
use crate::settlement::SettlementEngine;

/// Backoff policy for settlement retries
///
/// `attempts` is the size of the retry loop; its first attempt fires with no
/// delay, later ones after doubling backoff from `base_delay` up to
/// `max_delay`. The settle path runs one immediate attempt before entering
/// the loop, so the default of 3 means four settle attempts in total for a
/// persistently transient failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Doubling backoff starting at `base_delay`, capped at `max_delay`
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        // from_millis(2) doubles per step; the factor scales the first delay
        // up to base_delay.
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(self.attempts.saturating_sub(1))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// Transient errors trigger another attempt after backoff; permanent
    /// errors are returned immediately. Generic over the operation so the
    /// policy can be exercised against fakes without a database.
    pub async fn retry_transient<F, Fut>(&self, op: F) -> SettlementResult<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SettlementResult<()>>,
    {
        let op = &op;
        Retry::spawn(self.backoff(), || async move {
            let result = op().await;
            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "transient settlement error, will retry");
                    Err(result)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "permanent settlement error, not retrying");
                    Ok(result)
                }
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }

    /// One immediate attempt, then the full retry loop on a transient failure
    ///
    /// Success and permanent failures return straight away; only a transient
    /// failure enters [`retry_transient`](Self::retry_transient), whose first
    /// attempt fires without delay.
    pub async fn attempt_then_retry<F, Fut>(&self, op: F) -> SettlementResult<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SettlementResult<()>>,
    {
        match op().await {
            Err(err) if err.is_transient() => {
                tracing::debug!(error = %err, "transient settlement error, entering retry loop");
                self.retry_transient(op).await
            }
            other => other,
        }
    }
}

/// The full post-response settlement path for one billable call
///
/// One immediate settlement attempt, a retry loop with backoff when it fails
/// transiently, and on exhaustion or permanent failure a fall back to a
/// compensation task. Failure to create the task itself is logged and
/// swallowed: there is nothing left to propagate to at this point, only an
/// operator to alert.
pub async fn settle_with_recovery(
    engine: &SettlementEngine,
    store: &CompensationStore,
    policy: &RetryPolicy,
    binding_id: BindingId,
    amount_cents: i64,
    entry: &AuditEntry,
) {
    let result = policy
        .attempt_then_retry(|| engine.settle(entry.account_id, amount_cents, entry))
        .await;

    let Err(err) = result else {
        return;
    };

    tracing::error!(
        account_id = %entry.account_id,
        amount_cents,
        error = %err,
        "settlement failed after retries, creating compensation task"
    );

    match store
        .create(
            entry.account_id,
            binding_id,
            amount_cents,
            entry,
            &err.to_string(),
        )
        .await
    {
        Ok(task) => {
            tracing::warn!(
                task_id = %task.id,
                account_id = %entry.account_id,
                "compensation task created"
            );
        }
        Err(create_err) => {
            // Worst case: the charge is only recoverable from this log line.
            tracing::error!(
                account_id = %entry.account_id,
                amount_cents,
                error = %create_err,
                "failed to create compensation task, manual reconciliation required"
            );
        }
    }
}

/// Persist the zero-cost audit row for a non-billable call, with retries
///
/// Nothing was charged, so there is no compensation task to fall back to;
/// exhausting retries just logs the loss.
pub async fn log_unbilled_with_retry(
    engine: &SettlementEngine,
    policy: &RetryPolicy,
    entry: &AuditEntry,
) {
    let result = Retry::spawn(policy.backoff(), || engine.log_unbilled(entry)).await;

    if let Err(err) = result {
        tracing::error!(
            account_id = %entry.account_id,
            request_api = %entry.request_api,
            error = %err,
            "failed to persist audit row for non-billable call"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SettlementError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn transient() -> SettlementError {
        SettlementError::Database(sqlx::Error::PoolTimedOut)
    }

    fn permanent() -> SettlementError {
        SettlementError::InsufficientFunds {
            balance_cents: 5,
            required_cents: 10,
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt_without_retry() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .retry_transient(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .retry_transient(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .retry_transient(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_bypasses_retry() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .retry_transient(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(permanent()) }
            })
            .await;
        assert!(matches!(
            result,
            Err(SettlementError::InsufficientFunds { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_transient_failure_gets_four_settle_attempts() {
        // The immediate attempt plus the full 3-attempt retry loop
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .attempt_then_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_immediate_success_never_enters_retry_loop() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .attempt_then_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_permanent_failure_never_enters_retry_loop() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .attempt_then_retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(permanent()) }
            })
            .await;
        assert!(matches!(
            result,
            Err(SettlementError::InsufficientFunds { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_recovery_creates_task_when_settlement_cannot_succeed() {
        use crate::compensation::TaskStatus;
        use crate::testutil;

        let pool = testutil::pool().await;
        let account_id = testutil::seed_account(&pool, 5).await;
        let binding_id = testutil::seed_binding(&pool, account_id, 10).await;
        let engine = SettlementEngine::new(pool.clone());
        let store = CompensationStore::new(pool.clone());
        let entry = testutil::entry(account_id);

        settle_with_recovery(&engine, &store, &fast_policy(), binding_id, 10, &entry).await;

        // Nothing was debited and the charge survives as a pending task
        assert_eq!(testutil::balance(&pool, account_id).await, 5);
        let (tasks, _) = store.list(Some(TaskStatus::Pending), 50, 0).await.unwrap();
        let task = tasks
            .iter()
            .find(|t| t.account_id == account_id)
            .expect("compensation task created");
        assert_eq!(task.amount_cents, 10);
        assert_eq!(task.binding_id, binding_id);
        assert!(task.error_message.as_deref().unwrap().contains("insufficient"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        let delays: Vec<Duration> = policy.backoff().collect();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        // Capped at max_delay
        assert_eq!(delays[3], Duration::from_secs(5));
    }
}
