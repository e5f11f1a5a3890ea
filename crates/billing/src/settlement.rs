//! Billing transaction engine
//!
//! Settlement is the atomic debit-plus-log operation for one billable call:
//! lock the account row, re-check the balance, decrement it, and append the
//! audit row, all in one transaction. Either both side effects happen or
//! neither does.

use sqlx::{PgPool, Postgres, Transaction};
use tollgate_shared::AccountId;

use crate::audit::{self, AuditEntry};
use crate::error::{SettlementError, SettlementResult};

/// Maximum time to wait on the account row lock before failing transient
const LOCK_TIMEOUT: &str = "5s";

/// Overall statement budget for the settlement transaction
const STATEMENT_TIMEOUT: &str = "10s";

/// Executes the settle transaction against a Postgres pool
#[derive(Clone)]
pub struct SettlementEngine {
    pool: PgPool,
}

impl SettlementEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Settle one billable call: debit the balance and append the audit row
    ///
    /// Runs at read committed (the Postgres default) plus an explicit row
    /// lock, the weakest setup that still prevents a lost update on the
    /// balance. Both timeouts are bounded so a stuck lock degrades to an
    /// explicit transient error instead of hanging the worker.
    pub async fn settle(
        &self,
        account_id: AccountId,
        amount_cents: i64,
        entry: &AuditEntry,
    ) -> SettlementResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::debit_and_log(&mut tx, account_id, amount_cents, entry).await?;
        tx.commit().await?;

        tracing::debug!(
            account_id = %account_id,
            amount_cents,
            "settlement committed"
        );
        Ok(())
    }

    /// The debit-plus-log steps on an already-open transaction
    ///
    /// The compensation processor extends the same transaction with the task
    /// completion update, so a task can never be marked completed without the
    /// debit and log landing in the same commit.
    pub(crate) async fn debit_and_log(
        tx: &mut Transaction<'_, Postgres>,
        account_id: AccountId,
        amount_cents: i64,
        entry: &AuditEntry,
    ) -> SettlementResult<()> {
        sqlx::query(&format!("SET LOCAL lock_timeout = '{LOCK_TIMEOUT}'"))
            .execute(&mut **tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = '{STATEMENT_TIMEOUT}'"
        ))
        .execute(&mut **tx)
        .await?;

        // Authoritative checks under the row lock; the gateway's pre-checks
        // are advisory only since the account can change in between.
        let row: Option<(i64, bool)> = sqlx::query_as(
            "SELECT balance_cents, is_active FROM caller_accounts WHERE id = $1 FOR UPDATE",
        )
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await?;

        let Some((balance_cents, is_active)) = row else {
            return Err(SettlementError::AccountNotFound(account_id));
        };

        if !is_active {
            return Err(SettlementError::AccountInactive(account_id));
        }

        if balance_cents < amount_cents {
            return Err(SettlementError::InsufficientFunds {
                balance_cents,
                required_cents: amount_cents,
            });
        }

        sqlx::query("UPDATE caller_accounts SET balance_cents = balance_cents - $1 WHERE id = $2")
            .bind(amount_cents)
            .bind(account_id)
            .execute(&mut **tx)
            .await?;

        // A failed insert here rolls back the debit with it: no charge
        // without its audit row.
        audit::insert_log(&mut **tx, entry, amount_cents).await?;

        Ok(())
    }

    /// Append a zero-cost audit row for a non-billable call
    ///
    /// No debit, no transaction needed; still logged for traceability.
    pub async fn log_unbilled(&self, entry: &AuditEntry) -> SettlementResult<()> {
        audit::insert_log(&self.pool, entry, 0).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
