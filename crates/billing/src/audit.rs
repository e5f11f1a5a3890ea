//! Request audit log
//!
//! One row per billable attempt, append-only, used for reconciliation. The
//! raw upstream response is always persisted unfiltered; the display copy has
//! sensitive fields stripped for the dashboard.

use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use tollgate_shared::AccountId;
use uuid::Uuid;

/// Payload for one audit log row, minus the charged amount
///
/// Serializable so a compensation task can embed it verbatim and settle later
/// without re-deriving anything from the original request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub account_id: AccountId,
    /// Provider route name at the time of the call
    pub provider: String,
    /// Logical request, e.g. `GET /getArticle`
    pub request_api: String,
    /// Raw request body; for GET requests the query parameters as JSON
    pub request_body: String,
    /// Raw upstream response body, unfiltered
    pub response_body: String,
    /// Response with sensitive fields stripped, as shown to the caller.
    /// `None` when the route configures no filtering: the raw body then
    /// doubles as the display copy.
    pub display_response_body: Option<String>,
}

/// Insert one audit log row
///
/// Takes any executor so it can run standalone (zero-cost rows for
/// non-billable calls) or inside the settlement transaction (charged rows).
pub async fn insert_log<'e, E>(
    executor: E,
    entry: &AuditEntry,
    cost_cents: i64,
) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO request_logs (
            id, account_id, provider, request_api, request_body,
            response_body, display_response_body, cost_cents
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(entry.account_id)
    .bind(&entry.provider)
    .bind(&entry.request_api)
    .bind(&entry.request_body)
    .bind(&entry.response_body)
    .bind(&entry.display_response_body)
    .bind(cost_cents)
    .execute(executor)
    .await?;

    Ok(())
}
