//! Credential resolution
//!
//! Maps the inbound opaque API key to the caller account and provider route
//! it is bound to, and runs the cheap pre-flight checks. The balance check
//! here is advisory only; the authoritative check happens under the row lock
//! inside the settlement transaction.

use axum::http::HeaderMap;
use sqlx::PgPool;
use tollgate_shared::{AccountId, BindingId};

use crate::error::ApiError;

/// Header carrying the caller's credential
pub const API_KEY_HEADER: &str = "x-api-key";
/// Legacy fallback header some integrations still send
pub const API_KEY_HEADER_ALT: &str = "apikey";

/// Everything the proxy path needs about one credential, in one join
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResolvedCredential {
    pub binding_id: BindingId,
    pub account_id: AccountId,
    pub account_active: bool,
    pub balance_cents: i64,
    pub provider: String,
    pub upstream_host: String,
    pub upstream_path: String,
    pub upstream_api_key: Option<String>,
    pub price_cents: i64,
    pub route_enabled: bool,
    pub strip_field: Option<String>,
}

/// Pull the opaque credential out of the request headers
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(API_KEY_HEADER)
        .or_else(|| headers.get(API_KEY_HEADER_ALT))
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
}

/// Look up the credential binding joined with its account and route
pub async fn resolve(pool: &PgPool, api_key: &str) -> Result<ResolvedCredential, ApiError> {
    let credential: Option<ResolvedCredential> = sqlx::query_as(
        r#"
        SELECT
            b.id AS binding_id,
            a.id AS account_id,
            a.is_active AS account_active,
            a.balance_cents,
            r.name AS provider,
            r.upstream_host,
            r.upstream_path,
            r.upstream_api_key,
            r.price_cents,
            r.is_enabled AS route_enabled,
            r.strip_field
        FROM credential_bindings b
        JOIN caller_accounts a ON a.id = b.account_id
        JOIN provider_routes r ON r.id = b.route_id
        WHERE b.api_key = $1
        "#,
    )
    .bind(api_key)
    .fetch_optional(pool)
    .await?;

    credential.ok_or(ApiError::Unauthenticated)
}

impl ResolvedCredential {
    /// Pre-flight checks before any upstream call
    ///
    /// The `InsufficientFunds` here is a fast-fail optimization: the balance
    /// can still change before settlement, which re-checks it under the lock.
    pub fn authorize(&self) -> Result<(), ApiError> {
        if !self.account_active {
            return Err(ApiError::Forbidden("Caller account is disabled".to_string()));
        }
        if !self.route_enabled {
            return Err(ApiError::Forbidden("Provider route is disabled".to_string()));
        }
        if self.balance_cents < self.price_cents {
            return Err(ApiError::InsufficientFunds);
        }
        Ok(())
    }
}
