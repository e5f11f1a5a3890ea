//! Common types used across Tollgate
//!
//! All monetary amounts are fixed-point integer cents. All ids are UUIDv7 so
//! they sort by creation time.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Caller account ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Provider route ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RouteId(pub Uuid);

impl RouteId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RouteId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RouteId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Credential binding ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct BindingId(pub Uuid);

impl BindingId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BindingId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for BindingId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Compensation task ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Domain rows
// =============================================================================

/// Caller account holding a prepaid balance
///
/// The balance is mutated only by settlement (debit) and the recharge flow
/// (credit). Accounts are never deleted while referenced by request logs.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CallerAccount {
    pub id: AccountId,
    pub name: String,
    pub balance_cents: i64,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
}

/// Upstream provider route configuration
///
/// Read-only to the billing core; owned by admin configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProviderRoute {
    pub id: RouteId,
    pub name: String,
    pub upstream_host: String,
    pub upstream_path: String,
    pub upstream_api_key: Option<String>,
    pub price_cents: i64,
    pub is_enabled: bool,
    /// Sensitive response field stripped from caller-facing and display
    /// bodies (the raw body is always logged unfiltered).
    pub strip_field: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Links an opaque per-integration API key to one (account, route) pair
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CredentialBinding {
    pub id: BindingId,
    pub api_key: String,
    pub account_id: AccountId,
    pub route_id: RouteId,
    pub created_at: OffsetDateTime,
}
