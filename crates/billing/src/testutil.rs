//! Shared fixtures for database-backed tests
//!
//! Every test using these helpers is `#[ignore]`d and expects `DATABASE_URL`
//! to point at a migrated Postgres instance. Rows are seeded with fresh
//! UUIDv7 ids so tests stay isolated on a shared database.

use sqlx::PgPool;
use tollgate_shared::{AccountId, BindingId, RouteId};

use crate::audit::AuditEntry;

pub(crate) async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    tollgate_shared::db::create_pool(&url, 5)
        .await
        .expect("failed to connect to test database")
}

pub(crate) async fn seed_account(pool: &PgPool, balance_cents: i64) -> AccountId {
    let id = AccountId::new();
    sqlx::query(
        "INSERT INTO caller_accounts (id, name, balance_cents, is_active) VALUES ($1, $2, $3, TRUE)",
    )
    .bind(id)
    .bind(format!("test-account-{id}"))
    .bind(balance_cents)
    .execute(pool)
    .await
    .expect("failed to seed account");
    id
}

pub(crate) async fn seed_binding(
    pool: &PgPool,
    account_id: AccountId,
    price_cents: i64,
) -> BindingId {
    let route_id = RouteId::new();
    sqlx::query(
        r#"
        INSERT INTO provider_routes (id, name, upstream_host, upstream_path, price_cents)
        VALUES ($1, $2, 'https://api.example.com', '/v1/send', $3)
        "#,
    )
    .bind(route_id)
    .bind(format!("test-route-{route_id}"))
    .bind(price_cents)
    .execute(pool)
    .await
    .expect("failed to seed route");

    let id = BindingId::new();
    sqlx::query(
        "INSERT INTO credential_bindings (id, api_key, account_id, route_id) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(format!("test-key-{id}"))
    .bind(account_id)
    .bind(route_id)
    .execute(pool)
    .await
    .expect("failed to seed binding");
    id
}

pub(crate) async fn balance(pool: &PgPool, id: AccountId) -> i64 {
    let (balance_cents,): (i64,) =
        sqlx::query_as("SELECT balance_cents FROM caller_accounts WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .expect("account row");
    balance_cents
}

/// Row count and summed cost of the account's audit log
pub(crate) async fn billed_rows(pool: &PgPool, id: AccountId) -> (i64, i64) {
    sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(cost_cents), 0)::BIGINT
        FROM request_logs WHERE account_id = $1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .expect("log rows")
}

pub(crate) fn entry(account_id: AccountId) -> AuditEntry {
    AuditEntry {
        account_id,
        provider: "articles".to_string(),
        request_api: "POST /sendMessage".to_string(),
        request_body: "{}".to_string(),
        response_body: r#"{"Success":true}"#.to_string(),
        display_response_body: None,
    }
}
