#!/usr/bin/env rust-script
//! Billing Consistency Verification Script
//!
//! Detects ledger drift in the Tollgate billing tables.
//!
//! ## Usage
//! ```bash
//! cargo run --bin verify_billing_consistency
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string
//!
//! ## Checks
//! - negative caller balances (should be impossible under the CHECK constraint)
//! - completed compensation tasks missing their completion timestamp
//! - terminally failed tasks with no recorded reason
//! - tasks stuck in processing past the stale-claim window
//! - billed audit rows for accounts that no longer exist

use std::env;
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("Tollgate Billing Consistency Verification");
    println!("==========================================\n");

    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    // ========================================================================
    // Check 1: No caller account has a negative balance
    // ========================================================================
    println!("Check 1: Verifying no negative balances...");

    let negative_balances: Vec<(uuid::Uuid, String, i64)> = sqlx::query_as(
        r#"
        SELECT id, name, balance_cents
        FROM caller_accounts
        WHERE balance_cents < 0
        "#
    )
    .fetch_all(&pool)
    .await?;

    if negative_balances.is_empty() {
        println!("  ✓ All caller balances are non-negative");
    } else {
        println!("  ⚠ Found {} accounts with negative balance", negative_balances.len());
        for (account_id, name, balance_cents) in &negative_balances {
            println!("    - {}: {} ({} cents)", account_id, name, balance_cents);
        }
    }

    // ========================================================================
    // Check 2: Completed tasks carry a completion timestamp
    // ========================================================================
    println!("\nCheck 2: Verifying completed tasks have completed_at...");

    let incomplete_completions: Vec<(uuid::Uuid, uuid::Uuid, i64)> = sqlx::query_as(
        r#"
        SELECT id, account_id, amount_cents
        FROM compensation_tasks
        WHERE status = 'completed' AND completed_at IS NULL
        "#
    )
    .fetch_all(&pool)
    .await?;

    if incomplete_completions.is_empty() {
        println!("  ✓ All completed tasks have a completion timestamp");
    } else {
        println!("  ⚠ Found {} completed tasks missing completed_at", incomplete_completions.len());
        for (task_id, account_id, amount_cents) in &incomplete_completions {
            println!("    - {}: account {} ({} cents)", task_id, account_id, amount_cents);
        }
    }

    // ========================================================================
    // Check 3: Failed tasks carry an error message
    // ========================================================================
    println!("\nCheck 3: Verifying failed tasks have a recorded reason...");

    let silent_failures: Vec<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
        r#"
        SELECT id, account_id
        FROM compensation_tasks
        WHERE status = 'failed' AND (error_message IS NULL OR error_message = '')
        "#
    )
    .fetch_all(&pool)
    .await?;

    if silent_failures.is_empty() {
        println!("  ✓ All failed tasks carry an error message");
    } else {
        println!("  ⚠ Found {} failed tasks without a reason", silent_failures.len());
        for (task_id, account_id) in &silent_failures {
            println!("    - {}: account {}", task_id, account_id);
        }
    }

    // ========================================================================
    // Check 4: No task stuck in processing past the stale window
    // ========================================================================
    println!("\nCheck 4: Verifying no stale processing claims...");

    let stale_claims: Vec<(uuid::Uuid, uuid::Uuid, i32)> = sqlx::query_as(
        r#"
        SELECT id, account_id, retry_count
        FROM compensation_tasks
        WHERE status = 'processing'
          AND updated_at < NOW() - INTERVAL '10 minutes'
        "#
    )
    .fetch_all(&pool)
    .await?;

    if stale_claims.is_empty() {
        println!("  ✓ No tasks stuck in processing");
    } else {
        println!("  ⚠ Found {} stale processing claims (next sweep reclaims them)", stale_claims.len());
        for (task_id, account_id, retry_count) in &stale_claims {
            println!("    - {}: account {} (retries: {})", task_id, account_id, retry_count);
        }
    }

    // ========================================================================
    // Check 5: Billed audit rows reference existing accounts
    // ========================================================================
    println!("\nCheck 5: Verifying billed log rows reference existing accounts...");

    let orphan_logs: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT COUNT(*)
        FROM request_logs l
        WHERE l.cost_cents > 0
          AND NOT EXISTS (SELECT 1 FROM caller_accounts a WHERE a.id = l.account_id)
        "#
    )
    .fetch_all(&pool)
    .await?;

    let orphan_count = orphan_logs.first().map(|(n,)| *n).unwrap_or(0);
    if orphan_count == 0 {
        println!("  ✓ All billed log rows reference existing accounts");
    } else {
        println!("  ⚠ Found {} billed log rows with no matching account", orphan_count);
    }

    // ========================================================================
    // Summary Report
    // ========================================================================
    println!("\n========================================");
    println!("Summary");
    println!("========================================");

    let total_issues = negative_balances.len()
        + incomplete_completions.len()
        + silent_failures.len()
        + orphan_count as usize;

    if total_issues == 0 {
        println!("✓ No billing inconsistencies detected!");
        if !stale_claims.is_empty() {
            println!("  (stale processing claims reported above resolve on the next sweep)");
        }
    } else {
        println!("⚠ Found {} total issues", total_issues);
        println!("\nRecommendations:");
        println!("1. Review failed compensation tasks via GET /api/v1/compensation-tasks?status=failed");
        println!("2. Reset recoverable tasks and trigger a sweep via POST /api/v1/compensation-tasks/process");
        println!("3. Check worker logs for repeated settlement errors");
    }

    Ok(())
}
