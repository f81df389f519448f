//! Donation ledger aggregation.
//!
//! All sums are exact decimal folds over materialized rows — money is
//! stored as canonical decimal TEXT and never touches floating point.
//! An account with no donations reports `0.00` totals and zero counts,
//! never null.  Rankings tie-break by ascending account id.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::ApiState;
use crate::auth::{self, Principal, ROLE_USER};
use crate::db;
use crate::errors::{AppError, Result};

/// Per-account donation summary, split into direct and referred buckets.
#[derive(Debug, Serialize)]
pub struct AccountTotals {
    pub account_id: i64,
    pub fullname: String,
    pub code: String,
    pub refer_code: String,
    /// Sum over donations the account itself made.
    pub total_donations: Decimal,
    pub donation_count: i64,
    /// Sum over donations attributed to the account as a referrer, either
    /// directly (`refer_id`) or through a challenge it created.
    pub total_donations_refer: Decimal,
    pub total_donation_refer_count: i64,
}

#[derive(Debug, Serialize)]
pub struct AmbassadorEntry {
    pub account_id: i64,
    pub fullname: String,
    pub code: String,
    pub refer_code: String,
    pub total_donations_refer: Decimal,
    pub total_donation_refer_count: i64,
}

#[derive(Debug, Serialize)]
pub struct DonorEntry {
    pub account_id: i64,
    pub fullname: String,
    pub code: String,
    pub total_donations: Decimal,
    pub donation_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

// ─────────────────────────────────────────────────────────
// Folding helpers
// ─────────────────────────────────────────────────────────

/// Fold raw value strings into an exact (sum, count) pair.
fn fold(values: &[(String,)]) -> Result<(Decimal, i64)> {
    let mut sum = db::zero_money();
    for (raw,) in values {
        sum += db::parse_money(raw)?;
    }
    Ok((sum, values.len() as i64))
}

// ─────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────

/// Public per-account summary, looked up by the account's public code.
pub async fn totals_for_account(pool: &SqlitePool, code: &str) -> Result<AccountTotals> {
    let account: Option<(i64, String, String, String)> =
        sqlx::query_as("SELECT id, fullname, code, refer_code FROM accounts WHERE code = ?1")
            .bind(code)
            .fetch_optional(pool)
            .await?;
    let (account_id, fullname, code, refer_code) = account.ok_or(AppError::AccountNotFound)?;

    let direct: Vec<(String,)> =
        sqlx::query_as("SELECT value FROM donations WHERE created_by = ?1")
            .bind(account_id)
            .fetch_all(pool)
            .await?;
    let (total_donations, donation_count) = fold(&direct)?;

    // Referred bucket: refer_id matches, plus donations attributed to any
    // challenge this account created.  Both paths feed the same bucket.
    let referred: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT d.value FROM donations d WHERE d.refer_id = ?1
        UNION ALL
        SELECT d.value FROM donations d
        JOIN   challenges c ON c.id = d.challenge_id
        WHERE  c.created_by = ?1
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;
    let (total_donations_refer, total_donation_refer_count) = fold(&referred)?;

    Ok(AccountTotals {
        account_id,
        fullname,
        code,
        refer_code,
        total_donations,
        donation_count,
        total_donations_refer,
        total_donation_refer_count,
    })
}

/// Admin-facing variant: restricted to accounts on the regular user tier.
pub async fn totals_for_account_admin(
    pool: &SqlitePool,
    principal: &Principal,
    code: &str,
) -> Result<AccountTotals> {
    auth::require_admin(principal)?;

    let role: Option<(String,)> = sqlx::query_as(
        "SELECT r.name FROM accounts a JOIN roles r ON r.id = a.role_id WHERE a.code = ?1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?;
    let (role,) = role.ok_or(AppError::AccountNotFound)?;
    if role != ROLE_USER {
        return Err(AppError::AdminAccessDenied);
    }

    totals_for_account(pool, code).await
}

/// Exact (sum, count) of donations attributed to one challenge.
pub async fn totals_for_challenge(pool: &SqlitePool, challenge_id: i64) -> Result<(Decimal, i64)> {
    let values: Vec<(String,)> =
        sqlx::query_as("SELECT value FROM donations WHERE challenge_id = ?1")
            .bind(challenge_id)
            .fetch_all(pool)
            .await?;
    fold(&values)
}

/// Accounts ranked by referred-donation total, descending; ties broken by
/// ascending account id.  An empty account table yields an empty list.
pub async fn top_ambassadors(pool: &SqlitePool, limit: usize) -> Result<Vec<AmbassadorEntry>> {
    let mut buckets: HashMap<i64, (Decimal, i64)> = HashMap::new();

    let by_refer: Vec<(i64, String)> =
        sqlx::query_as("SELECT refer_id, value FROM donations WHERE refer_id IS NOT NULL")
            .fetch_all(pool)
            .await?;
    let by_challenge: Vec<(i64, String)> = sqlx::query_as(
        r#"
        SELECT c.created_by, d.value
        FROM   donations d
        JOIN   challenges c ON c.id = d.challenge_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    for (account_id, raw) in by_refer.into_iter().chain(by_challenge) {
        let entry = buckets.entry(account_id).or_insert((db::zero_money(), 0));
        entry.0 += db::parse_money(&raw)?;
        entry.1 += 1;
    }

    let mut ranked: Vec<(i64, Decimal, i64)> = buckets
        .into_iter()
        .map(|(id, (total, count))| (id, total, count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(limit);

    let mut out = Vec::with_capacity(ranked.len());
    for (account_id, total, count) in ranked {
        let (fullname, code, refer_code): (String, String, String) =
            sqlx::query_as("SELECT fullname, code, refer_code FROM accounts WHERE id = ?1")
                .bind(account_id)
                .fetch_one(pool)
                .await?;
        out.push(AmbassadorEntry {
            account_id,
            fullname,
            code,
            refer_code,
            total_donations_refer: total,
            total_donation_refer_count: count,
        });
    }
    Ok(out)
}

/// Accounts ranked by donation count, descending; ties broken by
/// ascending account id.
pub async fn top_donors(pool: &SqlitePool, limit: usize) -> Result<Vec<DonorEntry>> {
    let rows: Vec<(i64, String)> =
        sqlx::query_as("SELECT created_by, value FROM donations WHERE created_by IS NOT NULL")
            .fetch_all(pool)
            .await?;

    let mut buckets: HashMap<i64, (Decimal, i64)> = HashMap::new();
    for (account_id, raw) in rows {
        let entry = buckets.entry(account_id).or_insert((db::zero_money(), 0));
        entry.0 += db::parse_money(&raw)?;
        entry.1 += 1;
    }

    let mut ranked: Vec<(i64, Decimal, i64)> = buckets
        .into_iter()
        .map(|(id, (total, count))| (id, total, count))
        .collect();
    ranked.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));
    ranked.truncate(limit);

    let mut out = Vec::with_capacity(ranked.len());
    for (account_id, total, count) in ranked {
        let (fullname, code): (String, String) =
            sqlx::query_as("SELECT fullname, code FROM accounts WHERE id = ?1")
                .bind(account_id)
                .fetch_one(pool)
                .await?;
        out.push(DonorEntry {
            account_id,
            fullname,
            code,
            total_donations: total,
            donation_count: count,
        });
    }
    Ok(out)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /ledger/accounts/:code`
pub async fn account_totals_handler(
    State(state): State<Arc<ApiState>>,
    Path(code): Path<String>,
) -> Result<Json<AccountTotals>> {
    Ok(Json(totals_for_account(&state.pool, &code).await?))
}

/// `GET /admin/ledger/accounts/:code`
pub async fn admin_account_totals_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(code): Path<String>,
) -> Result<Json<AccountTotals>> {
    Ok(Json(
        totals_for_account_admin(&state.pool, &principal, &code).await?,
    ))
}

/// `GET /ledger/top-ambassadors`
pub async fn top_ambassadors_handler(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<AmbassadorEntry>>> {
    Ok(Json(top_ambassadors(&state.pool, q.limit).await?))
}

/// `GET /ledger/top-donors`
pub async fn top_donors_handler(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<DonorEntry>>> {
    Ok(Json(top_donors(&state.pool, q.limit).await?))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
