//! Inbound payment classifier.
//!
//! Bank transfers arrive as free-text descriptions.  Attribution is decided
//! by prefix, in strict priority order: referral prefix, then challenge
//! prefix, then account prefix, then bare project-code containment.  A
//! transfer that matches nothing (or carries a bad amount) lands in
//! `wrong_donations` for manual reconciliation instead of being dropped.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::errors::Result;

/// Description prefixes that mark each attribution kind.
#[derive(Debug, Clone)]
pub struct ClassifyRules {
    pub refer_prefix: String,
    pub challenge_prefix: String,
    pub account_prefix: String,
}

impl ClassifyRules {
    pub fn from_config(config: &Config) -> Self {
        ClassifyRules {
            refer_prefix: config.refer_prefix.clone(),
            challenge_prefix: config.challenge_prefix.clone(),
            account_prefix: config.account_prefix.clone(),
        }
    }
}

/// Where a transfer ends up after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribution {
    /// Referral donation credited to the account carrying the refer code.
    Refer(i64),
    /// Donation attributed to a challenge.
    Challenge(i64),
    /// Direct donation made by a known account.
    Direct(i64),
    /// Donation earmarked for a project by code containment.
    Project(i64),
    Unmatched,
}

/// One transaction from the bank feed.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingTransaction {
    pub amount: String,
    #[serde(default)]
    pub description: String,
    pub bank_ref: String,
    /// Bank posting time (epoch seconds); recording time is used when absent.
    #[serde(default)]
    pub posted_at: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IncomingOutcome {
    /// Stored as a donation in the named attribution bucket.
    Recorded { bucket: &'static str, donation_id: i64 },
    /// Stored in `wrong_donations` for manual review.
    Quarantined { wrong_donation_id: i64 },
    /// A row with this bank reference already exists; nothing written.
    Duplicate,
}

// ─────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────

/// The token following `prefix` at the start of `description`, if the
/// description starts with that prefix (case-insensitive).  Separators
/// between prefix and code (space, dash, colon) are skipped.
fn code_after_prefix<'a>(description: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty()
        || description.len() < prefix.len()
        || !description.is_char_boundary(prefix.len())
    {
        return None;
    }
    let (head, rest) = description.split_at(prefix.len());
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = rest.trim_start_matches([' ', '-', ':']);
    let code = rest
        .split(|c: char| c == ' ' || c == '-' || c == ':')
        .next()
        .unwrap_or("");
    if code.is_empty() {
        None
    } else {
        Some(code)
    }
}

/// Decide the attribution bucket for a transfer description.
pub async fn classify(
    pool: &SqlitePool,
    rules: &ClassifyRules,
    description: &str,
) -> Result<Attribution> {
    let description = description.trim();

    if let Some(code) = code_after_prefix(description, &rules.refer_prefix) {
        let hit: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM accounts WHERE refer_code = ?1 COLLATE NOCASE AND is_active = 1",
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;
        if let Some((id,)) = hit {
            return Ok(Attribution::Refer(id));
        }
    }

    if let Some(code) = code_after_prefix(description, &rules.challenge_prefix) {
        let hit: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM challenges WHERE code = ?1 COLLATE NOCASE")
                .bind(code)
                .fetch_optional(pool)
                .await?;
        if let Some((id,)) = hit {
            return Ok(Attribution::Challenge(id));
        }
    }

    if let Some(code) = code_after_prefix(description, &rules.account_prefix) {
        let hit: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM accounts WHERE code = ?1 COLLATE NOCASE AND is_active = 1",
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;
        if let Some((id,)) = hit {
            return Ok(Attribution::Direct(id));
        }
    }

    // No prefix matched: look for a project code anywhere in the text.
    // When several codes are contained, the longest wins; equal lengths
    // fall back to the lowest project id.
    let projects: Vec<(i64, String)> = sqlx::query_as("SELECT id, code FROM projects")
        .fetch_all(pool)
        .await?;
    let upper = description.to_ascii_uppercase();
    let mut best: Option<(i64, usize)> = None;
    for (id, code) in projects {
        if code.is_empty() || !upper.contains(&code.to_ascii_uppercase()) {
            continue;
        }
        let better = match best {
            None => true,
            Some((best_id, best_len)) => {
                code.len() > best_len || (code.len() == best_len && id < best_id)
            }
        };
        if better {
            best = Some((id, code.len()));
        }
    }
    if let Some((id, _)) = best {
        return Ok(Attribution::Project(id));
    }

    Ok(Attribution::Unmatched)
}

// ─────────────────────────────────────────────────────────
// Recording
// ─────────────────────────────────────────────────────────

/// Record one inbound transaction.  Malformed input never errors out of
/// the ingest loop: a bad or negative amount quarantines the transfer the
/// same way an unmatched description does.  Re-delivery of an already-seen
/// bank reference is a no-op.
pub async fn record_incoming(
    pool: &SqlitePool,
    rules: &ClassifyRules,
    txn: &IncomingTransaction,
) -> Result<IncomingOutcome> {
    let amount = match db::parse_money(&txn.amount) {
        Ok(v) if v.is_sign_positive() || v.is_zero() => v,
        _ => return quarantine(pool, txn).await,
    };

    let attribution = classify(pool, rules, &txn.description).await?;
    let (bucket, project_id, challenge_id, refer_id, created_by) = match attribution {
        Attribution::Refer(id) => ("refer", None, None, Some(id), None),
        Attribution::Challenge(id) => ("challenge", None, Some(id), None, None),
        Attribution::Direct(id) => ("direct", None, None, None, Some(id)),
        Attribution::Project(id) => ("project", Some(id), None, None, None),
        Attribution::Unmatched => return quarantine(pool, txn).await,
    };

    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        r#"
        INSERT OR IGNORE INTO donations
            (value, description, bank_ref, project_id, challenge_id, refer_id, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(amount.to_string())
    .bind(&txn.description)
    .bind(&txn.bank_ref)
    .bind(project_id)
    .bind(challenge_id)
    .bind(refer_id)
    .bind(created_by)
    .bind(txn.posted_at.unwrap_or_else(db::now))
    .execute(&mut *tx)
    .await?;

    if res.rows_affected() == 0 {
        return Ok(IncomingOutcome::Duplicate);
    }

    // A transfer quarantined before its target existed may attribute on
    // re-delivery; the stale wrong_donations copy goes with the same commit
    // so the bank_ref never shows up in both listings.
    sqlx::query("DELETE FROM wrong_donations WHERE bank_ref = ?1")
        .bind(&txn.bank_ref)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(bank_ref = %txn.bank_ref, bucket, "recorded inbound donation");
    Ok(IncomingOutcome::Recorded {
        bucket,
        donation_id: res.last_insert_rowid(),
    })
}

async fn quarantine(pool: &SqlitePool, txn: &IncomingTransaction) -> Result<IncomingOutcome> {
    // Duplicate wrong_donations are suppressed by bank_ref as well; a
    // re-delivered unmatched transfer must also be a no-op.
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM donations WHERE bank_ref = ?1")
            .bind(&txn.bank_ref)
            .fetch_optional(pool)
            .await?;
    if existing.is_some() {
        return Ok(IncomingOutcome::Duplicate);
    }

    let res = sqlx::query(
        "INSERT OR IGNORE INTO wrong_donations (value, description, bank_ref, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&txn.amount)
    .bind(&txn.description)
    .bind(&txn.bank_ref)
    .bind(txn.posted_at.unwrap_or_else(db::now))
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Ok(IncomingOutcome::Duplicate);
    }
    info!(bank_ref = %txn.bank_ref, "quarantined unmatched transfer");
    Ok(IncomingOutcome::Quarantined {
        wrong_donation_id: res.last_insert_rowid(),
    })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
