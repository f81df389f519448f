//! Bank statement feed client.
//!
//! The feed is a paginated JSON endpoint returning posted transfers plus an
//! opaque continuation cursor.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied on network errors, rate-limit and
//!   server-error responses, up to [`MAX_BACKOFF_SECS`] seconds.
//! * Retries are bounded per fetch; after [`MAX_ATTEMPTS`] failures the
//!   error surfaces to the poll loop, which tries again next tick.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::IncomingTransaction;
use crate::errors::{AppError, Result};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_ATTEMPTS: u32 = 5;

// ─────────────────────────────────────────────────────────
// Feed response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FeedResponse {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawTransaction {
    /// Bank-side unique reference for the transfer.
    pub reference: String,
    /// Amount as the bank serializes it — a string or a bare number.
    pub amount: Value,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "postedAt")]
    pub posted_at: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────

/// Fetch one page of transactions from the feed.
///
/// * `cursor` — opaque continuation token from a previous response.
/// * `limit`  — maximum number of transactions to return.
///
/// Returns `(transactions, next_cursor)`.
pub async fn fetch_transactions(
    client: &Client,
    feed_url: &str,
    cursor: Option<&str>,
    limit: u32,
) -> Result<(Vec<IncomingTransaction>, Option<String>)> {
    let mut backoff = INITIAL_BACKOFF_SECS;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let mut request = client.get(feed_url).query(&[("limit", limit.to_string())]);
        if let Some(cur) = cursor {
            request = request.query(&[("cursor", cur)]);
        }

        match request.send().await {
            Err(e) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(e.into());
                }
                warn!("Feed request failed (will retry in {backoff}s): {e}");
            }
            Ok(resp) => {
                let status = resp.status();
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(AppError::BankFeed(format!(
                            "feed unavailable: HTTP {status}"
                        )));
                    }
                    warn!("Feed returned {status} (will retry in {backoff}s)");
                } else if !status.is_success() {
                    // Client errors will not fix themselves; fail the poll.
                    return Err(AppError::BankFeed(format!(
                        "feed rejected request: HTTP {status}"
                    )));
                } else {
                    let body: FeedResponse = resp.json().await?;
                    debug!(
                        "Fetched {} transactions (next_cursor={:?})",
                        body.transactions.len(),
                        body.cursor
                    );
                    let txns = body.transactions.into_iter().map(into_incoming).collect();
                    return Ok((txns, body.cursor));
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(backoff)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }
}

fn into_incoming(raw: RawTransaction) -> IncomingTransaction {
    IncomingTransaction {
        amount: amount_to_string(&raw.amount),
        description: raw.description,
        bank_ref: raw.reference,
        posted_at: raw.posted_at.as_deref().and_then(parse_iso_to_unix),
    }
}

/// Normalize the feed's amount field to a string; anything non-scalar comes
/// out empty and gets quarantined downstream.
fn amount_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Parse an ISO-8601 timestamp string into a Unix epoch (seconds).
fn parse_iso_to_unix(s: &str) -> Option<i64> {
    use chrono::DateTime;
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_normalization() {
        assert_eq!(amount_to_string(&serde_json::json!("120.50")), "120.50");
        assert_eq!(amount_to_string(&serde_json::json!(120.5)), "120.5");
        assert_eq!(amount_to_string(&serde_json::json!(120)), "120");
        assert_eq!(amount_to_string(&serde_json::json!({"a": 1})), "");
        assert_eq!(amount_to_string(&serde_json::json!(null)), "");
    }

    #[test]
    fn parse_iso_timestamp() {
        let ts = parse_iso_to_unix("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ts, 1_704_067_200);
        assert!(parse_iso_to_unix("yesterday").is_none());
    }

    #[test]
    fn feed_page_deserializes_and_converts() {
        let body = r#"{
            "transactions": [
                {
                    "reference": "FT-001",
                    "amount": "250.00",
                    "description": "REF R-AB12",
                    "postedAt": "2024-01-01T00:00:00Z"
                },
                {
                    "reference": "FT-002",
                    "amount": 99
                }
            ],
            "cursor": "next-page"
        }"#;

        let page: FeedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.cursor.as_deref(), Some("next-page"));
        assert_eq!(page.transactions.len(), 2);

        let first = into_incoming(page.transactions[0].clone());
        assert_eq!(first.bank_ref, "FT-001");
        assert_eq!(first.amount, "250.00");
        assert_eq!(first.description, "REF R-AB12");
        assert_eq!(first.posted_at, Some(1_704_067_200));

        let second = into_incoming(page.transactions[1].clone());
        assert_eq!(second.amount, "99");
        assert_eq!(second.description, "");
        assert_eq!(second.posted_at, None);
    }

    #[test]
    fn empty_feed_body_is_an_empty_page() {
        let page: FeedResponse = serde_json::from_str(r#"{"cursor": null}"#).unwrap();
        assert!(page.transactions.is_empty());
        assert!(page.cursor.is_none());
    }
}
