//! Long-running background task that polls the bank statement feed and
//! records each transfer through the classifier.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::bank;
use crate::classify::{self, ClassifyRules, IncomingOutcome};
use crate::config::Config;
use crate::db;
use crate::errors::Result;

pub struct IngestState {
    pub pool: SqlitePool,
    pub config: Config,
    pub client: Client,
}

/// Spawn the ingest loop as a background [`tokio`] task.
pub async fn run(state: Arc<IngestState>) {
    info!("Ingest starting — feed: {}", state.config.bank_feed_url);

    let rules = ClassifyRules::from_config(&state.config);

    // Load the cursor from the DB so restarts resume where they left off.
    let mut cursor = match load_cursor(&state.pool).await {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load ingest cursor, starting from scratch: {e}");
            None
        }
    };

    loop {
        match poll_once(&state.pool, &state.client, &state.config, &rules, cursor.as_deref()).await
        {
            Ok(next_cursor) => {
                cursor = next_cursor;
            }
            Err(e) => {
                error!("Ingest poll error: {e}");
            }
        }

        tokio::time::sleep(Duration::from_secs(state.config.poll_interval_secs)).await;
    }
}

/// Perform a single poll iteration; returns the next continuation cursor.
async fn poll_once(
    pool: &SqlitePool,
    client: &Client,
    config: &Config,
    rules: &ClassifyRules,
    cursor: Option<&str>,
) -> Result<Option<String>> {
    let (txns, next_cursor) = bank::fetch_transactions(
        client,
        &config.bank_feed_url,
        cursor,
        config.txns_per_page,
    )
    .await?;

    if !txns.is_empty() {
        let mut recorded = 0usize;
        let mut quarantined = 0usize;
        for txn in &txns {
            match classify::record_incoming(pool, rules, txn).await? {
                IncomingOutcome::Recorded { .. } => recorded += 1,
                IncomingOutcome::Quarantined { .. } => quarantined += 1,
                IncomingOutcome::Duplicate => {}
            }
        }
        info!(
            "Polled {} transactions → {} recorded, {} quarantined",
            txns.len(),
            recorded,
            quarantined
        );
    }

    // The feed may return no cursor at the end of history; keep the last
    // one so the next poll resumes from the same position.
    let next = next_cursor.or_else(|| cursor.map(String::from));

    // Persist the cursor so restarts are deterministic.
    save_cursor(pool, next.as_deref()).await?;

    Ok(next)
}

// ─────────────────────────────────────────────────────────
// Cursor persistence
// ─────────────────────────────────────────────────────────

pub async fn load_cursor(pool: &SqlitePool) -> Result<Option<String>> {
    let row: Option<(Option<String>,)> =
        sqlx::query_as("SELECT last_cursor FROM ingest_cursor WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row.and_then(|(c,)| c))
}

pub async fn save_cursor(pool: &SqlitePool, cursor: Option<&str>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_cursor (id, last_cursor, updated_at) VALUES (1, ?1, ?2)
        ON CONFLICT (id) DO UPDATE SET last_cursor = excluded.last_cursor,
                                       updated_at  = excluded.updated_at
        "#,
    )
    .bind(cursor)
    .bind(db::now())
    .execute(pool)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
