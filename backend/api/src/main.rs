//! Donation platform admin backend — entry point.
//!
//! Exposes the Axum REST API (accounts, projects, challenges, news,
//! donation ledger) and, when a bank feed is configured, starts a
//! background task that polls the feed and classifies inbound transfers.

mod accounts;
mod api;
mod auth;
mod bank;
mod budgets;
mod challenges;
mod classify;
mod config;
mod db;
mod donations;
mod errors;
mod ingest;
mod ledger;
mod news;
mod projects;
mod sponsors;
mod storage;
#[cfg(test)]
mod testutil;
mod tracking;

use std::sync::Arc;

use reqwest::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use ingest::IngestState;
use storage::DiskStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // HTTP client for the bank feed.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // ─── Background ingest ────────────────────────────────
    if config.bank_feed_url.is_empty() {
        info!("No bank feed configured; ingest disabled");
    } else {
        let ingest_state = Arc::new(IngestState {
            pool: pool.clone(),
            config: config.clone(),
            client,
        });
        tokio::spawn(ingest::run(ingest_state));
    }

    // ─── REST API ─────────────────────────────────────────
    let storage = Arc::new(DiskStorage::new(
        config.media_dir.clone(),
        config.public_base_url.clone(),
    ));
    let api_state = Arc::new(api::ApiState {
        pool,
        config: config.clone(),
        storage,
    });

    let app = api::router(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
