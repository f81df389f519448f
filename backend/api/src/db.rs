//! Database layer — pool construction, migrations, and shared helpers.

use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::{AppError, Result};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Current wall-clock time as Unix epoch seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Parse a money column stored as canonical decimal TEXT.
pub fn parse_money(raw: &str) -> Result<Decimal> {
    raw.parse::<Decimal>().map_err(|_| AppError::InvalidAmount)
}

/// Exact zero with two-decimal scale; the additive identity for ledger sums.
pub fn zero_money() -> Decimal {
    Decimal::new(0, 2)
}

/// Short unique public code for accounts, projects, and challenges.
pub fn short_code() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

/// Validate an inbound money amount: non-negative, exact decimal.
pub fn check_amount(value: Decimal) -> Result<Decimal> {
    if value.is_sign_negative() {
        return Err(AppError::InvalidAmount);
    }
    Ok(value)
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
