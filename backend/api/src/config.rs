//! Application configuration loaded from environment variables.

use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Directory where uploaded objects are stored on disk
    pub media_dir: String,
    /// Public URL prefix under which stored objects are served
    pub public_base_url: String,
    /// Bank statement feed endpoint (JSON); empty disables ingestion
    pub bank_feed_url: String,
    /// How often (in seconds) to poll the bank feed for new transactions
    pub poll_interval_secs: u64,
    /// Maximum number of transactions to fetch per feed request
    pub txns_per_page: u32,
    /// Upload size ceiling in bytes (2 MiB by default)
    pub max_upload_bytes: u64,
    /// Transfer-description prefix marking a referral donation
    pub refer_prefix: String,
    /// Transfer-description prefix marking a challenge donation
    pub challenge_prefix: String,
    /// Transfer-description prefix marking a direct account donation
    pub account_prefix: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./platform.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid API_PORT".to_string()))?,
            media_dir: env_var("MEDIA_DIR").unwrap_or_else(|_| "./media".to_string()),
            public_base_url: env_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3001/media".to_string()),
            bank_feed_url: env_var("BANK_FEED_URL").unwrap_or_default(),
            poll_interval_secs: env_var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid POLL_INTERVAL_SECS".to_string()))?,
            txns_per_page: env_var("TXNS_PER_PAGE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid TXNS_PER_PAGE".to_string()))?,
            max_upload_bytes: env_var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (2 * 1024 * 1024).to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid MAX_UPLOAD_BYTES".to_string()))?,
            refer_prefix: env_var("REFER_PREFIX").unwrap_or_else(|_| "REF".to_string()),
            challenge_prefix: env_var("CHALLENGE_PREFIX").unwrap_or_else(|_| "CHL".to_string()),
            account_prefix: env_var("ACCOUNT_PREFIX").unwrap_or_else(|_| "ACC".to_string()),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}
