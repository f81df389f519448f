//! Application-wide error types.
//!
//! Business failures are a flat set of codes carried by a single enum; each
//! maps to a stable HTTP status and machine-readable `code` string at the
//! API boundary.  Services never swallow a business error — they always
//! propagate it to the caller, which aborts the surrounding transaction.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    // ── Infrastructure ───────────────────────────────────
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bank feed error: {0}")]
    BankFeed(String),

    // ── Not-found family ─────────────────────────────────
    #[error("Account not found")]
    AccountNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Project not found")]
    ProjectNotFound,

    #[error("Budget not found")]
    BudgetNotFound,

    #[error("Challenge not found")]
    ChallengeNotFound,

    #[error("Sponsor not found")]
    SponsorNotFound,

    #[error("Category not found")]
    CategoryNotFound,

    #[error("News not found")]
    NewsNotFound,

    #[error("Tracking not found")]
    TrackingNotFound,

    #[error("Donation not found")]
    DonationNotFound,

    // ── Authorization ────────────────────────────────────
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Access denied")]
    AccessDenied,

    #[error("Admin access denied")]
    AdminAccessDenied,

    // ── Validation ───────────────────────────────────────
    #[error("An account with this email already exists")]
    UserExisted,

    #[error("The requested role does not exist")]
    RoleNotExisted,

    #[error("An entry with this title already exists")]
    DuplicateTitle,

    #[error("Finish date must be in the future")]
    InvalidFinishDate,

    #[error("Amount must be a non-negative decimal")]
    InvalidAmount,

    #[error("Old password is incorrect")]
    OldPasswordIncorrect,

    #[error("New password must differ from the old one")]
    NewPasswordMustDiffer,

    #[error("Sponsor contract must not be null")]
    ContractNotNull,

    // ── File attachments ─────────────────────────────────
    #[error("Uploaded file is not an accepted image type")]
    FileIsNotImage,

    #[error("Uploaded file exceeds the size limit")]
    FileSizeExceedsLimit,

    #[error("File upload failed: {0}")]
    UploadFailed(String),

    #[error("File delete failed: {0}")]
    DeleteFileFailed(String),
}

impl AppError {
    /// Stable machine-readable code surfaced in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migrate(_) => "MIGRATION_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::BankFeed(_) => "BANK_FEED_ERROR",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::RoleNotFound => "ROLE_NOT_FOUND",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::BudgetNotFound => "BUDGET_NOT_FOUND",
            Self::ChallengeNotFound => "CHALLENGE_NOT_FOUND",
            Self::SponsorNotFound => "SPONSOR_NOT_FOUND",
            Self::CategoryNotFound => "CATEGORY_NOT_FOUND",
            Self::NewsNotFound => "NEWS_NOT_FOUND",
            Self::TrackingNotFound => "TRACKING_NOT_FOUND",
            Self::DonationNotFound => "DONATION_NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::AdminAccessDenied => "ADMIN_ACCESS_DENIED",
            Self::UserExisted => "USER_EXISTED",
            Self::RoleNotExisted => "ROLE_NOT_EXISTED",
            Self::DuplicateTitle => "DUPLICATE_TITLE",
            Self::InvalidFinishDate => "INVALID_FINISH_DATE",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::OldPasswordIncorrect => "OLD_PASSWORD_INCORRECT",
            Self::NewPasswordMustDiffer => "NEW_PASSWORD_MUST_DIFFER",
            Self::ContractNotNull => "CONTRACT_NOT_NULL",
            Self::FileIsNotImage => "FILE_IS_NOT_IMAGE",
            Self::FileSizeExceedsLimit => "FILE_SIZE_EXCEEDS_LIMIT",
            Self::UploadFailed(_) => "UPLOAD_FAILED",
            Self::DeleteFileFailed(_) => "DELETE_FILE_FAILED",
        }
    }

    /// HTTP status this error maps to at the API boundary.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(_)
            | Self::Migrate(_)
            | Self::Http(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::BankFeed(_)
            | Self::UploadFailed(_)
            | Self::DeleteFileFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AccountNotFound
            | Self::RoleNotFound
            | Self::ProjectNotFound
            | Self::BudgetNotFound
            | Self::ChallengeNotFound
            | Self::SponsorNotFound
            | Self::CategoryNotFound
            | Self::NewsNotFound
            | Self::TrackingNotFound
            | Self::DonationNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AccessDenied | Self::AdminAccessDenied => StatusCode::FORBIDDEN,
            Self::UserExisted | Self::DuplicateTitle => StatusCode::CONFLICT,
            Self::RoleNotExisted
            | Self::InvalidFinishDate
            | Self::InvalidAmount
            | Self::OldPasswordIncorrect
            | Self::NewPasswordMustDiffer
            | Self::ContractNotNull
            | Self::FileIsNotImage
            | Self::FileSizeExceedsLimit => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "code": self.code(),
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
