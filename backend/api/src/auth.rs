//! Identity and authorization.
//!
//! The caller's identity is an explicit [`Principal`] value resolved once at
//! the edge (bearer-token extractor) and threaded through every service
//! call; there is no ambient security context.  The policy itself is pure
//! read-then-decide: admins pass unconditionally, everyone else needs an
//! `assigns` row linking them to the target project.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::api::ApiState;
use crate::db;
use crate::errors::{AppError, Result};

pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_PROJECT_MANAGER: &str = "Project Manager";
pub const ROLE_USER: &str = "User";

/// The authenticated caller.
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub account_id: i64,
    pub email: String,
    pub role: String,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

#[async_trait]
impl FromRequestParts<Arc<ApiState>> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ApiState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        // Anonymous callers are rejected before any database lookup.
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;
        let token = header.strip_prefix("Bearer ").ok_or(AppError::Unauthorized)?;
        resolve_token(&state.pool, token).await
    }
}

// ─────────────────────────────────────────────────────────
// Passwords & sessions
// ─────────────────────────────────────────────────────────

/// Salted digest in `salt$hex` form.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{salt}${}", digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, hash)) => digest(salt, password) == hash,
        None => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub account_id: i64,
    pub role: String,
}

/// Verify credentials and mint a session token.
pub async fn login(pool: &SqlitePool, req: &LoginRequest) -> Result<LoginResponse> {
    let row: Option<(i64, String, i64, String)> = sqlx::query_as(
        r#"
        SELECT a.id, a.password_hash, a.is_active, r.name
        FROM   accounts a
        JOIN   roles r ON r.id = a.role_id
        WHERE  a.email = ?1
        "#,
    )
    .bind(&req.email)
    .fetch_optional(pool)
    .await?;

    let (account_id, stored, is_active, role) = row.ok_or(AppError::Unauthorized)?;
    if is_active == 0 || !verify_password(&req.password, &stored) {
        return Err(AppError::Unauthorized);
    }

    let token = Uuid::new_v4().simple().to_string();
    sqlx::query("INSERT INTO sessions (token, account_id, created_at) VALUES (?1, ?2, ?3)")
        .bind(&token)
        .bind(account_id)
        .bind(db::now())
        .execute(pool)
        .await?;

    Ok(LoginResponse {
        token,
        account_id,
        role,
    })
}

/// Resolve a bearer token to a [`Principal`].
pub async fn resolve_token(pool: &SqlitePool, token: &str) -> Result<Principal> {
    let row: Option<(i64, String, i64, String)> = sqlx::query_as(
        r#"
        SELECT a.id, a.email, a.is_active, r.name
        FROM   sessions s
        JOIN   accounts a ON a.id = s.account_id
        JOIN   roles r ON r.id = a.role_id
        WHERE  s.token = ?1
        "#,
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    let (account_id, email, is_active, role) = row.ok_or(AppError::Unauthorized)?;
    if is_active == 0 {
        return Err(AppError::Unauthorized);
    }
    Ok(Principal {
        account_id,
        email,
        role,
    })
}

// ─────────────────────────────────────────────────────────
// Authorization policy
// ─────────────────────────────────────────────────────────

/// May `principal` perform a mutating operation on a resource owned by
/// `project_id`?  Admins always may; anyone else needs an assign row.
pub async fn authorize_project_manager(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: i64,
) -> Result<()> {
    if principal.is_admin() {
        return Ok(());
    }
    let assigned: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM assigns WHERE project_id = ?1 AND account_id = ?2")
            .bind(project_id)
            .bind(principal.account_id)
            .fetch_optional(pool)
            .await?;
    if assigned.is_some() {
        Ok(())
    } else {
        Err(AppError::AccessDenied)
    }
}

/// Gate for admin-only surfaces.
pub fn require_admin(principal: &Principal) -> Result<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(AppError::AdminAccessDenied)
    }
}
