//! Accounts and roles — registration, listing, password and avatar flows.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::{ApiState, PageQuery, Paged};
use crate::auth::{self, Principal};
use crate::db;
use crate::errors::{AppError, Result};
use crate::storage::{validate, FileClass, ObjectStorage, UploadedFile};

// ─────────────────────────────────────────────────────────
// Rows & DTOs
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RoleDto {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub is_active: i64,
}

/// An account row joined with its role name; the password hash never
/// leaves the service layer.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AccountDto {
    pub id: i64,
    pub email: String,
    pub code: String,
    pub refer_code: String,
    pub fullname: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub role_id: i64,
    pub role: String,
    pub is_active: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    pub fullname: String,
    pub phone: Option<String>,
    pub password: String,
    pub role_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAccountRequest {
    pub fullname: Option<String>,
    /// Absent leaves the phone untouched; an explicit `null` clears it.
    #[serde(default, deserialize_with = "clearable")]
    pub phone: Option<Option<String>>,
}

/// Maps a present-but-null JSON field to `Some(None)` so it can be told
/// apart from an absent field (`None`).
fn clearable<'de, D>(de: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// `avatar = None` signals removal of the current avatar.
#[derive(Debug, Deserialize)]
pub struct UpdateAvatarRequest {
    pub avatar: Option<UploadedFile>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AccountFilter {
    pub fullname: Option<String>,
    pub role_id: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

const SELECT_ACCOUNT: &str = r#"
    SELECT a.id, a.email, a.code, a.refer_code, a.fullname, a.phone, a.avatar,
           a.role_id, r.name AS role, a.is_active, a.created_at
    FROM   accounts a
    JOIN   roles r ON r.id = a.role_id
"#;

// ─────────────────────────────────────────────────────────
// Account services
// ─────────────────────────────────────────────────────────

/// Register a new account (admin surface).
///
/// A duplicate email fails with `USER_EXISTED` and leaves the existing row
/// untouched; an unknown role fails with `ROLE_NOT_EXISTED` and writes
/// nothing.
pub async fn create_account(
    pool: &SqlitePool,
    principal: &Principal,
    req: &CreateAccountRequest,
) -> Result<AccountDto> {
    auth::require_admin(principal)?;

    let mut tx = pool.begin().await?;

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM accounts WHERE email = ?1")
        .bind(&req.email)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        return Err(AppError::UserExisted);
    }

    let role: Option<(i64,)> = sqlx::query_as("SELECT id FROM roles WHERE id = ?1 AND is_active = 1")
        .bind(req.role_id)
        .fetch_optional(&mut *tx)
        .await?;
    if role.is_none() {
        return Err(AppError::RoleNotExisted);
    }

    let res = sqlx::query(
        r#"
        INSERT INTO accounts (email, code, refer_code, fullname, phone, role_id, password_hash, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&req.email)
    .bind(db::short_code())
    .bind(db::short_code())
    .bind(&req.fullname)
    .bind(&req.phone)
    .bind(req.role_id)
    .bind(auth::hash_password(&req.password))
    .bind(db::now())
    .execute(&mut *tx)
    .await?;
    let id = res.last_insert_rowid();

    tx.commit().await?;
    get_account(pool, id).await
}

pub async fn get_account(pool: &SqlitePool, id: i64) -> Result<AccountDto> {
    let sql = format!("{SELECT_ACCOUNT} WHERE a.id = ?1");
    sqlx::query_as::<_, AccountDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::AccountNotFound)
}

/// Paginated account listing with optional fullname / role / active filters.
pub async fn list_accounts(
    pool: &SqlitePool,
    principal: &Principal,
    filter: &AccountFilter,
    page: &PageQuery,
) -> Result<Paged<AccountDto>> {
    auth::require_admin(principal)?;

    let clause = r#"
        WHERE (?1 IS NULL OR a.fullname LIKE '%' || ?1 || '%')
          AND (?2 IS NULL OR a.role_id = ?2)
          AND (?3 IS NULL OR a.is_active = ?3)
    "#;
    let is_active = filter.is_active.map(i64::from);

    let count_sql = format!("SELECT COUNT(*) FROM accounts a {clause}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.fullname)
        .bind(filter.role_id)
        .bind(is_active)
        .fetch_one(pool)
        .await?;

    let sql = format!("{SELECT_ACCOUNT} {clause} ORDER BY a.id ASC LIMIT ?4 OFFSET ?5");
    let items = sqlx::query_as::<_, AccountDto>(&sql)
        .bind(&filter.fullname)
        .bind(filter.role_id)
        .bind(is_active)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.wrap(total, items))
}

/// Update profile fields; allowed for the account itself or an admin.
pub async fn update_account(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    req: &UpdateAccountRequest,
) -> Result<AccountDto> {
    if principal.account_id != id && !principal.is_admin() {
        return Err(AppError::AccessDenied);
    }
    let current = get_account(pool, id).await?;

    let phone = match &req.phone {
        None => current.phone.as_deref(),
        Some(explicit) => explicit.as_deref(),
    };
    sqlx::query("UPDATE accounts SET fullname = ?1, phone = ?2 WHERE id = ?3")
        .bind(req.fullname.as_deref().unwrap_or(&current.fullname))
        .bind(phone)
        .bind(id)
        .execute(pool)
        .await?;

    get_account(pool, id).await
}

/// Soft enable/disable; accounts are never hard-deleted.
pub async fn set_active(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    active: bool,
) -> Result<AccountDto> {
    auth::require_admin(principal)?;
    let _ = get_account(pool, id).await?;
    sqlx::query("UPDATE accounts SET is_active = ?1 WHERE id = ?2")
        .bind(i64::from(active))
        .bind(id)
        .execute(pool)
        .await?;
    get_account(pool, id).await
}

/// Change the caller's own password.
pub async fn change_password(
    pool: &SqlitePool,
    principal: &Principal,
    req: &ChangePasswordRequest,
) -> Result<()> {
    let (stored,): (String,) = sqlx::query_as("SELECT password_hash FROM accounts WHERE id = ?1")
        .bind(principal.account_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::AccountNotFound)?;

    if !auth::verify_password(&req.old_password, &stored) {
        return Err(AppError::OldPasswordIncorrect);
    }
    if req.old_password == req.new_password {
        return Err(AppError::NewPasswordMustDiffer);
    }

    sqlx::query("UPDATE accounts SET password_hash = ?1 WHERE id = ?2")
        .bind(auth::hash_password(&req.new_password))
        .bind(principal.account_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Replace or remove the caller's avatar.
///
/// Validation and storage I/O both happen before the row is touched, so a
/// failed upload or delete leaves the account exactly as it was.
pub async fn update_avatar(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    req: &UpdateAvatarRequest,
) -> Result<AccountDto> {
    let current = get_account(pool, principal.account_id).await?;

    let new_url = match &req.avatar {
        Some(file) => {
            let validated = validate(file, FileClass::Image, max_upload_bytes)?;
            let url = storage.upload(&validated, "avatars")?;
            if let Some(old) = &current.avatar {
                storage.delete_by_url(old)?;
            }
            Some(url)
        }
        None => {
            if let Some(old) = &current.avatar {
                storage.delete_by_url(old)?;
            }
            None
        }
    };

    sqlx::query("UPDATE accounts SET avatar = ?1 WHERE id = ?2")
        .bind(&new_url)
        .bind(principal.account_id)
        .execute(pool)
        .await?;
    get_account(pool, principal.account_id).await
}

// ─────────────────────────────────────────────────────────
// Role services
// ─────────────────────────────────────────────────────────

pub async fn create_role(
    pool: &SqlitePool,
    principal: &Principal,
    req: &CreateRoleRequest,
) -> Result<RoleDto> {
    auth::require_admin(principal)?;

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM roles WHERE name = ?1")
        .bind(&req.name)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        return Err(AppError::DuplicateTitle);
    }

    let res = sqlx::query("INSERT INTO roles (name, description) VALUES (?1, ?2)")
        .bind(&req.name)
        .bind(&req.description)
        .execute(pool)
        .await?;
    get_role(pool, res.last_insert_rowid()).await
}

pub async fn get_role(pool: &SqlitePool, id: i64) -> Result<RoleDto> {
    sqlx::query_as::<_, RoleDto>(
        "SELECT id, name, description, is_active FROM roles WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::RoleNotFound)
}

pub async fn list_roles(pool: &SqlitePool) -> Result<Vec<RoleDto>> {
    let rows = sqlx::query_as::<_, RoleDto>(
        "SELECT id, name, description, is_active FROM roles ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_role(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    req: &UpdateRoleRequest,
) -> Result<RoleDto> {
    auth::require_admin(principal)?;
    let current = get_role(pool, id).await?;

    sqlx::query("UPDATE roles SET name = ?1, description = ?2, is_active = ?3 WHERE id = ?4")
        .bind(req.name.as_deref().unwrap_or(&current.name))
        .bind(req.description.as_deref().unwrap_or(&current.description))
        .bind(req.is_active.map(i64::from).unwrap_or(current.is_active))
        .bind(id)
        .execute(pool)
        .await?;
    get_role(pool, id).await
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /accounts`
pub async fn create_account_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<CreateAccountRequest>,
) -> Result<Json<AccountDto>> {
    Ok(Json(create_account(&state.pool, &principal, &req).await?))
}

/// `GET /accounts`
pub async fn list_accounts_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Query(filter): Query<AccountFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<AccountDto>>> {
    Ok(Json(
        list_accounts(&state.pool, &principal, &filter, &page).await?,
    ))
}

/// `GET /accounts/:id`
pub async fn get_account_handler(
    State(state): State<Arc<ApiState>>,
    _principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<AccountDto>> {
    Ok(Json(get_account(&state.pool, id).await?))
}

/// `PUT /accounts/:id`
pub async fn update_account_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateAccountRequest>,
) -> Result<Json<AccountDto>> {
    Ok(Json(update_account(&state.pool, &principal, id, &req).await?))
}

/// `PUT /accounts/:id/active`
pub async fn set_active_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<SetActiveRequest>,
) -> Result<Json<AccountDto>> {
    Ok(Json(set_active(&state.pool, &principal, id, req.is_active).await?))
}

/// `POST /accounts/password`
pub async fn change_password_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>> {
    change_password(&state.pool, &principal, &req).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// `PUT /accounts/avatar`
pub async fn update_avatar_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<UpdateAvatarRequest>,
) -> Result<Json<AccountDto>> {
    Ok(Json(
        update_avatar(
            &state.pool,
            state.storage.as_ref(),
            state.config.max_upload_bytes,
            &principal,
            &req,
        )
        .await?,
    ))
}

/// `POST /roles`
pub async fn create_role_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<CreateRoleRequest>,
) -> Result<Json<RoleDto>> {
    Ok(Json(create_role(&state.pool, &principal, &req).await?))
}

/// `GET /roles`
pub async fn list_roles_handler(
    State(state): State<Arc<ApiState>>,
    _principal: Principal,
) -> Result<Json<Vec<RoleDto>>> {
    Ok(Json(list_roles(&state.pool).await?))
}

/// `PUT /roles/:id`
pub async fn update_role_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<RoleDto>> {
    Ok(Json(update_role(&state.pool, &principal, id, &req).await?))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
