//! News articles and their categories.  Mutations are admin surfaces;
//! reads are public.

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

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CategoryDto {
    pub id: i64,
    pub title: String,
    pub is_active: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NewsDto {
    pub id: i64,
    pub category_id: i64,
    pub category: String,
    pub title: String,
    pub content: String,
    pub thumbnail: Option<String>,
    pub created_by: i64,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCategoryRequest {
    pub title: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateNewsRequest {
    pub category_id: i64,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub thumbnail: Option<UploadedFile>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateNewsRequest {
    pub category_id: Option<i64>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub thumbnail: Option<UploadedFile>,
    #[serde(default)]
    pub remove_thumbnail: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewsFilter {
    pub title: Option<String>,
    pub category_id: Option<i64>,
}

const SELECT_NEWS: &str = r#"
    SELECT n.id, n.category_id, c.title AS category, n.title, n.content,
           n.thumbnail, n.created_by, n.created_at
    FROM   news n
    JOIN   categories c ON c.id = n.category_id
"#;

// ─────────────────────────────────────────────────────────
// Category services
// ─────────────────────────────────────────────────────────

pub async fn create_category(
    pool: &SqlitePool,
    principal: &Principal,
    req: &CreateCategoryRequest,
) -> Result<CategoryDto> {
    auth::require_admin(principal)?;

    let dup: Option<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE title = ?1")
        .bind(&req.title)
        .fetch_optional(pool)
        .await?;
    if dup.is_some() {
        return Err(AppError::DuplicateTitle);
    }

    let res = sqlx::query("INSERT INTO categories (title) VALUES (?1)")
        .bind(&req.title)
        .execute(pool)
        .await?;
    get_category(pool, res.last_insert_rowid()).await
}

pub async fn get_category(pool: &SqlitePool, id: i64) -> Result<CategoryDto> {
    sqlx::query_as::<_, CategoryDto>("SELECT id, title, is_active FROM categories WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::CategoryNotFound)
}

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<CategoryDto>> {
    let rows = sqlx::query_as::<_, CategoryDto>(
        "SELECT id, title, is_active FROM categories ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_category(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    req: &UpdateCategoryRequest,
) -> Result<CategoryDto> {
    auth::require_admin(principal)?;
    let current = get_category(pool, id).await?;

    if let Some(title) = &req.title {
        let dup: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM categories WHERE title = ?1 AND id != ?2")
                .bind(title)
                .bind(id)
                .fetch_optional(pool)
                .await?;
        if dup.is_some() {
            return Err(AppError::DuplicateTitle);
        }
    }

    sqlx::query("UPDATE categories SET title = ?1, is_active = ?2 WHERE id = ?3")
        .bind(req.title.as_deref().unwrap_or(&current.title))
        .bind(req.is_active.map(i64::from).unwrap_or(current.is_active))
        .bind(id)
        .execute(pool)
        .await?;
    get_category(pool, id).await
}

// ─────────────────────────────────────────────────────────
// News services
// ─────────────────────────────────────────────────────────

pub async fn create_news(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    req: &CreateNewsRequest,
) -> Result<NewsDto> {
    auth::require_admin(principal)?;
    let _ = get_category(pool, req.category_id).await?;

    let thumbnail = match &req.thumbnail {
        Some(f) => Some(validate(f, FileClass::Image, max_upload_bytes)?),
        None => None,
    };

    let mut tx = pool.begin().await?;

    let dup: Option<(i64,)> = sqlx::query_as("SELECT id FROM news WHERE title = ?1")
        .bind(&req.title)
        .fetch_optional(&mut *tx)
        .await?;
    if dup.is_some() {
        return Err(AppError::DuplicateTitle);
    }

    let thumbnail_url = match &thumbnail {
        Some(f) => Some(storage.upload(f, "news")?),
        None => None,
    };

    let res = sqlx::query(
        r#"
        INSERT INTO news (category_id, title, content, thumbnail, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(req.category_id)
    .bind(&req.title)
    .bind(&req.content)
    .bind(&thumbnail_url)
    .bind(principal.account_id)
    .bind(db::now())
    .execute(&mut *tx)
    .await?;
    let id = res.last_insert_rowid();

    tx.commit().await?;
    get_news(pool, id).await
}

pub async fn get_news(pool: &SqlitePool, id: i64) -> Result<NewsDto> {
    let sql = format!("{SELECT_NEWS} WHERE n.id = ?1");
    sqlx::query_as::<_, NewsDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NewsNotFound)
}

pub async fn list_news(
    pool: &SqlitePool,
    filter: &NewsFilter,
    page: &PageQuery,
) -> Result<Paged<NewsDto>> {
    let clause = r#"
        WHERE (?1 IS NULL OR n.title LIKE '%' || ?1 || '%')
          AND (?2 IS NULL OR n.category_id = ?2)
    "#;

    let count_sql = format!("SELECT COUNT(*) FROM news n {clause}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.title)
        .bind(filter.category_id)
        .fetch_one(pool)
        .await?;

    let sql = format!("{SELECT_NEWS} {clause} ORDER BY n.id DESC LIMIT ?3 OFFSET ?4");
    let items = sqlx::query_as::<_, NewsDto>(&sql)
        .bind(&filter.title)
        .bind(filter.category_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.wrap(total, items))
}

pub async fn update_news(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    id: i64,
    req: &UpdateNewsRequest,
) -> Result<NewsDto> {
    auth::require_admin(principal)?;
    let current = get_news(pool, id).await?;

    if let Some(category_id) = req.category_id {
        let _ = get_category(pool, category_id).await?;
    }
    if let Some(title) = &req.title {
        let dup: Option<(i64,)> = sqlx::query_as("SELECT id FROM news WHERE title = ?1 AND id != ?2")
            .bind(title)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        if dup.is_some() {
            return Err(AppError::DuplicateTitle);
        }
    }

    let thumbnail_url = if req.remove_thumbnail {
        if let Some(old) = &current.thumbnail {
            storage.delete_by_url(old)?;
        }
        None
    } else {
        match &req.thumbnail {
            Some(f) => {
                let validated = validate(f, FileClass::Image, max_upload_bytes)?;
                let url = storage.upload(&validated, "news")?;
                if let Some(old) = &current.thumbnail {
                    storage.delete_by_url(old)?;
                }
                Some(url)
            }
            None => current.thumbnail.clone(),
        }
    };

    sqlx::query(
        "UPDATE news SET category_id = ?1, title = ?2, content = ?3, thumbnail = ?4 WHERE id = ?5",
    )
    .bind(req.category_id.unwrap_or(current.category_id))
    .bind(req.title.as_deref().unwrap_or(&current.title))
    .bind(req.content.as_deref().unwrap_or(&current.content))
    .bind(&thumbnail_url)
    .bind(id)
    .execute(pool)
    .await?;
    get_news(pool, id).await
}

/// Delete an article and its thumbnail object; a storage failure keeps
/// the row.
pub async fn delete_news(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    principal: &Principal,
    id: i64,
) -> Result<()> {
    auth::require_admin(principal)?;
    let current = get_news(pool, id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM news WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if let Some(thumbnail) = &current.thumbnail {
        storage.delete_by_url(thumbnail)?;
    }

    tx.commit().await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /categories`
pub async fn create_category_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<Json<CategoryDto>> {
    Ok(Json(create_category(&state.pool, &principal, &req).await?))
}

/// `GET /categories`
pub async fn list_categories_handler(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<CategoryDto>>> {
    Ok(Json(list_categories(&state.pool).await?))
}

/// `PUT /categories/:id`
pub async fn update_category_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCategoryRequest>,
) -> Result<Json<CategoryDto>> {
    Ok(Json(update_category(&state.pool, &principal, id, &req).await?))
}

/// `POST /news`
pub async fn create_news_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<CreateNewsRequest>,
) -> Result<Json<NewsDto>> {
    Ok(Json(
        create_news(
            &state.pool,
            state.storage.as_ref(),
            state.config.max_upload_bytes,
            &principal,
            &req,
        )
        .await?,
    ))
}

/// `GET /news`
pub async fn list_news_handler(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<NewsFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<NewsDto>>> {
    Ok(Json(list_news(&state.pool, &filter, &page).await?))
}

/// `GET /news/:id`
pub async fn get_news_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<NewsDto>> {
    Ok(Json(get_news(&state.pool, id).await?))
}

/// `PUT /news/:id`
pub async fn update_news_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateNewsRequest>,
) -> Result<Json<NewsDto>> {
    Ok(Json(
        update_news(
            &state.pool,
            state.storage.as_ref(),
            state.config.max_upload_bytes,
            &principal,
            id,
            &req,
        )
        .await?,
    ))
}

/// `DELETE /news/:id`
pub async fn delete_news_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    delete_news(&state.pool, state.storage.as_ref(), &principal, id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
