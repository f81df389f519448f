//! Challenges — secondary fundraising targets linked to projects.
//!
//! A challenge becomes immutable once its finish date has passed; delete
//! removes the thumbnail object and every challenge-project link in one
//! atomic operation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::{ApiState, PageQuery, Paged};
use crate::auth::Principal;
use crate::db;
use crate::errors::{AppError, Result};
use crate::ledger;
use crate::storage::{validate, FileClass, ObjectStorage, UploadedFile};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChallengeDto {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub content: String,
    pub thumbnail: Option<String>,
    pub goal: String,
    pub finish_date: i64,
    pub created_by: i64,
    pub created_at: i64,
}

/// Challenge detail with attributed donation totals and linked projects.
#[derive(Debug, Serialize)]
pub struct ChallengeDetail {
    #[serde(flatten)]
    pub challenge: ChallengeDto,
    pub project_ids: Vec<i64>,
    pub total_donations: Decimal,
    pub donation_count: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateChallengeRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub goal: Decimal,
    pub finish_date: i64,
    #[serde(default)]
    pub project_ids: Vec<i64>,
    pub thumbnail: Option<UploadedFile>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChallengeRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub goal: Option<Decimal>,
    pub finish_date: Option<i64>,
    pub thumbnail: Option<UploadedFile>,
    #[serde(default)]
    pub remove_thumbnail: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChallengeFilter {
    pub title: Option<String>,
    /// `true` keeps only finished challenges, `false` only active ones.
    pub finished: Option<bool>,
}

const SELECT_CHALLENGE: &str = r#"
    SELECT id, code, title, content, thumbnail, goal, finish_date, created_by, created_at
    FROM   challenges
"#;

/// Admin or the challenge's creator may mutate it, and only while it has
/// not finished.
fn check_mutable(principal: &Principal, challenge: &ChallengeDto) -> Result<()> {
    if !principal.is_admin() && principal.account_id != challenge.created_by {
        return Err(AppError::AccessDenied);
    }
    if challenge.finish_date <= db::now() {
        return Err(AppError::InvalidFinishDate);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────

pub async fn create_challenge(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    req: &CreateChallengeRequest,
) -> Result<ChallengeDto> {
    let goal = db::check_amount(req.goal)?;
    if req.finish_date <= db::now() {
        return Err(AppError::InvalidFinishDate);
    }

    let thumbnail = match &req.thumbnail {
        Some(f) => Some(validate(f, FileClass::Image, max_upload_bytes)?),
        None => None,
    };

    let mut tx = pool.begin().await?;

    let dup: Option<(i64,)> = sqlx::query_as("SELECT id FROM challenges WHERE title = ?1")
        .bind(&req.title)
        .fetch_optional(&mut *tx)
        .await?;
    if dup.is_some() {
        return Err(AppError::DuplicateTitle);
    }

    for project_id in &req.project_ids {
        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM projects WHERE id = ?1")
            .bind(project_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::ProjectNotFound);
        }
    }

    let thumbnail_url = match &thumbnail {
        Some(f) => Some(storage.upload(f, "challenges")?),
        None => None,
    };

    let res = sqlx::query(
        r#"
        INSERT INTO challenges (code, title, content, thumbnail, goal, finish_date, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(db::short_code())
    .bind(&req.title)
    .bind(&req.content)
    .bind(&thumbnail_url)
    .bind(goal.to_string())
    .bind(req.finish_date)
    .bind(principal.account_id)
    .bind(db::now())
    .execute(&mut *tx)
    .await?;
    let id = res.last_insert_rowid();

    for project_id in &req.project_ids {
        sqlx::query("INSERT INTO challenge_projects (challenge_id, project_id) VALUES (?1, ?2)")
            .bind(id)
            .bind(project_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    get_challenge(pool, id).await
}

pub async fn get_challenge(pool: &SqlitePool, id: i64) -> Result<ChallengeDto> {
    let sql = format!("{SELECT_CHALLENGE} WHERE id = ?1");
    sqlx::query_as::<_, ChallengeDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::ChallengeNotFound)
}

pub async fn get_detail(pool: &SqlitePool, id: i64) -> Result<ChallengeDetail> {
    let challenge = get_challenge(pool, id).await?;

    let links: Vec<(i64,)> = sqlx::query_as(
        "SELECT project_id FROM challenge_projects WHERE challenge_id = ?1 ORDER BY id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let (total_donations, donation_count) = ledger::totals_for_challenge(pool, id).await?;

    Ok(ChallengeDetail {
        challenge,
        project_ids: links.into_iter().map(|(p,)| p).collect(),
        total_donations,
        donation_count,
    })
}

pub async fn list_challenges(
    pool: &SqlitePool,
    filter: &ChallengeFilter,
    page: &PageQuery,
) -> Result<Paged<ChallengeDto>> {
    let clause = r#"
        WHERE (?1 IS NULL OR title LIKE '%' || ?1 || '%')
          AND (?2 IS NULL
               OR (?2 = 1 AND finish_date <= ?3)
               OR (?2 = 0 AND finish_date > ?3))
    "#;
    let finished = filter.finished.map(i64::from);
    let now = db::now();

    let count_sql = format!("SELECT COUNT(*) FROM challenges {clause}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.title)
        .bind(finished)
        .bind(now)
        .fetch_one(pool)
        .await?;

    let sql = format!("{SELECT_CHALLENGE} {clause} ORDER BY id ASC LIMIT ?4 OFFSET ?5");
    let items = sqlx::query_as::<_, ChallengeDto>(&sql)
        .bind(&filter.title)
        .bind(finished)
        .bind(now)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.wrap(total, items))
}

pub async fn update_challenge(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    id: i64,
    req: &UpdateChallengeRequest,
) -> Result<ChallengeDto> {
    let current = get_challenge(pool, id).await?;
    check_mutable(principal, &current)?;

    if let Some(goal) = req.goal {
        db::check_amount(goal)?;
    }
    if let Some(finish) = req.finish_date {
        if finish <= db::now() {
            return Err(AppError::InvalidFinishDate);
        }
    }

    let mut tx = pool.begin().await?;

    if let Some(title) = &req.title {
        let dup: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM challenges WHERE title = ?1 AND id != ?2")
                .bind(title)
                .bind(id)
                .fetch_optional(&mut *tx)
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
                let url = storage.upload(&validated, "challenges")?;
                if let Some(old) = &current.thumbnail {
                    storage.delete_by_url(old)?;
                }
                Some(url)
            }
            None => current.thumbnail.clone(),
        }
    };

    sqlx::query(
        r#"
        UPDATE challenges
        SET    title = ?1, content = ?2, thumbnail = ?3, goal = ?4, finish_date = ?5
        WHERE  id = ?6
        "#,
    )
    .bind(req.title.as_deref().unwrap_or(&current.title))
    .bind(req.content.as_deref().unwrap_or(&current.content))
    .bind(&thumbnail_url)
    .bind(
        req.goal
            .map(|g| g.to_string())
            .unwrap_or_else(|| current.goal.clone()),
    )
    .bind(req.finish_date.unwrap_or(current.finish_date))
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    get_challenge(pool, id).await
}

/// Delete a challenge, its project links, and its thumbnail object.
///
/// The thumbnail delete happens inside the transaction window: if the
/// storage call fails, the row and its links survive untouched.
pub async fn delete_challenge(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    principal: &Principal,
    id: i64,
) -> Result<()> {
    let current = get_challenge(pool, id).await?;
    if !principal.is_admin() && principal.account_id != current.created_by {
        return Err(AppError::AccessDenied);
    }

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM challenge_projects WHERE challenge_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM challenges WHERE id = ?1")
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

/// `POST /challenges`
pub async fn create_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<Json<ChallengeDto>> {
    Ok(Json(
        create_challenge(
            &state.pool,
            state.storage.as_ref(),
            state.config.max_upload_bytes,
            &principal,
            &req,
        )
        .await?,
    ))
}

/// `GET /challenges`
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<ChallengeFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<ChallengeDto>>> {
    Ok(Json(list_challenges(&state.pool, &filter, &page).await?))
}

/// `GET /challenges/:id`
pub async fn detail_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<ChallengeDetail>> {
    Ok(Json(get_detail(&state.pool, id).await?))
}

/// `PUT /challenges/:id`
pub async fn update_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateChallengeRequest>,
) -> Result<Json<ChallengeDto>> {
    Ok(Json(
        update_challenge(
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

/// `DELETE /challenges/:id`
pub async fn delete_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    delete_challenge(&state.pool, state.storage.as_ref(), &principal, id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
