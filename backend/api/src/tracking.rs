//! Progress tracking entries — manager-gated updates with image galleries.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::ApiState;
use crate::auth::{self, Principal};
use crate::db;
use crate::errors::{AppError, Result};
use crate::projects;
use crate::storage::{validate, FileClass, ObjectStorage, UploadedFile, ValidatedFile};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrackingRow {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub content: String,
    pub date: i64,
}

/// Tracking entry with its image gallery; the gallery is always present,
/// possibly empty.
#[derive(Debug, Serialize)]
pub struct TrackingDto {
    #[serde(flatten)]
    pub tracking: TrackingRow,
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTrackingRequest {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub date: i64,
    #[serde(default)]
    pub images: Vec<UploadedFile>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTrackingRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub date: Option<i64>,
    /// Additional images appended to the gallery.
    #[serde(default)]
    pub images: Vec<UploadedFile>,
}

// ─────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────

fn validate_all(files: &[UploadedFile], max_bytes: u64) -> Result<Vec<ValidatedFile>> {
    files
        .iter()
        .map(|f| validate(f, FileClass::Image, max_bytes))
        .collect()
}

pub async fn create_tracking(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    project_id: i64,
    req: &CreateTrackingRequest,
) -> Result<TrackingDto> {
    let _ = projects::get_project(pool, project_id).await?;
    auth::authorize_project_manager(pool, principal, project_id).await?;

    // All images validated before any storage write.
    let validated = validate_all(&req.images, max_upload_bytes)?;
    let urls = storage.upload_many(&validated, "trackings")?;

    let mut tx = pool.begin().await?;
    let res = sqlx::query(
        "INSERT INTO trackings (project_id, title, content, date) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(project_id)
    .bind(&req.title)
    .bind(&req.content)
    .bind(req.date)
    .execute(&mut *tx)
    .await?;
    let id = res.last_insert_rowid();

    for url in &urls {
        sqlx::query("INSERT INTO tracking_images (tracking_id, url) VALUES (?1, ?2)")
            .bind(id)
            .bind(url)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    get_tracking(pool, id).await
}

pub async fn get_tracking(pool: &SqlitePool, id: i64) -> Result<TrackingDto> {
    let tracking = sqlx::query_as::<_, TrackingRow>(
        "SELECT id, project_id, title, content, date FROM trackings WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::TrackingNotFound)?;

    let images: Vec<(String,)> =
        sqlx::query_as("SELECT url FROM tracking_images WHERE tracking_id = ?1 ORDER BY id ASC")
            .bind(id)
            .fetch_all(pool)
            .await?;

    Ok(TrackingDto {
        tracking,
        images: images.into_iter().map(|(u,)| u).collect(),
    })
}

/// Public listing of a project's tracking history, newest first.
pub async fn list_for_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<TrackingDto>> {
    let _ = projects::get_project(pool, project_id).await?;
    let rows = sqlx::query_as::<_, TrackingRow>(
        "SELECT id, project_id, title, content, date FROM trackings WHERE project_id = ?1 ORDER BY date DESC, id DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for tracking in rows {
        let images: Vec<(String,)> = sqlx::query_as(
            "SELECT url FROM tracking_images WHERE tracking_id = ?1 ORDER BY id ASC",
        )
        .bind(tracking.id)
        .fetch_all(pool)
        .await?;
        out.push(TrackingDto {
            tracking,
            images: images.into_iter().map(|(u,)| u).collect(),
        });
    }
    Ok(out)
}

pub async fn update_tracking(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    id: i64,
    req: &UpdateTrackingRequest,
) -> Result<TrackingDto> {
    let current = get_tracking(pool, id).await?;
    auth::authorize_project_manager(pool, principal, current.tracking.project_id).await?;

    let validated = validate_all(&req.images, max_upload_bytes)?;
    let urls = storage.upload_many(&validated, "trackings")?;

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE trackings SET title = ?1, content = ?2, date = ?3 WHERE id = ?4")
        .bind(req.title.as_deref().unwrap_or(&current.tracking.title))
        .bind(req.content.as_deref().unwrap_or(&current.tracking.content))
        .bind(req.date.unwrap_or(current.tracking.date))
        .bind(id)
        .execute(&mut *tx)
        .await?;
    for url in &urls {
        sqlx::query("INSERT INTO tracking_images (tracking_id, url) VALUES (?1, ?2)")
            .bind(id)
            .bind(url)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    get_tracking(pool, id).await
}

/// Delete a tracking entry and all of its image objects; any storage
/// failure aborts before the rows are removed.
pub async fn delete_tracking(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    principal: &Principal,
    id: i64,
) -> Result<()> {
    let current = get_tracking(pool, id).await?;
    auth::authorize_project_manager(pool, principal, current.tracking.project_id).await?;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM tracking_images WHERE tracking_id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM trackings WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    for url in &current.images {
        storage.delete_by_url(url)?;
    }

    tx.commit().await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /projects/:id/trackings`
pub async fn create_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateTrackingRequest>,
) -> Result<Json<TrackingDto>> {
    Ok(Json(
        create_tracking(
            &state.pool,
            state.storage.as_ref(),
            state.config.max_upload_bytes,
            &principal,
            project_id,
            &req,
        )
        .await?,
    ))
}

/// `GET /projects/:id/trackings`
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<TrackingDto>>> {
    Ok(Json(list_for_project(&state.pool, project_id).await?))
}

/// `PUT /trackings/:id`
pub async fn update_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTrackingRequest>,
) -> Result<Json<TrackingDto>> {
    Ok(Json(
        update_tracking(
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

/// `DELETE /trackings/:id`
pub async fn delete_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    delete_tracking(&state.pool, state.storage.as_ref(), &principal, id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_PROJECT_MANAGER, ROLE_USER};
    use crate::db::test_pool;
    use crate::storage::testing::{file_of_len, FailingStorage, MemStorage};
    use crate::testutil::{mk_account, mk_assign, mk_principal, mk_project};

    const MAX: u64 = 2 * 1024 * 1024;

    async fn setup(pool: &SqlitePool) -> (Principal, i64) {
        let manager = mk_account(pool, "m@x.io", "MG1", ROLE_PROJECT_MANAGER).await;
        let project = mk_project(pool, "PRJ1", "Water Wells", manager).await;
        mk_assign(pool, project, manager).await;
        (mk_principal(pool, manager).await, project)
    }

    fn req(title: &str, n_images: usize) -> CreateTrackingRequest {
        CreateTrackingRequest {
            title: title.to_string(),
            content: "dug 3 wells".to_string(),
            date: db::now(),
            images: (0..n_images)
                .map(|i| file_of_len(&format!("img{i}.png"), "image/png", 64))
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_with_gallery() {
        let pool = test_pool().await;
        let (manager, project) = setup(&pool).await;
        let storage = MemStorage::default();

        let dto = create_tracking(&pool, &storage, MAX, &manager, project, &req("Week 1", 3))
            .await
            .unwrap();
        assert_eq!(dto.images.len(), 3);

        let listed = list_for_project(&pool, project).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].images.len(), 3);
    }

    #[tokio::test]
    async fn gallery_is_empty_vec_when_no_images() {
        let pool = test_pool().await;
        let (manager, project) = setup(&pool).await;
        let storage = MemStorage::default();

        let dto = create_tracking(&pool, &storage, MAX, &manager, project, &req("Week 1", 0))
            .await
            .unwrap();
        assert!(dto.images.is_empty());
    }

    #[tokio::test]
    async fn one_bad_image_blocks_the_whole_batch() {
        let pool = test_pool().await;
        let (manager, project) = setup(&pool).await;
        let storage = MemStorage::default();

        let mut r = req("Week 1", 2);
        r.images.push(file_of_len("notes.txt", "text/plain", 64));
        let err = create_tracking(&pool, &storage, MAX, &manager, project, &r)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_IS_NOT_IMAGE");
        assert!(storage.uploaded.lock().unwrap().is_empty());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trackings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn update_appends_images() {
        let pool = test_pool().await;
        let (manager, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_tracking(&pool, &storage, MAX, &manager, project, &req("Week 1", 1))
            .await
            .unwrap();

        let updated = update_tracking(
            &pool,
            &storage,
            MAX,
            &manager,
            dto.tracking.id,
            &UpdateTrackingRequest {
                title: Some("Week 1 (revised)".into()),
                content: None,
                date: None,
                images: vec![file_of_len("extra.png", "image/png", 64)],
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.tracking.title, "Week 1 (revised)");
        assert_eq!(updated.images.len(), 2);
    }

    #[tokio::test]
    async fn delete_is_atomic_against_storage_failure() {
        let pool = test_pool().await;
        let (manager, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_tracking(&pool, &storage, MAX, &manager, project, &req("Week 1", 2))
            .await
            .unwrap();

        let err = delete_tracking(&pool, &FailingStorage, &manager, dto.tracking.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DELETE_FILE_FAILED");
        assert_eq!(
            get_tracking(&pool, dto.tracking.id).await.unwrap().images.len(),
            2
        );

        delete_tracking(&pool, &storage, &manager, dto.tracking.id).await.unwrap();
        assert_eq!(
            get_tracking(&pool, dto.tracking.id).await.unwrap_err().code(),
            "TRACKING_NOT_FOUND"
        );
        assert_eq!(storage.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stranger_denied() {
        let pool = test_pool().await;
        let (manager, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_tracking(&pool, &storage, MAX, &manager, project, &req("Week 1", 0))
            .await
            .unwrap();

        let stranger = mk_account(&pool, "s@x.io", "ST1", ROLE_USER).await;
        let p = mk_principal(&pool, stranger).await;
        assert_eq!(
            create_tracking(&pool, &storage, MAX, &p, project, &req("Week 2", 0))
                .await
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            delete_tracking(&pool, &storage, &p, dto.tracking.id)
                .await
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
    }
}
