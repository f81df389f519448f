//! Sponsors — company pledges against a project, with contract and logo
//! attachments.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::ApiState;
use crate::auth::{self, Principal};
use crate::db;
use crate::errors::{AppError, Result};
use crate::projects;
use crate::storage::{validate, FileClass, ObjectStorage, UploadedFile};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SponsorDto {
    pub id: i64,
    pub project_id: i64,
    pub company_name: String,
    pub value: String,
    pub contract: String,
    pub logo: Option<String>,
}

/// The contract document is mandatory on create; the logo is optional.
#[derive(Debug, Deserialize)]
pub struct CreateSponsorRequest {
    pub company_name: String,
    pub value: Decimal,
    pub contract: Option<UploadedFile>,
    pub logo: Option<UploadedFile>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSponsorRequest {
    pub company_name: Option<String>,
    pub value: Option<Decimal>,
    /// Replacement contract document; `None` keeps the current one.
    pub contract: Option<UploadedFile>,
    pub logo: Option<UploadedFile>,
    /// Explicit removal signal for the logo.
    #[serde(default)]
    pub remove_logo: bool,
}

// ─────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────

pub async fn create_sponsor(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    project_id: i64,
    req: &CreateSponsorRequest,
) -> Result<SponsorDto> {
    let _ = projects::get_project(pool, project_id).await?;
    auth::authorize_project_manager(pool, principal, project_id).await?;
    let value = db::check_amount(req.value)?;

    // Validate both files before any storage I/O so a bad logo cannot
    // leave an orphaned contract object behind.
    let contract = req.contract.as_ref().ok_or(AppError::ContractNotNull)?;
    let contract = validate(contract, FileClass::Document, max_upload_bytes)?;
    let logo = match &req.logo {
        Some(f) => Some(validate(f, FileClass::Image, max_upload_bytes)?),
        None => None,
    };

    let contract_url = storage.upload(&contract, "contracts")?;
    let logo_url = match &logo {
        Some(f) => Some(storage.upload(f, "logos")?),
        None => None,
    };

    let res = sqlx::query(
        "INSERT INTO sponsors (project_id, company_name, value, contract, logo) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(project_id)
    .bind(&req.company_name)
    .bind(value.to_string())
    .bind(&contract_url)
    .bind(&logo_url)
    .execute(pool)
    .await?;
    get_sponsor(pool, res.last_insert_rowid()).await
}

pub async fn get_sponsor(pool: &SqlitePool, id: i64) -> Result<SponsorDto> {
    sqlx::query_as::<_, SponsorDto>(
        "SELECT id, project_id, company_name, value, contract, logo FROM sponsors WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::SponsorNotFound)
}

pub async fn list_for_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<SponsorDto>> {
    let rows = sqlx::query_as::<_, SponsorDto>(
        "SELECT id, project_id, company_name, value, contract, logo FROM sponsors WHERE project_id = ?1 ORDER BY id ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Update sponsor fields and attachments atomically: storage I/O happens
/// before the row is written, so a failed upload or delete leaves both the
/// row and the previously stored objects in place.
pub async fn update_sponsor(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    max_upload_bytes: u64,
    principal: &Principal,
    id: i64,
    req: &UpdateSponsorRequest,
) -> Result<SponsorDto> {
    let current = get_sponsor(pool, id).await?;
    auth::authorize_project_manager(pool, principal, current.project_id).await?;

    let value = match req.value {
        Some(v) => db::check_amount(v)?.to_string(),
        None => current.value.clone(),
    };

    // Validate everything up front.
    let new_contract = match &req.contract {
        Some(f) => Some(validate(f, FileClass::Document, max_upload_bytes)?),
        None => None,
    };
    let new_logo = match &req.logo {
        Some(f) => Some(validate(f, FileClass::Image, max_upload_bytes)?),
        None => None,
    };

    let contract_url = match new_contract {
        Some(f) => {
            let url = storage.upload(&f, "contracts")?;
            storage.delete_by_url(&current.contract)?;
            url
        }
        None => current.contract.clone(),
    };

    let logo_url = if req.remove_logo {
        if let Some(old) = &current.logo {
            storage.delete_by_url(old)?;
        }
        None
    } else {
        match new_logo {
            Some(f) => {
                let url = storage.upload(&f, "logos")?;
                if let Some(old) = &current.logo {
                    storage.delete_by_url(old)?;
                }
                Some(url)
            }
            None => current.logo.clone(),
        }
    };

    sqlx::query(
        "UPDATE sponsors SET company_name = ?1, value = ?2, contract = ?3, logo = ?4 WHERE id = ?5",
    )
    .bind(req.company_name.as_deref().unwrap_or(&current.company_name))
    .bind(value)
    .bind(&contract_url)
    .bind(&logo_url)
    .bind(id)
    .execute(pool)
    .await?;
    get_sponsor(pool, id).await
}

/// Delete a sponsor and both of its stored objects; a storage failure
/// aborts before the row is removed.
pub async fn delete_sponsor(
    pool: &SqlitePool,
    storage: &dyn ObjectStorage,
    principal: &Principal,
    id: i64,
) -> Result<()> {
    let current = get_sponsor(pool, id).await?;
    auth::authorize_project_manager(pool, principal, current.project_id).await?;

    storage.delete_by_url(&current.contract)?;
    if let Some(logo) = &current.logo {
        storage.delete_by_url(logo)?;
    }

    sqlx::query("DELETE FROM sponsors WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /projects/:id/sponsors`
pub async fn create_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateSponsorRequest>,
) -> Result<Json<SponsorDto>> {
    Ok(Json(
        create_sponsor(
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

/// `GET /projects/:id/sponsors`
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<SponsorDto>>> {
    let _ = projects::get_project(&state.pool, project_id).await?;
    Ok(Json(list_for_project(&state.pool, project_id).await?))
}

/// `PUT /sponsors/:id`
pub async fn update_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSponsorRequest>,
) -> Result<Json<SponsorDto>> {
    Ok(Json(
        update_sponsor(
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

/// `DELETE /sponsors/:id`
pub async fn delete_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    delete_sponsor(&state.pool, state.storage.as_ref(), &principal, id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_ADMIN, ROLE_USER};
    use crate::db::test_pool;
    use crate::storage::testing::{file_of_len, FailingStorage, MemStorage};
    use crate::testutil::{mk_account, mk_principal, mk_project};

    const MAX: u64 = 2 * 1024 * 1024;

    async fn setup(pool: &SqlitePool) -> (Principal, i64) {
        let admin = mk_account(pool, "admin@x.io", "AD1", ROLE_ADMIN).await;
        let project = mk_project(pool, "PRJ1", "Water Wells", admin).await;
        (mk_principal(pool, admin).await, project)
    }

    fn req_with_contract() -> CreateSponsorRequest {
        CreateSponsorRequest {
            company_name: "Acme Corp".into(),
            value: "10000.00".parse().unwrap(),
            contract: Some(file_of_len("contract.pdf", "application/pdf", 256)),
            logo: Some(file_of_len("logo.png", "image/png", 128)),
        }
    }

    #[tokio::test]
    async fn create_requires_contract() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();

        let mut req = req_with_contract();
        req.contract = None;
        let err = create_sponsor(&pool, &storage, MAX, &admin, project, &req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONTRACT_NOT_NULL");
        assert!(storage.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_uploads_both_objects() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();

        let dto = create_sponsor(&pool, &storage, MAX, &admin, project, &req_with_contract())
            .await
            .unwrap();
        assert!(dto.contract.starts_with("mem://contracts/"));
        assert!(dto.logo.as_deref().unwrap().starts_with("mem://logos/"));
        assert_eq!(dto.value, "10000.00");
        assert_eq!(storage.uploaded.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_logo_blocks_contract_upload() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();

        let mut req = req_with_contract();
        req.logo = Some(file_of_len("logo.txt", "text/plain", 128));
        let err = create_sponsor(&pool, &storage, MAX, &admin, project, &req)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_IS_NOT_IMAGE");
        // Validation runs before any upload, so nothing was stored.
        assert!(storage.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_delete_keeps_row_and_fields() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_sponsor(&pool, &storage, MAX, &admin, project, &req_with_contract())
            .await
            .unwrap();

        let err = delete_sponsor(&pool, &FailingStorage, &admin, dto.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DELETE_FILE_FAILED");
        // Sponsor survives the failed delete.
        assert_eq!(get_sponsor(&pool, dto.id).await.unwrap().id, dto.id);
    }

    #[tokio::test]
    async fn delete_removes_row_and_objects() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_sponsor(&pool, &storage, MAX, &admin, project, &req_with_contract())
            .await
            .unwrap();

        delete_sponsor(&pool, &storage, &admin, dto.id).await.unwrap();
        assert_eq!(
            get_sponsor(&pool, dto.id).await.unwrap_err().code(),
            "SPONSOR_NOT_FOUND"
        );
        assert_eq!(storage.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_replaces_logo_and_deletes_old() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_sponsor(&pool, &storage, MAX, &admin, project, &req_with_contract())
            .await
            .unwrap();
        let old_logo = dto.logo.clone().unwrap();

        let updated = update_sponsor(
            &pool,
            &storage,
            MAX,
            &admin,
            dto.id,
            &UpdateSponsorRequest {
                company_name: Some("Acme Intl".into()),
                value: None,
                contract: None,
                logo: Some(file_of_len("logo2.png", "image/png", 64)),
                remove_logo: false,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.company_name, "Acme Intl");
        assert_ne!(updated.logo.as_deref(), Some(old_logo.as_str()));
        assert!(storage.deleted.lock().unwrap().contains(&old_logo));
        // Contract untouched.
        assert_eq!(updated.contract, dto.contract);
    }

    #[tokio::test]
    async fn non_assigned_account_denied() {
        let pool = test_pool().await;
        let (admin, project) = setup(&pool).await;
        let storage = MemStorage::default();
        let dto = create_sponsor(&pool, &storage, MAX, &admin, project, &req_with_contract())
            .await
            .unwrap();

        let stranger = mk_account(&pool, "s@x.io", "ST1", ROLE_USER).await;
        let p = mk_principal(&pool, stranger).await;

        assert_eq!(
            create_sponsor(&pool, &storage, MAX, &p, project, &req_with_contract())
                .await
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            delete_sponsor(&pool, &storage, &p, dto.id).await.unwrap_err().code(),
            "ACCESS_DENIED"
        );
    }
}
