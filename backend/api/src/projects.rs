//! Projects — CRUD, lifecycle status, and assign management.
//!
//! A project's child collections (assigns, sponsors, images) are always
//! materialized as explicit, possibly empty vectors on the detail DTO;
//! "no children" is never represented by a missing container.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::{ApiState, PageQuery, Paged};
use crate::auth::{self, Principal};
use crate::db;
use crate::errors::{AppError, Result};
use crate::sponsors::{self, SponsorDto};

// ─────────────────────────────────────────────────────────
// Rows & DTOs
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectDto {
    pub id: i64,
    pub code: String,
    pub title: String,
    pub description: String,
    pub status: i64,
    pub total_budget: String,
    pub amount_needed_to_raise: String,
    pub created_by: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AssignDto {
    pub account_id: i64,
    pub email: String,
    pub fullname: String,
    pub created_by: i64,
    pub updated_by: i64,
    pub created_at: i64,
}

/// Full project view; child collections are always present.
#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: ProjectDto,
    pub assigns: Vec<AssignDto>,
    pub sponsors: Vec<SponsorDto>,
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub total_budget: Decimal,
    pub amount_needed_to_raise: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub total_budget: Option<Decimal>,
    pub amount_needed_to_raise: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: i64,
}

#[derive(Debug, Deserialize)]
pub struct AddAssignRequest {
    pub account_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectFilter {
    /// Substring match on title.
    pub title: Option<String>,
    pub status: Option<i64>,
    /// Inclusive created-at range, epoch seconds.
    pub from: Option<i64>,
    pub to: Option<i64>,
}

const SELECT_PROJECT: &str = r#"
    SELECT id, code, title, description, status, total_budget,
           amount_needed_to_raise, created_by, created_at, updated_at
    FROM   projects
"#;

// ─────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────

pub async fn create_project(
    pool: &SqlitePool,
    principal: &Principal,
    req: &CreateProjectRequest,
) -> Result<ProjectDto> {
    auth::require_admin(principal)?;
    let total_budget = db::check_amount(req.total_budget)?;
    let needed = db::check_amount(req.amount_needed_to_raise)?;

    let mut tx = pool.begin().await?;

    let dup: Option<(i64,)> = sqlx::query_as("SELECT id FROM projects WHERE title = ?1")
        .bind(&req.title)
        .fetch_optional(&mut *tx)
        .await?;
    if dup.is_some() {
        return Err(AppError::DuplicateTitle);
    }

    let now = db::now();
    let res = sqlx::query(
        r#"
        INSERT INTO projects
            (code, title, description, total_budget, amount_needed_to_raise, created_by, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(db::short_code())
    .bind(&req.title)
    .bind(&req.description)
    .bind(total_budget.to_string())
    .bind(needed.to_string())
    .bind(principal.account_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let id = res.last_insert_rowid();

    tx.commit().await?;
    get_project(pool, id).await
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<ProjectDto> {
    let sql = format!("{SELECT_PROJECT} WHERE id = ?1");
    sqlx::query_as::<_, ProjectDto>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::ProjectNotFound)
}

/// Project detail with all child collections materialized.
pub async fn get_detail(pool: &SqlitePool, id: i64) -> Result<ProjectDetail> {
    let project = get_project(pool, id).await?;

    let assigns = sqlx::query_as::<_, AssignDto>(
        r#"
        SELECT s.account_id, a.email, a.fullname, s.created_by, s.updated_by, s.created_at
        FROM   assigns s
        JOIN   accounts a ON a.id = s.account_id
        WHERE  s.project_id = ?1
        ORDER  BY s.id ASC
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let sponsors = sponsors::list_for_project(pool, id).await?;

    let images: Vec<(String,)> =
        sqlx::query_as("SELECT url FROM project_images WHERE project_id = ?1 ORDER BY id ASC")
            .bind(id)
            .fetch_all(pool)
            .await?;

    Ok(ProjectDetail {
        project,
        assigns,
        sponsors,
        images: images.into_iter().map(|(u,)| u).collect(),
    })
}

/// Public paginated listing with title / status / date-range filters.
/// An out-of-range page is an empty page, never an error.
pub async fn list_projects(
    pool: &SqlitePool,
    filter: &ProjectFilter,
    page: &PageQuery,
) -> Result<Paged<ProjectDto>> {
    let clause = r#"
        WHERE (?1 IS NULL OR title LIKE '%' || ?1 || '%')
          AND (?2 IS NULL OR status = ?2)
          AND (?3 IS NULL OR created_at >= ?3)
          AND (?4 IS NULL OR created_at <= ?4)
    "#;

    let count_sql = format!("SELECT COUNT(*) FROM projects {clause}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(&filter.title)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(pool)
        .await?;

    let sql = format!("{SELECT_PROJECT} {clause} ORDER BY id ASC LIMIT ?5 OFFSET ?6");
    let items = sqlx::query_as::<_, ProjectDto>(&sql)
        .bind(&filter.title)
        .bind(filter.status)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.wrap(total, items))
}

/// Update project fields; admin or assignee only.
pub async fn update_project(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    req: &UpdateProjectRequest,
) -> Result<ProjectDto> {
    let current = get_project(pool, id).await?;
    auth::authorize_project_manager(pool, principal, id).await?;

    let mut tx = pool.begin().await?;

    if let Some(title) = &req.title {
        let dup: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM projects WHERE title = ?1 AND id != ?2")
                .bind(title)
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        if dup.is_some() {
            return Err(AppError::DuplicateTitle);
        }
    }

    let total_budget = match req.total_budget {
        Some(v) => db::check_amount(v)?.to_string(),
        None => current.total_budget.clone(),
    };
    let needed = match req.amount_needed_to_raise {
        Some(v) => db::check_amount(v)?.to_string(),
        None => current.amount_needed_to_raise.clone(),
    };

    sqlx::query(
        r#"
        UPDATE projects
        SET    title = ?1, description = ?2, total_budget = ?3,
               amount_needed_to_raise = ?4, updated_at = ?5
        WHERE  id = ?6
        "#,
    )
    .bind(req.title.as_deref().unwrap_or(&current.title))
    .bind(req.description.as_deref().unwrap_or(&current.description))
    .bind(total_budget)
    .bind(needed)
    .bind(db::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    get_project(pool, id).await
}

pub async fn set_status(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    status: i64,
) -> Result<ProjectDto> {
    auth::require_admin(principal)?;
    let _ = get_project(pool, id).await?;
    sqlx::query("UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status)
        .bind(db::now())
        .bind(id)
        .execute(pool)
        .await?;
    get_project(pool, id).await
}

/// Grant an account management rights over a project (admin surface).
/// Re-granting refreshes the audit fields instead of failing.
pub async fn add_assign(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: i64,
    account_id: i64,
) -> Result<()> {
    auth::require_admin(principal)?;
    let _ = get_project(pool, project_id).await?;
    let account: Option<(i64,)> = sqlx::query_as("SELECT id FROM accounts WHERE id = ?1")
        .bind(account_id)
        .fetch_optional(pool)
        .await?;
    if account.is_none() {
        return Err(AppError::AccountNotFound);
    }

    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM assigns WHERE project_id = ?1 AND account_id = ?2")
            .bind(project_id)
            .bind(account_id)
            .fetch_optional(pool)
            .await?;

    match existing {
        Some((assign_id,)) => {
            sqlx::query("UPDATE assigns SET updated_by = ?1 WHERE id = ?2")
                .bind(principal.account_id)
                .bind(assign_id)
                .execute(pool)
                .await?;
        }
        None => {
            sqlx::query(
                r#"
                INSERT INTO assigns (project_id, account_id, created_by, updated_by, created_at)
                VALUES (?1, ?2, ?3, ?3, ?4)
                "#,
            )
            .bind(project_id)
            .bind(account_id)
            .bind(principal.account_id)
            .bind(db::now())
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

pub async fn remove_assign(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: i64,
    account_id: i64,
) -> Result<()> {
    auth::require_admin(principal)?;
    let _ = get_project(pool, project_id).await?;
    sqlx::query("DELETE FROM assigns WHERE project_id = ?1 AND account_id = ?2")
        .bind(project_id)
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /projects`
pub async fn create_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(req): Json<CreateProjectRequest>,
) -> Result<Json<ProjectDto>> {
    Ok(Json(create_project(&state.pool, &principal, &req).await?))
}

/// `GET /projects`
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
    Query(filter): Query<ProjectFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<ProjectDto>>> {
    Ok(Json(list_projects(&state.pool, &filter, &page).await?))
}

/// `GET /projects/:id`
pub async fn detail_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Json<ProjectDetail>> {
    Ok(Json(get_detail(&state.pool, id).await?))
}

/// `PUT /projects/:id`
pub async fn update_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectDto>> {
    Ok(Json(update_project(&state.pool, &principal, id, &req).await?))
}

/// `PUT /projects/:id/status`
pub async fn set_status_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<ProjectDto>> {
    Ok(Json(set_status(&state.pool, &principal, id, req.status).await?))
}

/// `POST /projects/:id/assigns`
pub async fn add_assign_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<AddAssignRequest>,
) -> Result<Json<serde_json::Value>> {
    add_assign(&state.pool, &principal, id, req.account_id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

/// `DELETE /projects/:id/assigns/:account_id`
pub async fn remove_assign_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path((id, account_id)): Path<(i64, i64)>,
) -> Result<Json<serde_json::Value>> {
    remove_assign(&state.pool, &principal, id, account_id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_ADMIN, ROLE_PROJECT_MANAGER, ROLE_USER};
    use crate::db::test_pool;
    use crate::testutil::{mk_account, mk_assign, mk_principal, mk_project};

    async fn admin(pool: &SqlitePool) -> Principal {
        let id = mk_account(pool, "admin@x.io", "AD1", ROLE_ADMIN).await;
        mk_principal(pool, id).await
    }

    fn create_req(title: &str) -> CreateProjectRequest {
        CreateProjectRequest {
            title: title.to_string(),
            description: "desc".to_string(),
            total_budget: "5000.00".parse().unwrap(),
            amount_needed_to_raise: "3000.00".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn create_and_detail_with_empty_collections() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;

        let dto = create_project(&pool, &admin, &create_req("Clean Water")).await.unwrap();
        assert_eq!(dto.total_budget, "5000.00");
        assert_eq!(dto.status, 0);

        let detail = get_detail(&pool, dto.id).await.unwrap();
        assert!(detail.assigns.is_empty());
        assert!(detail.sponsors.is_empty());
        assert!(detail.images.is_empty());
    }

    #[tokio::test]
    async fn duplicate_title_rejected() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;
        create_project(&pool, &admin, &create_req("Clean Water")).await.unwrap();

        let err = create_project(&pool, &admin, &create_req("Clean Water"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_TITLE");
    }

    #[tokio::test]
    async fn negative_budget_rejected() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;
        let mut req = create_req("Bad Budget");
        req.total_budget = "-1.00".parse().unwrap();
        assert_eq!(
            create_project(&pool, &admin, &req).await.unwrap_err().code(),
            "INVALID_AMOUNT"
        );
    }

    #[tokio::test]
    async fn list_filters_and_out_of_range_page() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;
        create_project(&pool, &admin, &create_req("Water Wells")).await.unwrap();
        create_project(&pool, &admin, &create_req("School Books")).await.unwrap();

        let page = list_projects(
            &pool,
            &ProjectFilter {
                title: Some("Water".into()),
                ..Default::default()
            },
            &PageQuery::default(),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].title, "Water Wells");

        let empty = list_projects(
            &pool,
            &ProjectFilter::default(),
            &PageQuery { page: 99, size: 10 },
        )
        .await
        .unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.total, 2);
    }

    #[tokio::test]
    async fn assignee_may_update_stranger_may_not() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;
        let dto = create_project(&pool, &admin, &create_req("Water Wells")).await.unwrap();

        let manager = mk_account(&pool, "m@x.io", "MG1", ROLE_PROJECT_MANAGER).await;
        let stranger = mk_account(&pool, "s@x.io", "ST1", ROLE_USER).await;
        mk_assign(&pool, dto.id, manager).await;

        let req = UpdateProjectRequest {
            title: None,
            description: Some("updated".into()),
            total_budget: None,
            amount_needed_to_raise: None,
        };

        let p = mk_principal(&pool, manager).await;
        let updated = update_project(&pool, &p, dto.id, &req).await.unwrap();
        assert_eq!(updated.description, "updated");
        // Untouched money fields keep their exact representation.
        assert_eq!(updated.total_budget, "5000.00");

        let p = mk_principal(&pool, stranger).await;
        assert_eq!(
            update_project(&pool, &p, dto.id, &req).await.unwrap_err().code(),
            "ACCESS_DENIED"
        );
    }

    #[tokio::test]
    async fn update_to_existing_title_rejected() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;
        create_project(&pool, &admin, &create_req("First")).await.unwrap();
        let second = create_project(&pool, &admin, &create_req("Second")).await.unwrap();

        let err = update_project(
            &pool,
            &admin,
            second.id,
            &UpdateProjectRequest {
                title: Some("First".into()),
                description: None,
                total_budget: None,
                amount_needed_to_raise: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_TITLE");
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let pool = test_pool().await;
        assert_eq!(
            get_detail(&pool, 404).await.unwrap_err().code(),
            "PROJECT_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn assign_management() {
        let pool = test_pool().await;
        let admin_p = admin(&pool).await;
        let owner = mk_account(&pool, "o@x.io", "OW1", ROLE_USER).await;
        let manager = mk_account(&pool, "m@x.io", "MG1", ROLE_PROJECT_MANAGER).await;
        let project = mk_project(&pool, "PRJ1", "Water Wells", owner).await;

        // Unknown account fails before any write.
        assert_eq!(
            add_assign(&pool, &admin_p, project, 9999).await.unwrap_err().code(),
            "ACCOUNT_NOT_FOUND"
        );

        add_assign(&pool, &admin_p, project, manager).await.unwrap();
        // Re-granting is idempotent.
        add_assign(&pool, &admin_p, project, manager).await.unwrap();

        let detail = get_detail(&pool, project).await.unwrap();
        assert_eq!(detail.assigns.len(), 1);
        assert_eq!(detail.assigns[0].account_id, manager);
        assert_eq!(detail.assigns[0].created_by, admin_p.account_id);

        remove_assign(&pool, &admin_p, project, manager).await.unwrap();
        let detail = get_detail(&pool, project).await.unwrap();
        assert!(detail.assigns.is_empty());

        // Assign mutation is an admin surface.
        let p = mk_principal(&pool, manager).await;
        assert_eq!(
            add_assign(&pool, &p, project, manager).await.unwrap_err().code(),
            "ADMIN_ACCESS_DENIED"
        );
    }

    #[tokio::test]
    async fn status_lifecycle() {
        let pool = test_pool().await;
        let admin = admin(&pool).await;
        let dto = create_project(&pool, &admin, &create_req("Water Wells")).await.unwrap();

        let updated = set_status(&pool, &admin, dto.id, 2).await.unwrap();
        assert_eq!(updated.status, 2);
    }
}
