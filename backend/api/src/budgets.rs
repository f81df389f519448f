//! Project budgets — manager-gated CRUD.

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

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BudgetDto {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub unit_price: String,
    pub quantity: i64,
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBudgetRequest {
    pub title: String,
    pub unit_price: Decimal,
    pub quantity: i64,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBudgetRequest {
    pub title: Option<String>,
    pub unit_price: Option<Decimal>,
    pub quantity: Option<i64>,
    pub note: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────

pub async fn create_budget(
    pool: &SqlitePool,
    principal: &Principal,
    project_id: i64,
    req: &CreateBudgetRequest,
) -> Result<BudgetDto> {
    let _ = projects::get_project(pool, project_id).await?;
    auth::authorize_project_manager(pool, principal, project_id).await?;
    let unit_price = db::check_amount(req.unit_price)?;

    let res = sqlx::query(
        "INSERT INTO budgets (project_id, title, unit_price, quantity, note) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(project_id)
    .bind(&req.title)
    .bind(unit_price.to_string())
    .bind(req.quantity)
    .bind(&req.note)
    .execute(pool)
    .await?;
    get_budget(pool, res.last_insert_rowid()).await
}

pub async fn get_budget(pool: &SqlitePool, id: i64) -> Result<BudgetDto> {
    sqlx::query_as::<_, BudgetDto>(
        "SELECT id, project_id, title, unit_price, quantity, note FROM budgets WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::BudgetNotFound)
}

/// Public listing of a project's budget lines.
pub async fn list_for_project(pool: &SqlitePool, project_id: i64) -> Result<Vec<BudgetDto>> {
    let _ = projects::get_project(pool, project_id).await?;
    let rows = sqlx::query_as::<_, BudgetDto>(
        "SELECT id, project_id, title, unit_price, quantity, note FROM budgets WHERE project_id = ?1 ORDER BY id ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_budget(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
    req: &UpdateBudgetRequest,
) -> Result<BudgetDto> {
    let current = get_budget(pool, id).await?;
    auth::authorize_project_manager(pool, principal, current.project_id).await?;

    let unit_price = match req.unit_price {
        Some(v) => db::check_amount(v)?.to_string(),
        None => current.unit_price.clone(),
    };

    sqlx::query("UPDATE budgets SET title = ?1, unit_price = ?2, quantity = ?3, note = ?4 WHERE id = ?5")
        .bind(req.title.as_deref().unwrap_or(&current.title))
        .bind(unit_price)
        .bind(req.quantity.unwrap_or(current.quantity))
        .bind(req.note.as_deref().unwrap_or(&current.note))
        .bind(id)
        .execute(pool)
        .await?;
    get_budget(pool, id).await
}

pub async fn delete_budget(pool: &SqlitePool, principal: &Principal, id: i64) -> Result<()> {
    let current = get_budget(pool, id).await?;
    auth::authorize_project_manager(pool, principal, current.project_id).await?;

    sqlx::query("DELETE FROM budgets WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `POST /projects/:id/budgets`
pub async fn create_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateBudgetRequest>,
) -> Result<Json<BudgetDto>> {
    Ok(Json(create_budget(&state.pool, &principal, project_id, &req).await?))
}

/// `GET /projects/:id/budgets`
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
    Path(project_id): Path<i64>,
) -> Result<Json<Vec<BudgetDto>>> {
    Ok(Json(list_for_project(&state.pool, project_id).await?))
}

/// `PUT /budgets/:id`
pub async fn update_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
    Json(req): Json<UpdateBudgetRequest>,
) -> Result<Json<BudgetDto>> {
    Ok(Json(update_budget(&state.pool, &principal, id, &req).await?))
}

/// `DELETE /budgets/:id`
pub async fn delete_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    delete_budget(&state.pool, &principal, id).await?;
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

    async fn setup(pool: &SqlitePool) -> (Principal, Principal, Principal, i64) {
        let admin = mk_account(pool, "admin@x.io", "AD1", ROLE_ADMIN).await;
        let manager = mk_account(pool, "m@x.io", "MG1", ROLE_PROJECT_MANAGER).await;
        let stranger = mk_account(pool, "s@x.io", "ST1", ROLE_USER).await;
        let project = mk_project(pool, "PRJ1", "Water Wells", admin).await;
        mk_assign(pool, project, manager).await;
        (
            mk_principal(pool, admin).await,
            mk_principal(pool, manager).await,
            mk_principal(pool, stranger).await,
            project,
        )
    }

    fn req(title: &str, price: &str) -> CreateBudgetRequest {
        CreateBudgetRequest {
            title: title.to_string(),
            unit_price: price.parse().unwrap(),
            quantity: 10,
            note: String::new(),
        }
    }

    #[tokio::test]
    async fn manager_crud_round_trip() {
        let pool = test_pool().await;
        let (_, manager, _, project) = setup(&pool).await;

        let budget = create_budget(&pool, &manager, project, &req("Pipes", "12.50")).await.unwrap();
        assert_eq!(budget.unit_price, "12.50");

        let updated = update_budget(
            &pool,
            &manager,
            budget.id,
            &UpdateBudgetRequest {
                title: None,
                unit_price: Some("13.75".parse().unwrap()),
                quantity: Some(4),
                note: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.unit_price, "13.75");
        assert_eq!(updated.quantity, 4);

        delete_budget(&pool, &manager, budget.id).await.unwrap();
        assert_eq!(
            get_budget(&pool, budget.id).await.unwrap_err().code(),
            "BUDGET_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn stranger_denied_for_every_mutation() {
        let pool = test_pool().await;
        let (admin, _, stranger, project) = setup(&pool).await;
        let budget = create_budget(&pool, &admin, project, &req("Pipes", "12.50")).await.unwrap();

        assert_eq!(
            create_budget(&pool, &stranger, project, &req("Other", "1.00"))
                .await
                .unwrap_err()
                .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            update_budget(
                &pool,
                &stranger,
                budget.id,
                &UpdateBudgetRequest {
                    title: Some("x".into()),
                    unit_price: None,
                    quantity: None,
                    note: None,
                },
            )
            .await
            .unwrap_err()
            .code(),
            "ACCESS_DENIED"
        );
        assert_eq!(
            delete_budget(&pool, &stranger, budget.id).await.unwrap_err().code(),
            "ACCESS_DENIED"
        );
    }

    #[tokio::test]
    async fn unknown_project_fails_before_write() {
        let pool = test_pool().await;
        let (admin, ..) = setup(&pool).await;
        assert_eq!(
            create_budget(&pool, &admin, 404, &req("Pipes", "12.50"))
                .await
                .unwrap_err()
                .code(),
            "PROJECT_NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn negative_unit_price_rejected() {
        let pool = test_pool().await;
        let (admin, _, _, project) = setup(&pool).await;
        assert_eq!(
            create_budget(&pool, &admin, project, &req("Pipes", "-2.00"))
                .await
                .unwrap_err()
                .code(),
            "INVALID_AMOUNT"
        );
    }

    #[tokio::test]
    async fn listing_is_public_and_ordered() {
        let pool = test_pool().await;
        let (admin, _, _, project) = setup(&pool).await;
        create_budget(&pool, &admin, project, &req("Pipes", "12.50")).await.unwrap();
        create_budget(&pool, &admin, project, &req("Pumps", "80.00")).await.unwrap();

        let all = list_for_project(&pool, project).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].title, "Pipes");
    }
}
