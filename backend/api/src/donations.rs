//! Donation records — admin listings and the manual ingestion hook.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::api::{ApiState, PageQuery, Paged};
use crate::auth::{self, Principal};
use crate::classify::{self, IncomingTransaction};
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DonationDto {
    pub id: i64,
    pub value: String,
    pub description: String,
    pub bank_ref: Option<String>,
    pub project_id: Option<i64>,
    pub challenge_id: Option<i64>,
    pub refer_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WrongDonationDto {
    pub id: i64,
    pub value: String,
    pub description: String,
    pub bank_ref: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct DonationFilter {
    pub project_id: Option<i64>,
    pub challenge_id: Option<i64>,
    /// Inclusive created-at range, epoch seconds.
    pub from: Option<i64>,
    pub to: Option<i64>,
}

// ─────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────

pub async fn list_donations(
    pool: &SqlitePool,
    principal: &Principal,
    filter: &DonationFilter,
    page: &PageQuery,
) -> Result<Paged<DonationDto>> {
    auth::require_admin(principal)?;

    let clause = r#"
        WHERE (?1 IS NULL OR project_id = ?1)
          AND (?2 IS NULL OR challenge_id = ?2)
          AND (?3 IS NULL OR created_at >= ?3)
          AND (?4 IS NULL OR created_at <= ?4)
    "#;

    let count_sql = format!("SELECT COUNT(*) FROM donations {clause}");
    let (total,): (i64,) = sqlx::query_as(&count_sql)
        .bind(filter.project_id)
        .bind(filter.challenge_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(pool)
        .await?;

    let sql = format!(
        r#"
        SELECT id, value, description, bank_ref, project_id, challenge_id,
               refer_id, created_by, created_at
        FROM   donations {clause}
        ORDER  BY id DESC LIMIT ?5 OFFSET ?6
        "#
    );
    let items = sqlx::query_as::<_, DonationDto>(&sql)
        .bind(filter.project_id)
        .bind(filter.challenge_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(page.wrap(total, items))
}

pub async fn get_donation(
    pool: &SqlitePool,
    principal: &Principal,
    id: i64,
) -> Result<DonationDto> {
    auth::require_admin(principal)?;
    sqlx::query_as::<_, DonationDto>(
        r#"
        SELECT id, value, description, bank_ref, project_id, challenge_id,
               refer_id, created_by, created_at
        FROM   donations WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::DonationNotFound)
}

/// Unattributed payments waiting for manual reconciliation.
pub async fn list_wrong_donations(
    pool: &SqlitePool,
    principal: &Principal,
    page: &PageQuery,
) -> Result<Paged<WrongDonationDto>> {
    auth::require_admin(principal)?;

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wrong_donations")
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as::<_, WrongDonationDto>(
        r#"
        SELECT id, value, description, bank_ref, created_at
        FROM   wrong_donations
        ORDER  BY id DESC LIMIT ?1 OFFSET ?2
        "#,
    )
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(page.wrap(total, items))
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /donations`
pub async fn list_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Query(filter): Query<DonationFilter>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<DonationDto>>> {
    Ok(Json(
        list_donations(&state.pool, &principal, &filter, &page).await?,
    ))
}

/// `GET /donations/:id`
pub async fn get_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<DonationDto>> {
    Ok(Json(get_donation(&state.pool, &principal, id).await?))
}

/// `GET /wrong-donations`
pub async fn list_wrong_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Query(page): Query<PageQuery>,
) -> Result<Json<Paged<WrongDonationDto>>> {
    Ok(Json(
        list_wrong_donations(&state.pool, &principal, &page).await?,
    ))
}

/// `POST /donations/incoming`
///
/// Manual ingestion hook for one bank transaction (admin surface); the
/// background feed poller takes the same path.
pub async fn incoming_handler(
    State(state): State<Arc<ApiState>>,
    principal: Principal,
    Json(txn): Json<IncomingTransaction>,
) -> Result<Json<classify::IncomingOutcome>> {
    auth::require_admin(&principal)?;
    let rules = classify::ClassifyRules::from_config(&state.config);
    Ok(Json(classify::record_incoming(&state.pool, &rules, &txn).await?))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{ROLE_ADMIN, ROLE_USER};
    use crate::db::test_pool;
    use crate::testutil::{mk_account, mk_donation, mk_principal, mk_project};

    #[tokio::test]
    async fn listing_is_admin_only() {
        let pool = test_pool().await;
        let user = mk_account(&pool, "u@x.io", "US1", ROLE_USER).await;
        let p = mk_principal(&pool, user).await;

        assert_eq!(
            list_donations(&pool, &p, &DonationFilter::default(), &PageQuery::default())
                .await
                .unwrap_err()
                .code(),
            "ADMIN_ACCESS_DENIED"
        );
        assert_eq!(
            list_wrong_donations(&pool, &p, &PageQuery::default())
                .await
                .unwrap_err()
                .code(),
            "ADMIN_ACCESS_DENIED"
        );
    }

    #[tokio::test]
    async fn lookup_by_id_is_admin_gated_and_404s() {
        let pool = test_pool().await;
        let admin = mk_account(&pool, "a@x.io", "AD1", ROLE_ADMIN).await;
        let p = mk_principal(&pool, admin).await;
        let donor = mk_account(&pool, "d@x.io", "DN1", ROLE_USER).await;
        let id = mk_donation(&pool, "75.00", Some(donor), None, None, None).await;

        let dto = get_donation(&pool, &p, id).await.unwrap();
        assert_eq!(dto.value, "75.00");
        assert_eq!(dto.created_by, Some(donor));

        assert_eq!(
            get_donation(&pool, &p, 9_999).await.unwrap_err().code(),
            "DONATION_NOT_FOUND"
        );

        let user_p = mk_principal(&pool, donor).await;
        assert_eq!(
            get_donation(&pool, &user_p, id).await.unwrap_err().code(),
            "ADMIN_ACCESS_DENIED"
        );
    }

    #[tokio::test]
    async fn filters_by_project_and_date_range() {
        let pool = test_pool().await;
        let admin = mk_account(&pool, "a@x.io", "AD1", ROLE_ADMIN).await;
        let p = mk_principal(&pool, admin).await;
        let donor = mk_account(&pool, "d@x.io", "DN1", ROLE_USER).await;
        let project = mk_project(&pool, "PRJ1", "Water Wells", admin).await;

        mk_donation(&pool, "100.00", Some(donor), None, None, Some(project)).await;
        mk_donation(&pool, "50.00", Some(donor), None, None, None).await;

        let page = list_donations(
            &pool,
            &p,
            &DonationFilter {
                project_id: Some(project),
                ..Default::default()
            },
            &PageQuery::default(),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].value, "100.00");

        // A from-bound in the future excludes everything.
        let page = list_donations(
            &pool,
            &p,
            &DonationFilter {
                from: Some(crate::db::now() + 1000),
                ..Default::default()
            },
            &PageQuery::default(),
        )
        .await
        .unwrap();
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }
}
