//! Axum REST surface — shared state, pagination shapes, and the router.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::errors::Result;
use crate::storage::ObjectStorage;
use crate::{accounts, auth, budgets, challenges, donations, ledger, news, projects, sponsors, tracking};

pub struct ApiState {
    pub pool: SqlitePool,
    pub config: Config,
    pub storage: Arc<dyn ObjectStorage>,
}

// ─────────────────────────────────────────────────────────
// Shared response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Zero-based page selector carried on listing endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub size: i64,
}

fn default_page_size() -> i64 {
    20
}

impl Default for PageQuery {
    fn default() -> Self {
        Self { page: 0, size: 20 }
    }
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.size.clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        // Saturate rather than overflow on absurd-but-valid page numbers;
        // a saturated offset is past the end of any table and yields an
        // empty page.
        self.page.max(0).saturating_mul(self.limit())
    }

    pub fn wrap<T>(&self, total: i64, items: Vec<T>) -> Paged<T> {
        Paged {
            page: self.page.max(0),
            size: self.limit(),
            total,
            items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub page: i64,
    pub size: i64,
    pub total: i64,
    pub items: Vec<T>,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /auth/login`
pub async fn login_handler(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<auth::LoginRequest>,
) -> Result<Json<auth::LoginResponse>> {
    Ok(Json(auth::login(&state.pool, &req).await?))
}

// ─────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login_handler))
        // Accounts & roles
        .route(
            "/accounts",
            post(accounts::create_account_handler).get(accounts::list_accounts_handler),
        )
        .route(
            "/accounts/:id",
            get(accounts::get_account_handler).put(accounts::update_account_handler),
        )
        .route("/accounts/:id/active", put(accounts::set_active_handler))
        .route("/accounts/password", post(accounts::change_password_handler))
        .route("/accounts/avatar", put(accounts::update_avatar_handler))
        .route(
            "/roles",
            post(accounts::create_role_handler).get(accounts::list_roles_handler),
        )
        .route("/roles/:id", put(accounts::update_role_handler))
        // Projects & assigns
        .route(
            "/projects",
            post(projects::create_handler).get(projects::list_handler),
        )
        .route(
            "/projects/:id",
            get(projects::detail_handler).put(projects::update_handler),
        )
        .route("/projects/:id/status", put(projects::set_status_handler))
        .route("/projects/:id/assigns", post(projects::add_assign_handler))
        .route(
            "/projects/:id/assigns/:account_id",
            delete(projects::remove_assign_handler),
        )
        // Budgets
        .route(
            "/projects/:id/budgets",
            post(budgets::create_handler).get(budgets::list_handler),
        )
        .route(
            "/budgets/:id",
            put(budgets::update_handler).delete(budgets::delete_handler),
        )
        // Sponsors
        .route(
            "/projects/:id/sponsors",
            post(sponsors::create_handler).get(sponsors::list_handler),
        )
        .route(
            "/sponsors/:id",
            put(sponsors::update_handler).delete(sponsors::delete_handler),
        )
        // Trackings
        .route(
            "/projects/:id/trackings",
            post(tracking::create_handler).get(tracking::list_handler),
        )
        .route(
            "/trackings/:id",
            put(tracking::update_handler).delete(tracking::delete_handler),
        )
        // Challenges
        .route(
            "/challenges",
            post(challenges::create_handler).get(challenges::list_handler),
        )
        .route(
            "/challenges/:id",
            get(challenges::detail_handler)
                .put(challenges::update_handler)
                .delete(challenges::delete_handler),
        )
        // News & categories
        .route(
            "/categories",
            post(news::create_category_handler).get(news::list_categories_handler),
        )
        .route("/categories/:id", put(news::update_category_handler))
        .route(
            "/news",
            post(news::create_news_handler).get(news::list_news_handler),
        )
        .route(
            "/news/:id",
            get(news::get_news_handler)
                .put(news::update_news_handler)
                .delete(news::delete_news_handler),
        )
        // Donations & ledger
        .route("/donations", get(donations::list_handler))
        .route("/donations/incoming", post(donations::incoming_handler))
        .route("/donations/:id", get(donations::get_handler))
        .route("/wrong-donations", get(donations::list_wrong_handler))
        .route("/ledger/accounts/:code", get(ledger::account_totals_handler))
        .route(
            "/admin/ledger/accounts/:code",
            get(ledger::admin_account_totals_handler),
        )
        .route("/ledger/top-ambassadors", get(ledger::top_ambassadors_handler))
        .route("/ledger/top-donors", get(ledger::top_donors_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
