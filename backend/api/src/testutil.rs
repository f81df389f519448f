//! Shared fixtures for module tests.

use sqlx::SqlitePool;

use crate::auth::{hash_password, Principal};
use crate::db;

/// Resolve a seeded role id by name.
pub async fn role_id(pool: &SqlitePool, name: &str) -> i64 {
    let (id,): (i64,) = sqlx::query_as("SELECT id FROM roles WHERE name = ?1")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("seeded role");
    id
}

/// Insert an account with password `secret` and return its id.
pub async fn mk_account(pool: &SqlitePool, email: &str, code: &str, role: &str) -> i64 {
    let role_id = role_id(pool, role).await;
    let res = sqlx::query(
        r#"
        INSERT INTO accounts (email, code, refer_code, fullname, role_id, password_hash, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(email)
    .bind(code)
    .bind(format!("R-{code}"))
    .bind(format!("Account {code}"))
    .bind(role_id)
    .bind(hash_password("secret"))
    .bind(db::now())
    .execute(pool)
    .await
    .expect("insert account");
    res.last_insert_rowid()
}

/// Materialize a [`Principal`] for an existing account.
pub async fn mk_principal(pool: &SqlitePool, account_id: i64) -> Principal {
    let (email, role): (String, String) = sqlx::query_as(
        "SELECT a.email, r.name FROM accounts a JOIN roles r ON r.id = a.role_id WHERE a.id = ?1",
    )
    .bind(account_id)
    .fetch_one(pool)
    .await
    .expect("account exists");
    Principal {
        account_id,
        email,
        role,
    }
}

pub async fn mk_project(pool: &SqlitePool, code: &str, title: &str, created_by: i64) -> i64 {
    let now = db::now();
    let res = sqlx::query(
        "INSERT INTO projects (code, title, created_by, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
    )
    .bind(code)
    .bind(title)
    .bind(created_by)
    .bind(now)
    .execute(pool)
    .await
    .expect("insert project");
    res.last_insert_rowid()
}

pub async fn mk_assign(pool: &SqlitePool, project_id: i64, account_id: i64) {
    sqlx::query(
        r#"
        INSERT INTO assigns (project_id, account_id, created_by, updated_by, created_at)
        VALUES (?1, ?2, ?2, ?2, ?3)
        "#,
    )
    .bind(project_id)
    .bind(account_id)
    .bind(db::now())
    .execute(pool)
    .await
    .expect("insert assign");
}

pub async fn mk_challenge(
    pool: &SqlitePool,
    code: &str,
    title: &str,
    created_by: i64,
    finish_date: i64,
) -> i64 {
    let res = sqlx::query(
        r#"
        INSERT INTO challenges (code, title, finish_date, created_by, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(code)
    .bind(title)
    .bind(finish_date)
    .bind(created_by)
    .bind(db::now())
    .execute(pool)
    .await
    .expect("insert challenge");
    res.last_insert_rowid()
}

/// Insert a donation row; attribution columns may be `None`.
pub async fn mk_donation(
    pool: &SqlitePool,
    value: &str,
    created_by: Option<i64>,
    refer_id: Option<i64>,
    challenge_id: Option<i64>,
    project_id: Option<i64>,
) -> i64 {
    let res = sqlx::query(
        r#"
        INSERT INTO donations (value, description, created_by, refer_id, challenge_id, project_id, created_at)
        VALUES (?1, '', ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(value)
    .bind(created_by)
    .bind(refer_id)
    .bind(challenge_id)
    .bind(project_id)
    .bind(db::now())
    .execute(pool)
    .await
    .expect("insert donation");
    res.last_insert_rowid()
}
