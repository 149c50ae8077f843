//! Admin account model. Seeded at startup; no self-registration path.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdminUser {
    pub id: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: String,
}

impl AdminUser {
    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<AdminUser>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM admin_users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_username(
        db: &SqlitePool,
        username: &str,
    ) -> Result<Option<AdminUser>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM admin_users WHERE username = ?")
            .bind(username)
            .fetch_optional(db)
            .await
    }

    pub async fn create(
        db: &SqlitePool,
        username: &str,
        password_hash: &str,
    ) -> Result<AdminUser, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO admin_users (id, username, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(username)
        .bind(password_hash)
        .bind(&now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM admin_users WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn set_password_hash(
        db: &SqlitePool,
        username: &str,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE admin_users SET password_hash = ? WHERE username = ?")
            .bind(password_hash)
            .bind(username)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
