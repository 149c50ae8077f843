//! Server-side sessions.
//!
//! Sessions are keyed by an opaque random token delivered via cookie; only
//! its SHA-256 hash is stored. Each session holds at most one authenticated
//! principal (user or admin) plus the anti-forgery token bound to it.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub token_hash: String,
    pub user_id: Option<String>,
    pub admin_id: Option<String>,
    pub csrf_token: String,
    pub expires_at: String,
    pub created_at: String,
}

impl Session {
    /// Create a session row. The caller generates and hashes the cookie
    /// token and the CSRF token; at most one of user/admin may be set.
    pub async fn create(
        db: &SqlitePool,
        token_hash: &str,
        user_id: Option<&str>,
        admin_id: Option<&str>,
        csrf_token: &str,
        ttl_hours: i64,
    ) -> Result<Session, sqlx::Error> {
        debug_assert!(user_id.is_none() || admin_id.is_none());

        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let expires_at = (now + chrono::Duration::hours(ttl_hours)).to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO sessions (id, token_hash, user_id, admin_id, csrf_token, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(token_hash)
        .bind(user_id)
        .bind(admin_id)
        .bind(csrf_token)
        .bind(&expires_at)
        .bind(now.to_rfc3339())
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    /// Look up a live session by token hash. Expired sessions are invisible.
    pub async fn find_by_token_hash(
        db: &SqlitePool,
        token_hash: &str,
    ) -> Result<Option<Session>, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(token_hash)
            .bind(&now)
            .fetch_optional(db)
            .await
    }

    /// Destroy the session server-side.
    pub async fn delete(db: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Remove expired rows. Returns how many were purged.
    pub async fn purge_expired(db: &SqlitePool) -> Result<u64, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(&now)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn expired_sessions_are_invisible_and_purgeable() {
        let db = test_pool().await;

        let live = Session::create(&db, "hash-live", Some("u1"), None, "csrf-1", 24)
            .await
            .unwrap();
        // TTL in the past
        Session::create(&db, "hash-dead", Some("u2"), None, "csrf-2", -1)
            .await
            .unwrap();

        assert!(Session::find_by_token_hash(&db, "hash-live")
            .await
            .unwrap()
            .is_some());
        assert!(Session::find_by_token_hash(&db, "hash-dead")
            .await
            .unwrap()
            .is_none());

        assert_eq!(Session::purge_expired(&db).await.unwrap(), 1);

        Session::delete(&db, &live.id).await.unwrap();
        assert!(Session::find_by_token_hash(&db, "hash-live")
            .await
            .unwrap()
            .is_none());
    }
}
