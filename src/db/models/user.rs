//! User models and identity-mirror reconciliation.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::identity::ExternalIdentity;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub external_id: Option<String>,
    pub credit_amount: f64,
    pub credit_note: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// User fields safe to return to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub credit_amount: f64,
    pub credit_note: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            email_verified: user.email_verified,
            credit_amount: user.credit_amount,
            credit_note: user.credit_note,
        }
    }
}

impl User {
    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(db)
            .await
    }

    pub async fn count(db: &SqlitePool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM users").fetch_one(db).await
    }

    /// Reconcile an externally authenticated identity with the local mirror.
    ///
    /// Matches by external id first, then by email. Name and phone are only
    /// filled in when the local record has none; the verified flag always
    /// tracks the provider. When no record matches, a new user is inserted
    /// with a random unusable placeholder credential; the provider remains
    /// the sole authority for that record.
    ///
    /// Idempotent: repeated calls with the same identity write at most one
    /// row and converge on the same local user.
    pub async fn upsert_from_external(
        db: &SqlitePool,
        external: &ExternalIdentity,
        fallback_name: Option<&str>,
        fallback_phone: Option<&str>,
    ) -> Result<User, sqlx::Error> {
        let name = fallback_name
            .map(str::to_string)
            .or_else(|| external.name.clone())
            .unwrap_or_else(|| {
                external
                    .email
                    .split('@')
                    .next()
                    .unwrap_or(&external.email)
                    .to_string()
            });
        let phone = fallback_phone
            .map(str::to_string)
            .or_else(|| external.phone.clone());
        let now = chrono::Utc::now().to_rfc3339();

        let existing: Option<User> =
            sqlx::query_as("SELECT * FROM users WHERE external_id = ? OR email = ? LIMIT 1")
                .bind(&external.id)
                .bind(&external.email)
                .fetch_optional(db)
                .await?;

        if let Some(current) = existing {
            let keep_name = !current.name.trim().is_empty();
            let name = if keep_name { current.name.clone() } else { name };
            let phone = current.phone.clone().or(phone);

            sqlx::query(
                r#"
                UPDATE users
                SET external_id = ?, email = ?, name = ?, phone = ?, email_verified = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&external.id)
            .bind(&external.email)
            .bind(&name)
            .bind(&phone)
            .bind(external.email_verified)
            .bind(&now)
            .bind(&current.id)
            .execute(db)
            .await?;

            return sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(&current.id)
                .fetch_one(db)
                .await;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let placeholder = crate::api::auth::placeholder_password_hash();

        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, phone, email_verified, external_id, credit_amount, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&name)
        .bind(&external.email)
        .bind(&placeholder)
        .bind(&phone)
        .bind(external.email_verified)
        .bind(&external.id)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    /// Returns the updated user, or None if the id is unknown.
    pub async fn update_profile(
        db: &SqlitePool,
        id: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<Option<User>, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE users SET name = ?, phone = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(phone)
            .bind(&now)
            .bind(id)
            .execute(db)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find_by_id(db, id).await
    }

    pub async fn set_password_hash(
        db: &SqlitePool,
        id: &str,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(&now)
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Overwrite the admin-granted credit fields.
    ///
    /// A single overwritable field, not a ledger: prior adjustments leave no
    /// trail. Returns the updated user, or None if the id is unknown.
    pub async fn set_credit(
        db: &SqlitePool,
        id: &str,
        amount: f64,
        note: Option<&str>,
    ) -> Result<Option<User>, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();
        let result =
            sqlx::query("UPDATE users SET credit_amount = ?, credit_note = ?, updated_at = ? WHERE id = ?")
                .bind(amount)
                .bind(note)
                .bind(&now)
                .bind(id)
                .execute(db)
                .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Self::find_by_id(db, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    fn external(verified: bool) -> ExternalIdentity {
        ExternalIdentity {
            id: "ext-123".to_string(),
            email: "jane@example.com".to_string(),
            email_verified: verified,
            name: Some("Jane Doe".to_string()),
            phone: None,
        }
    }

    #[tokio::test]
    async fn upsert_from_external_is_idempotent() {
        let db = test_pool().await;

        let first = User::upsert_from_external(&db, &external(false), None, None)
            .await
            .unwrap();
        let second = User::upsert_from_external(&db, &external(false), None, None)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(User::count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_syncs_verified_flag_and_keeps_existing_name() {
        let db = test_pool().await;

        let created = User::upsert_from_external(&db, &external(false), Some("Custom Name"), None)
            .await
            .unwrap();
        assert_eq!(created.name, "Custom Name");
        assert!(!created.email_verified);

        // Second sign-in: provider now reports verified; name must not be clobbered.
        let updated = User::upsert_from_external(&db, &external(true), None, None)
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.name, "Custom Name");
        assert!(updated.email_verified);
    }

    #[tokio::test]
    async fn upsert_matches_existing_user_by_email() {
        let db = test_pool().await;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO users (id, name, email, phone, email_verified, credit_amount, created_at, updated_at)
             VALUES ('u1', 'Jane', 'jane@example.com', '555-0100', 0, 0, ?, ?)",
        )
        .bind(&now)
        .bind(&now)
        .execute(&db)
        .await
        .unwrap();

        let user = User::upsert_from_external(&db, &external(true), None, None)
            .await
            .unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.external_id.as_deref(), Some("ext-123"));
        assert_eq!(user.phone.as_deref(), Some("555-0100"));
        assert_eq!(User::count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_credit_overwrites_and_reports_missing_user() {
        let db = test_pool().await;
        let user = User::upsert_from_external(&db, &external(true), None, None)
            .await
            .unwrap();

        let updated = User::set_credit(&db, &user.id, 25.50, Some("goodwill"))
            .await
            .unwrap()
            .expect("user exists");
        assert_eq!(updated.credit_amount, 25.50);
        assert_eq!(updated.credit_note.as_deref(), Some("goodwill"));

        let missing = User::set_credit(&db, "no-such-id", 10.0, None).await.unwrap();
        assert!(missing.is_none());
    }
}
