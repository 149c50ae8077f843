//! Append-only audit trail for claim status transitions.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClaimHistory {
    pub id: String,
    pub claim_id: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_by: String,
    pub notes: Option<String>,
    pub created_at: String,
}

impl ClaimHistory {
    /// Insert an audit row on the caller's connection.
    ///
    /// Takes a bare connection so the claim update transaction can write the
    /// row inside itself; history must never commit separately from the
    /// status change it records.
    pub async fn insert(
        conn: &mut SqliteConnection,
        claim_id: &str,
        old_status: Option<&str>,
        new_status: &str,
        changed_by: &str,
        notes: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO claim_history (id, claim_id, old_status, new_status, changed_by, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(claim_id)
        .bind(old_status)
        .bind(new_status)
        .bind(changed_by)
        .bind(notes)
        .bind(&now)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Audit entries for one claim, oldest first.
    pub async fn list_for_claim(
        db: &SqlitePool,
        claim_id: &str,
    ) -> Result<Vec<ClaimHistory>, sqlx::Error> {
        // rowid breaks ties between entries written in the same instant
        sqlx::query_as(
            "SELECT * FROM claim_history WHERE claim_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(claim_id)
        .fetch_all(db)
        .await
    }
}
