//! Claim models and the status-transition engine.
//!
//! Transitions are unconstrained: any status is reachable from any other
//! via the admin update. What *is* guaranteed is atomicity: a status change
//! and its audit row commit together or not at all.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fmt;
use std::str::FromStr;

use super::claim_history::ClaimHistory;

/// The fixed vocabulary of claim states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    #[serde(rename = "Submitted")]
    Submitted,
    #[serde(rename = "In Review")]
    InReview,
    #[serde(rename = "Approved")]
    Approved,
    #[serde(rename = "Rejected")]
    Rejected,
    #[serde(rename = "Refunded")]
    Refunded,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Submitted => "Submitted",
            ClaimStatus::InReview => "In Review",
            ClaimStatus::Approved => "Approved",
            ClaimStatus::Rejected => "Rejected",
            ClaimStatus::Refunded => "Refunded",
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Submitted" => Ok(ClaimStatus::Submitted),
            "In Review" => Ok(ClaimStatus::InReview),
            "Approved" => Ok(ClaimStatus::Approved),
            "Rejected" => Ok(ClaimStatus::Rejected),
            "Refunded" => Ok(ClaimStatus::Refunded),
            other => Err(format!("Unknown claim status: {}", other)),
        }
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Claim {
    pub id: String,
    pub user_id: String,
    pub claim_type: String,
    pub reference_number: String,
    pub amount: f64,
    pub proof_file: Option<String>,
    pub description: String,
    pub status: String,
    pub admin_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Claim joined with its owner's name and email, for admin views
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClaimWithUser {
    pub id: String,
    pub user_id: String,
    pub claim_type: String,
    pub reference_number: String,
    pub amount: f64,
    pub proof_file: Option<String>,
    pub description: String,
    pub status: String,
    pub admin_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub user_name: String,
    pub user_email: String,
}

/// Failure modes of the status-update transaction
#[derive(Debug, thiserror::Error)]
pub enum UpdateStatusError {
    #[error("Claim not found.")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl Claim {
    /// Insert a new claim with status `Submitted`.
    ///
    /// No history row is written on creation; the audit trail begins at the
    /// first explicit transition.
    pub async fn create(
        db: &SqlitePool,
        user_id: &str,
        claim_type: &str,
        reference_number: &str,
        amount: f64,
        description: &str,
        proof_file: Option<&str>,
    ) -> Result<Claim, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO claims (id, user_id, claim_type, reference_number, amount, proof_file, description, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(claim_type)
        .bind(reference_number)
        .bind(amount)
        .bind(proof_file)
        .bind(description)
        .bind(ClaimStatus::Submitted.as_str())
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;

        sqlx::query_as("SELECT * FROM claims WHERE id = ?")
            .bind(&id)
            .fetch_one(db)
            .await
    }

    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<Claim>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM claims WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn list_for_user(db: &SqlitePool, user_id: &str) -> Result<Vec<Claim>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM claims WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(db)
            .await
    }

    /// List all claims joined with user details, optionally filtered by status.
    pub async fn list_with_users(
        db: &SqlitePool,
        status: Option<ClaimStatus>,
    ) -> Result<Vec<ClaimWithUser>, sqlx::Error> {
        match status {
            Some(status) => {
                sqlx::query_as(
                    r#"
                    SELECT c.*, u.name AS user_name, u.email AS user_email
                    FROM claims c JOIN users u ON c.user_id = u.id
                    WHERE c.status = ?
                    ORDER BY c.created_at DESC
                    "#,
                )
                .bind(status.as_str())
                .fetch_all(db)
                .await
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT c.*, u.name AS user_name, u.email AS user_email
                    FROM claims c JOIN users u ON c.user_id = u.id
                    ORDER BY c.created_at DESC
                    "#,
                )
                .fetch_all(db)
                .await
            }
        }
    }

    /// Whether a stored proof file belongs to one of the user's claims.
    pub async fn user_owns_proof(
        db: &SqlitePool,
        user_id: &str,
        proof_file: &str,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM claims WHERE user_id = ? AND proof_file = ?")
                .bind(user_id)
                .bind(proof_file)
                .fetch_one(db)
                .await?;
        Ok(count > 0)
    }

    /// Apply a status transition and record it in the audit trail, atomically.
    ///
    /// The first statement in the transaction is a write, so SQLite takes the
    /// write lock up front: concurrent updates to the same claim serialize,
    /// and the old-status read below always sees the last committed
    /// transition. On any failure the transaction rolls back as a whole;
    /// the claim row and its history never diverge.
    pub async fn update_status(
        db: &SqlitePool,
        claim_id: &str,
        new_status: ClaimStatus,
        notes: Option<&str>,
        admin_id: &str,
    ) -> Result<Claim, UpdateStatusError> {
        let mut tx = db.begin().await?;

        let touched = sqlx::query("UPDATE claims SET updated_at = updated_at WHERE id = ?")
            .bind(claim_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            // Dropping the transaction rolls it back; no history row exists.
            return Err(UpdateStatusError::NotFound);
        }

        let old_status: String = sqlx::query_scalar("SELECT status FROM claims WHERE id = ?")
            .bind(claim_id)
            .fetch_one(&mut *tx)
            .await?;

        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE claims SET status = ?, admin_notes = ?, updated_at = ? WHERE id = ?")
            .bind(new_status.as_str())
            .bind(notes)
            .bind(&now)
            .bind(claim_id)
            .execute(&mut *tx)
            .await?;

        ClaimHistory::insert(
            &mut *tx,
            claim_id,
            Some(&old_status),
            new_status.as_str(),
            admin_id,
            notes,
        )
        .await?;

        let claim = sqlx::query_as::<_, Claim>("SELECT * FROM claims WHERE id = ?")
            .bind(claim_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(
            claim_id = claim_id,
            old_status = %old_status,
            new_status = %new_status,
            admin_id = admin_id,
            "Claim status updated"
        );

        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::identity::ExternalIdentity;
    use crate::db::User;

    async fn seed_user(db: &SqlitePool) -> String {
        let external = ExternalIdentity {
            id: "ext-1".to_string(),
            email: "claimant@example.com".to_string(),
            email_verified: true,
            name: Some("Claimant".to_string()),
            phone: None,
        };
        User::upsert_from_external(db, &external, None, None)
            .await
            .unwrap()
            .id
    }

    #[test]
    fn status_round_trips_wire_strings() {
        for status in [
            ClaimStatus::Submitted,
            ClaimStatus::InReview,
            ClaimStatus::Approved,
            ClaimStatus::Rejected,
            ClaimStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<ClaimStatus>().unwrap(), status);
        }
        assert!("Pending".parse::<ClaimStatus>().is_err());
        assert!("in review".parse::<ClaimStatus>().is_err());
    }

    #[tokio::test]
    async fn create_starts_in_submitted_with_no_history() {
        let db = test_pool().await;
        let user_id = seed_user(&db).await;

        let claim = Claim::create(&db, &user_id, "Flight", "REF-1", 120.50, "Cancelled flight", None)
            .await
            .unwrap();
        assert_eq!(claim.status, "Submitted");

        let history = ClaimHistory::list_for_claim(&db, &claim.id).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn sequential_updates_chain_history_rows() {
        let db = test_pool().await;
        let user_id = seed_user(&db).await;
        let claim = Claim::create(&db, &user_id, "Flight", "REF-1", 120.50, "desc", None)
            .await
            .unwrap();

        Claim::update_status(&db, &claim.id, ClaimStatus::InReview, Some("looking"), "admin-1")
            .await
            .unwrap();
        Claim::update_status(&db, &claim.id, ClaimStatus::Approved, None, "admin-1")
            .await
            .unwrap();

        let history = ClaimHistory::list_for_claim(&db, &claim.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].old_status.as_deref(), Some("Submitted"));
        assert_eq!(history[0].new_status, "In Review");
        assert_eq!(history[1].old_status.as_deref(), Some("In Review"));
        assert_eq!(history[1].new_status, "Approved");
        assert_eq!(history[0].new_status, history[1].old_status.clone().unwrap());

        let updated = Claim::find_by_id(&db, &claim.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "Approved");
    }

    #[tokio::test]
    async fn update_on_missing_claim_writes_no_history() {
        let db = test_pool().await;

        let err = Claim::update_status(&db, "no-such-claim", ClaimStatus::Approved, None, "admin-1")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateStatusError::NotFound));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM claim_history")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn backwards_transitions_are_permitted() {
        let db = test_pool().await;
        let user_id = seed_user(&db).await;
        let claim = Claim::create(&db, &user_id, "Other", "REF-2", 10.0, "desc", None)
            .await
            .unwrap();

        Claim::update_status(&db, &claim.id, ClaimStatus::Refunded, None, "admin-1")
            .await
            .unwrap();
        Claim::update_status(&db, &claim.id, ClaimStatus::Submitted, None, "admin-1")
            .await
            .unwrap();

        let updated = Claim::find_by_id(&db, &claim.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "Submitted");
    }

    #[tokio::test]
    async fn concurrent_updates_serialize_and_chain_in_commit_order() {
        // File-backed pool with more than one connection so the two updates
        // really contend for the write lock.
        let dir = tempfile::tempdir().unwrap();
        let db = crate::db::init(dir.path()).await.unwrap();
        let user_id = seed_user(&db).await;
        let claim = Claim::create(&db, &user_id, "Flight", "REF-3", 42.0, "desc", None)
            .await
            .unwrap();

        let (a, b) = tokio::join!(
            Claim::update_status(&db, &claim.id, ClaimStatus::InReview, None, "admin-a"),
            Claim::update_status(&db, &claim.id, ClaimStatus::Rejected, None, "admin-b"),
        );
        a.unwrap();
        b.unwrap();

        let history = ClaimHistory::list_for_claim(&db, &claim.id).await.unwrap();
        assert_eq!(history.len(), 2);
        // Whichever committed second saw the first writer's status as its
        // old status, regardless of submission order.
        assert_eq!(history[0].old_status.as_deref(), Some("Submitted"));
        assert_eq!(
            history[1].old_status.as_deref(),
            Some(history[0].new_status.as_str())
        );

        let final_claim = Claim::find_by_id(&db, &claim.id).await.unwrap().unwrap();
        assert_eq!(final_claim.status, history[1].new_status);
    }
}
