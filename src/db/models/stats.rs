//! Read-only aggregation queries over claims.
//!
//! Pure derived views; the dataset is small enough that correctness trumps
//! latency and nothing here is cached.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Per-user claim summary for the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct UserClaimStats {
    pub total_claims: i64,
    pub pending_claims: i64,
    pub success_count: i64,
    /// Sum of amounts in success states, plus any admin-granted credit
    pub total_value: f64,
    /// Whole-number percentage, 0 when the user has no claims
    pub success_rate: i64,
}

#[derive(Debug, Clone, FromRow)]
struct UserClaimCounts {
    total_claims: i64,
    pending_claims: i64,
    success_count: i64,
    success_value: f64,
}

/// System-wide claim summary for the admin dashboard
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AdminClaimStats {
    pub total_claims: i64,
    pub pending_claims: i64,
    pub approved_claims: i64,
    pub rejected_claims: i64,
    pub refunded_claims: i64,
    /// Aggregate amount across all statuses, not just successes
    pub total_value: f64,
}

/// Success rate as a whole-number percentage, rounded to nearest.
/// Zero total means zero rate, never a division by zero.
pub fn success_rate(success_count: i64, total_claims: i64) -> i64 {
    if total_claims <= 0 {
        return 0;
    }
    ((success_count as f64 / total_claims as f64) * 100.0).round() as i64
}

impl UserClaimStats {
    pub async fn for_user(
        db: &SqlitePool,
        user_id: &str,
        credit_amount: f64,
    ) -> Result<UserClaimStats, sqlx::Error> {
        let counts: UserClaimCounts = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total_claims,
                COUNT(CASE WHEN status IN ('Submitted', 'In Review') THEN 1 END) AS pending_claims,
                COUNT(CASE WHEN status IN ('Approved', 'Refunded') THEN 1 END) AS success_count,
                COALESCE(SUM(CASE WHEN status IN ('Approved', 'Refunded') THEN amount END), 0.0) AS success_value
            FROM claims
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(db)
        .await?;

        Ok(UserClaimStats {
            total_claims: counts.total_claims,
            pending_claims: counts.pending_claims,
            success_count: counts.success_count,
            total_value: counts.success_value + credit_amount,
            success_rate: success_rate(counts.success_count, counts.total_claims),
        })
    }
}

impl AdminClaimStats {
    pub async fn for_all_claims(db: &SqlitePool) -> Result<AdminClaimStats, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT
                COUNT(*) AS total_claims,
                COUNT(CASE WHEN status IN ('Submitted', 'In Review') THEN 1 END) AS pending_claims,
                COUNT(CASE WHEN status = 'Approved' THEN 1 END) AS approved_claims,
                COUNT(CASE WHEN status = 'Rejected' THEN 1 END) AS rejected_claims,
                COUNT(CASE WHEN status = 'Refunded' THEN 1 END) AS refunded_claims,
                COALESCE(SUM(amount), 0) AS total_value
            FROM claims
            "#,
        )
        .fetch_one(db)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, Claim, ClaimStatus, User};
    use crate::identity::ExternalIdentity;

    #[test]
    fn success_rate_handles_zero_total() {
        assert_eq!(success_rate(0, 0), 0);
        assert_eq!(success_rate(5, 0), 0);
    }

    #[test]
    fn success_rate_rounds_to_nearest_percent() {
        assert_eq!(success_rate(2, 4), 50);
        assert_eq!(success_rate(1, 3), 33);
        assert_eq!(success_rate(2, 3), 67);
        assert_eq!(success_rate(4, 4), 100);
    }

    async fn seed_user(db: &sqlx::SqlitePool) -> String {
        let external = ExternalIdentity {
            id: "ext-stats".to_string(),
            email: "stats@example.com".to_string(),
            email_verified: true,
            name: None,
            phone: None,
        };
        User::upsert_from_external(db, &external, None, None)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn user_stats_count_only_success_amounts_plus_credit() {
        let db = test_pool().await;
        let user_id = seed_user(&db).await;

        let approved = Claim::create(&db, &user_id, "Flight", "R1", 100.0, "d", None)
            .await
            .unwrap();
        let rejected = Claim::create(&db, &user_id, "Purchase", "R2", 50.0, "d", None)
            .await
            .unwrap();
        Claim::create(&db, &user_id, "Other", "R3", 25.0, "d", None)
            .await
            .unwrap();

        Claim::update_status(&db, &approved.id, ClaimStatus::Approved, None, "admin")
            .await
            .unwrap();
        Claim::update_status(&db, &rejected.id, ClaimStatus::Rejected, None, "admin")
            .await
            .unwrap();

        let stats = UserClaimStats::for_user(&db, &user_id, 10.0).await.unwrap();
        assert_eq!(stats.total_claims, 3);
        assert_eq!(stats.pending_claims, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_value, 110.0);
        assert_eq!(stats.success_rate, 33);
    }

    #[tokio::test]
    async fn user_stats_for_user_with_no_claims() {
        let db = test_pool().await;
        let user_id = seed_user(&db).await;

        let stats = UserClaimStats::for_user(&db, &user_id, 0.0).await.unwrap();
        assert_eq!(stats.total_claims, 0);
        assert_eq!(stats.success_rate, 0);
        assert_eq!(stats.total_value, 0.0);
    }

    #[tokio::test]
    async fn admin_stats_sum_across_all_statuses() {
        let db = test_pool().await;
        let user_id = seed_user(&db).await;

        let c1 = Claim::create(&db, &user_id, "Flight", "R1", 100.0, "d", None)
            .await
            .unwrap();
        Claim::create(&db, &user_id, "Other", "R2", 40.0, "d", None)
            .await
            .unwrap();
        Claim::update_status(&db, &c1.id, ClaimStatus::Refunded, None, "admin")
            .await
            .unwrap();

        let stats = AdminClaimStats::for_all_claims(&db).await.unwrap();
        assert_eq!(stats.total_claims, 2);
        assert_eq!(stats.pending_claims, 1);
        assert_eq!(stats.refunded_claims, 1);
        assert_eq!(stats.total_value, 140.0);
    }
}
