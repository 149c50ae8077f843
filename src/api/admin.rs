//! Admin endpoints: login, dashboard aggregates, claim review, user credits.

use axum::{
    extract::{Query, State},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::auth::{establish_session, verify_password, CurrentAdmin};
use super::error::ApiError;
use super::validation::{normalize_text, parse_amount};
use crate::db::{
    AdminClaimStats, AdminUser, Claim, ClaimHistory, ClaimStatus, ClaimWithUser,
    UpdateStatusError, User, UserResponse,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/admin/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<AdminLoginRequest>,
) -> Result<(CookieJar, Json<super::MessageResponse>), ApiError> {
    let username = normalize_text(&req.username, 100);

    // Same response for unknown username and wrong password.
    let invalid = || ApiError::unauthorized("Invalid credentials");

    let admin = AdminUser::find_by_username(&state.db, &username)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &admin.password_hash) {
        return Err(invalid());
    }

    let (jar, _session) = establish_session(&state, jar, None, Some(&admin.id)).await?;

    tracing::info!(admin_id = %admin.id, "Admin logged in");

    Ok((jar, Json(super::MessageResponse::ok("Login successful!"))))
}

#[derive(Debug, Serialize)]
pub struct AdminDashboardResponse {
    pub success: bool,
    pub stats: AdminClaimStats,
    #[serde(rename = "totalUsers")]
    pub total_users: i64,
}

/// GET /api/admin/dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    _admin: CurrentAdmin,
) -> Result<Json<AdminDashboardResponse>, ApiError> {
    let stats = AdminClaimStats::for_all_claims(&state.db).await?;
    let total_users = User::count(&state.db).await?;

    Ok(Json(AdminDashboardResponse {
        success: true,
        stats,
        total_users,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListClaimsQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListClaimsResponse {
    pub success: bool,
    pub claims: Vec<ClaimWithUser>,
}

/// GET /api/admin/claims
///
/// `?status=` filters by lifecycle state; absent or "All" lists everything.
pub async fn list_claims(
    State(state): State<Arc<AppState>>,
    _admin: CurrentAdmin,
    Query(query): Query<ListClaimsQuery>,
) -> Result<Json<ListClaimsResponse>, ApiError> {
    let filter = match query.status.as_deref() {
        None | Some("") | Some("All") => None,
        Some(raw) => Some(
            ClaimStatus::from_str(raw)
                .map_err(|e| ApiError::validation_field("status", e.to_string()))?,
        ),
    };

    let claims = Claim::list_with_users(&state.db, filter).await?;

    Ok(Json(ListClaimsResponse {
        success: true,
        claims,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateClaimRequest {
    #[serde(rename = "claimId")]
    pub claim_id: String,
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UpdateClaimResponse {
    pub success: bool,
    pub message: String,
    pub history: Vec<ClaimHistory>,
}

/// POST /api/admin/claims/update
pub async fn update_claim_status(
    State(state): State<Arc<AppState>>,
    admin: CurrentAdmin,
    Json(req): Json<UpdateClaimRequest>,
) -> Result<Json<UpdateClaimResponse>, ApiError> {
    let new_status = ClaimStatus::from_str(&req.status)
        .map_err(|e| ApiError::validation_field("status", e.to_string()))?;
    let notes = req
        .notes
        .as_deref()
        .map(|n| normalize_text(n, 2000))
        .filter(|n| !n.is_empty());

    let claim = match Claim::update_status(
        &state.db,
        &req.claim_id,
        new_status,
        notes.as_deref(),
        &admin.admin.id,
    )
    .await
    {
        Ok(claim) => claim,
        Err(UpdateStatusError::NotFound) => {
            return Err(ApiError::not_found("Claim not found."))
        }
        Err(UpdateStatusError::Database(e)) => return Err(e.into()),
    };

    // Delivery failure must not roll back a committed status change.
    if let Some(owner) = User::find_by_id(&state.db, &claim.user_id).await? {
        if let Err(e) = state
            .mailer
            .send_status_notification(
                &owner.email,
                &owner.name,
                &claim.reference_number,
                new_status.as_str(),
            )
            .await
        {
            tracing::warn!(claim_id = %claim.id, "Status notification failed: {}", e);
        }
    }

    let history = ClaimHistory::list_for_claim(&state.db, &claim.id).await?;

    Ok(Json(UpdateClaimResponse {
        success: true,
        message: format!("Claim updated to {}.", new_status),
        history,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreditUserRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub amount: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreditUserResponse {
    pub success: bool,
    pub message: String,
    pub user: UserResponse,
}

/// POST /api/admin/users/credit
pub async fn credit_user(
    State(state): State<Arc<AppState>>,
    admin: CurrentAdmin,
    Json(req): Json<CreditUserRequest>,
) -> Result<Json<CreditUserResponse>, ApiError> {
    let amount = parse_amount(&req.amount)
        .ok_or_else(|| ApiError::validation_field("amount", "Amount must be a positive number"))?;
    let note = req
        .note
        .as_deref()
        .map(|n| normalize_text(n, 500))
        .filter(|n| !n.is_empty());

    let user = User::set_credit(&state.db, &req.user_id, amount, note.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(
        admin_id = %admin.admin.id,
        user_id = %user.id,
        amount,
        "User credit updated"
    );

    Ok(Json(CreditUserResponse {
        success: true,
        message: "Credit applied successfully.".to_string(),
        user: user.into(),
    }))
}
