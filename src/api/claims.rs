//! User-facing endpoints: claim submission, dashboard, history, profile.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_email, normalize_text, parse_amount, validate_email, validate_password_strength,
};
use crate::db::{Claim, ClaimHistory, User, UserClaimStats, UserResponse};
use crate::storage::StoreError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitClaimResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "claimId")]
    pub claim_id: String,
}

/// POST /api/submit-claim (multipart)
pub async fn submit_claim(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    mut multipart: Multipart,
) -> Result<Json<SubmitClaimResponse>, ApiError> {
    let mut claim_type = String::new();
    let mut reference_number = String::new();
    let mut amount_raw = String::new();
    let mut description = String::new();
    let mut proof: Option<(String, String, axum::body::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Invalid form data"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "proof" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::bad_request("Failed to read uploaded file"))?;
                if !data.is_empty() {
                    proof = Some((file_name, content_type, data));
                }
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|_| ApiError::bad_request("Invalid form data"))?;
                match other {
                    "claimType" => claim_type = normalize_text(&value, 100),
                    "referenceNumber" => reference_number = normalize_text(&value, 100),
                    "amount" => amount_raw = value,
                    "description" => description = normalize_text(&value, 2000),
                    _ => {}
                }
            }
        }
    }

    let mut errors = ValidationErrorBuilder::new();
    if claim_type.is_empty() {
        errors.add("claimType", "Claim type is required");
    }
    if reference_number.is_empty() {
        errors.add("referenceNumber", "Reference number is required");
    }
    let amount = parse_amount(&amount_raw);
    if amount.is_none() {
        errors.add("amount", "Amount must be a positive number");
    }
    if description.is_empty() {
        errors.add("description", "Description is required");
    }
    if proof.is_none() {
        errors.add("proof", "Proof document is required");
    }
    errors.finish()?;

    let (file_name, content_type, data) = proof.unwrap_or_default();
    let stored_name = match state.uploads.store(&file_name, &content_type, &data).await {
        Ok(name) => name,
        Err(StoreError::Invalid(reason)) => {
            return Err(ApiError::validation_field("proof", reason.to_string()))
        }
        Err(StoreError::Io(e)) => {
            tracing::error!("Failed to persist uploaded proof: {}", e);
            return Err(ApiError::internal("Failed to save the uploaded file."));
        }
    };

    let claim = Claim::create(
        &state.db,
        &current.user.id,
        &claim_type,
        &reference_number,
        amount.unwrap_or_default(),
        &description,
        Some(&stored_name),
    )
    .await?;

    tracing::info!(claim_id = %claim.id, user_id = %current.user.id, "Claim submitted");

    Ok(Json(SubmitClaimResponse {
        success: true,
        message: format!("Claim submitted successfully! Claim ID: #{}", claim.id),
        claim_id: claim.id,
    }))
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub success: bool,
    pub user: UserResponse,
    pub stats: UserClaimStats,
    pub claims: Vec<Claim>,
}

/// GET /api/dashboard
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<DashboardResponse>, ApiError> {
    let stats =
        UserClaimStats::for_user(&state.db, &current.user.id, current.user.credit_amount).await?;
    let claims = Claim::list_for_user(&state.db, &current.user.id).await?;

    Ok(Json(DashboardResponse {
        success: true,
        user: current.user.into(),
        stats,
        claims,
    }))
}

#[derive(Debug, Serialize)]
pub struct ClaimWithHistory {
    #[serde(flatten)]
    pub claim: Claim,
    pub history: Vec<ClaimHistory>,
}

#[derive(Debug, Serialize)]
pub struct ClaimsHistoryResponse {
    pub success: bool,
    pub claims: Vec<ClaimWithHistory>,
}

/// GET /api/claims/history
pub async fn claims_history(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
) -> Result<Json<ClaimsHistoryResponse>, ApiError> {
    let claims = Claim::list_for_user(&state.db, &current.user.id).await?;

    let mut out = Vec::with_capacity(claims.len());
    for claim in claims {
        let history = ClaimHistory::list_for_claim(&state.db, &claim.id).await?;
        out.push(ClaimWithHistory { claim, history });
    }

    Ok(Json(ClaimsHistoryResponse {
        success: true,
        claims: out,
    }))
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: UserResponse,
}

/// GET /api/profile
pub async fn get_profile(current: CurrentUser) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        success: true,
        user: current.user.into(),
    })
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// POST /api/profile/update
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let name = normalize_text(&req.name, 100);
    if name.is_empty() {
        return Err(ApiError::validation_field("name", "Name is required"));
    }
    let phone = req
        .phone
        .as_deref()
        .map(|p| normalize_text(p, 30))
        .filter(|p| !p.is_empty());

    let user = User::update_profile(&state.db, &current.user.id, &name, phone.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(ProfileResponse {
        success: true,
        user: user.into(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    #[serde(rename = "currentPassword")]
    pub current_password: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

/// POST /api/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    current: CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<super::MessageResponse>, ApiError> {
    if req.current_password.is_empty() {
        return Err(ApiError::validation_field(
            "currentPassword",
            "Current password is required",
        ));
    }
    validate_password_strength(&req.new_password)
        .map_err(|e| ApiError::validation_field("newPassword", e))?;

    // The provider owns the credential and checks the current password.
    state
        .identity()?
        .update_password(&current.user.email, &req.current_password, &req.new_password)
        .await?;

    // Keep the mirrored hash in step for the legacy local path.
    if let Ok(hash) = super::auth::hash_password(&req.new_password) {
        User::set_password_hash(&state.db, &current.user.id, &hash).await?;
    }

    tracing::info!(user_id = %current.user.id, "Password changed");

    Ok(Json(super::MessageResponse::ok(
        "Password changed successfully.",
    )))
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
}

/// POST /api/contact
pub async fn contact(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ContactRequest>,
) -> Result<Json<super::MessageResponse>, ApiError> {
    let name = normalize_text(&req.name, 100);
    let email = normalize_email(&req.email);
    let subject = normalize_text(req.subject.as_deref().unwrap_or("Contact form"), 200);
    let message = normalize_text(&req.message, 5000);

    let mut errors = ValidationErrorBuilder::new();
    if name.is_empty() {
        errors.add("name", "Name is required");
    }
    if let Err(e) = validate_email(&email) {
        errors.add("email", e);
    }
    if message.is_empty() {
        errors.add("message", "Message is required");
    }
    errors.finish()?;

    if let Err(e) = state
        .mailer
        .send_contact_message(&name, &email, &subject, &message)
        .await
    {
        tracing::warn!("Failed to deliver contact message: {}", e);
    }

    Ok(Json(super::MessageResponse::ok(
        "Thank you for your message. We will get back to you soon!",
    )))
}
