//! Authentication: credential verification, sessions, CSRF, user auth endpoints.
//!
//! End-user credentials are verified by the external identity provider; the
//! local password helpers exist for admin accounts and for the mirrored
//! legacy records that predate the provider.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    normalize_email, normalize_text, validate_email, validate_password_strength,
};
use crate::db::{AdminUser, Session, User};
use crate::identity::IdentityError;
use crate::AppState;

pub const SESSION_COOKIE: &str = "refundly_session";
pub const CSRF_HEADER: &str = "x-csrf-token";

// ---------------------------------------------------------------------------
// Credential helpers
// ---------------------------------------------------------------------------

/// Hash a password with bcrypt for storage.
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

/// An unusable random credential for identity-provider-owned records.
pub fn placeholder_password_hash() -> String {
    bcrypt::hash(uuid::Uuid::new_v4().to_string(), bcrypt::DEFAULT_COST).unwrap_or_default()
}

/// PHP-era hashes carry the `$2y$` prefix; normalize to `$2b$` before
/// comparison so both historical encodings verify.
fn normalize_bcrypt_hash(hash: &str) -> String {
    match hash.strip_prefix("$2y$") {
        Some(rest) => format!("$2b${}", rest),
        None => hash.to_string(),
    }
}

/// Verify a password against a stored credential.
///
/// Accepts `$2a$`/`$2b$`/`$2y$` bcrypt encodings. Records that are not
/// bcrypt hashes fall back to plaintext equality, a legacy path for rows
/// that predate hashing, never a strategy for new credentials.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if stored.is_empty() {
        return false;
    }

    let is_bcrypt = stored.starts_with("$2a$") || stored.starts_with("$2b$") || stored.starts_with("$2y$");
    if is_bcrypt {
        return bcrypt::verify(password, &normalize_bcrypt_hash(stored)).unwrap_or(false);
    }

    // Legacy plaintext records.
    stored.as_bytes().ct_eq(password.as_bytes()).into()
}

// ---------------------------------------------------------------------------
// Session tokens
// ---------------------------------------------------------------------------

/// Generate a random 256-bit token
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a session token for storage, keyed by the session secret.
pub fn hash_token(secret: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn clear_session_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .removal()
        .build()
}

/// Load the live session referenced by the request cookie, if any.
pub async fn load_session(state: &AppState, jar: &CookieJar) -> Result<Option<Session>, ApiError> {
    let token = match jar.get(SESSION_COOKIE) {
        Some(cookie) => cookie.value().to_string(),
        None => return Ok(None),
    };
    let token_hash = hash_token(&state.config.auth.session_secret, &token);
    Ok(Session::find_by_token_hash(&state.db, &token_hash).await?)
}

/// Replace the request's session with a fresh one for the given principal.
///
/// Any prior session row is destroyed and the CSRF token rotates; tokens
/// rotate on login, not per request.
pub async fn establish_session(
    state: &AppState,
    jar: CookieJar,
    user_id: Option<&str>,
    admin_id: Option<&str>,
) -> Result<(CookieJar, Session), ApiError> {
    if let Some(existing) = load_session(state, &jar).await? {
        Session::delete(&state.db, &existing.id).await?;
    }

    let token = generate_token();
    let token_hash = hash_token(&state.config.auth.session_secret, &token);
    let csrf_token = generate_token();

    let session = Session::create(
        &state.db,
        &token_hash,
        user_id,
        admin_id,
        &csrf_token,
        state.config.auth.session_ttl_hours,
    )
    .await?;

    Ok((jar.add(session_cookie(token)), session))
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Extractor for requests that must carry an authenticated user session
pub struct CurrentUser {
    pub user: User,
    pub session: Session,
}

/// Extractor for requests that must carry an authenticated admin session
pub struct CurrentAdmin {
    pub admin: AdminUser,
    pub session: Session,
}

/// Extractor that yields the session when present, without requiring one
pub struct MaybeSession(pub Option<Session>);

fn not_authenticated() -> ApiError {
    ApiError::unauthorized("Not authenticated")
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        Ok(MaybeSession(load_session(state, &jar).await?))
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let MaybeSession(session) = MaybeSession::from_request_parts(parts, state).await?;
        let session = session.ok_or_else(not_authenticated)?;
        let user_id = session.user_id.clone().ok_or_else(not_authenticated)?;
        let user = User::find_by_id(&state.db, &user_id)
            .await?
            .ok_or_else(not_authenticated)?;
        Ok(CurrentUser { user, session })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let MaybeSession(session) = MaybeSession::from_request_parts(parts, state).await?;
        let session = session.ok_or_else(not_authenticated)?;
        let admin_id = session.admin_id.clone().ok_or_else(not_authenticated)?;
        let admin = AdminUser::find_by_id(&state.db, &admin_id)
            .await?
            .ok_or_else(not_authenticated)?;
        Ok(CurrentAdmin { admin, session })
    }
}

// ---------------------------------------------------------------------------
// CSRF middleware
// ---------------------------------------------------------------------------

/// Reject any request whose CSRF header does not match the session's token.
///
/// Applied to every state-changing route. Comparison is constant-time;
/// absence of a session, header, or match all fail closed with 403 before
/// the handler runs.
pub async fn require_csrf(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let invalid =
        || ApiError::forbidden("Invalid security token. Refresh the page and try again.");

    let session = load_session(&state, &jar).await?.ok_or_else(invalid)?;

    let provided = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(invalid)?;

    let matches: bool = session
        .csrf_token
        .as_bytes()
        .ct_eq(provided.as_bytes())
        .into();
    if !matches {
        return Err(invalid());
    }

    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(rename = "requiresVerification")]
    pub requires_verification: bool,
    pub email: String,
    pub message: String,
}

/// POST /api/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<RegisterRequest>,
) -> Result<(CookieJar, Json<RegisterResponse>), ApiError> {
    let name = normalize_text(&req.name, 100);
    let email = normalize_email(&req.email);
    let phone = req
        .phone
        .as_deref()
        .map(|p| normalize_text(p, 30))
        .filter(|p| !p.is_empty());

    let mut errors = ValidationErrorBuilder::new();
    if name.is_empty() {
        errors.add("name", "Name is required");
    }
    if let Err(e) = validate_email(&email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password_strength(&req.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let provider = state.identity()?;
    let external = provider
        .sign_up(&email, &req.password, &name, phone.as_deref())
        .await?;

    let user = User::upsert_from_external(&state.db, &external, Some(&name), phone.as_deref()).await?;
    let requires_verification = !external.email_verified;

    // Pre-verified accounts are logged in straight away.
    let jar = if requires_verification {
        jar
    } else {
        establish_session(&state, jar, Some(&user.id), None).await?.0
    };

    tracing::info!(user_id = %user.id, "User registered");

    Ok((
        jar,
        Json(RegisterResponse {
            success: true,
            requires_verification,
            email,
            message: if requires_verification {
                "Account created. Please check your email to verify your account.".to_string()
            } else {
                "Account created successfully!".to_string()
            },
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "requiresVerification", skip_serializing_if = "Option::is_none")]
    pub requires_verification: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

fn unverified_response(email: String) -> LoginResponse {
    LoginResponse {
        success: false,
        message: "Please verify your email before logging in.".to_string(),
        requires_verification: Some(true),
        email: Some(email),
    }
}

/// POST /api/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let email = normalize_email(&req.email);
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation_field(
            "email",
            "Email and password are required",
        ));
    }

    let provider = state.identity()?;
    let external = match provider.sign_in(&email, &req.password).await {
        Ok(external) => external,
        Err(IdentityError::Rejected(message)) => {
            let lower = message.to_lowercase();
            if lower.contains("confirm") || lower.contains("verified") {
                return Ok((jar, Json(unverified_response(email))));
            }
            // Generic on purpose: do not disclose whether the account exists.
            return Err(ApiError::unauthorized("Invalid email or password"));
        }
        Err(other) => return Err(other.into()),
    };

    if !external.email_verified {
        return Ok((jar, Json(unverified_response(email))));
    }

    let user = User::upsert_from_external(&state.db, &external, None, None).await?;
    let (jar, _session) = establish_session(&state, jar, Some(&user.id), None).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok((
        jar,
        Json(LoginResponse {
            success: true,
            message: "Login successful!".to_string(),
            requires_verification: None,
            email: None,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

/// POST /api/resend-verification
pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResendVerificationRequest>,
) -> Result<Json<super::MessageResponse>, ApiError> {
    let email = normalize_email(&req.email);
    validate_email(&email).map_err(|e| ApiError::validation_field("email", e))?;

    state.identity()?.resend_verification(&email).await?;

    Ok(Json(super::MessageResponse::ok(
        "Verification email sent successfully.",
    )))
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token_hash: String,
    #[serde(default = "default_verify_type")]
    #[serde(rename = "type")]
    pub kind: String,
}

fn default_verify_type() -> String {
    "signup".to_string()
}

/// GET /api/verify-email
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    axum::extract::Query(query): axum::extract::Query<VerifyEmailQuery>,
) -> Result<(CookieJar, Json<super::MessageResponse>), ApiError> {
    let token_hash = normalize_text(&query.token_hash, 500);
    if token_hash.is_empty() {
        return Err(ApiError::validation_field(
            "token_hash",
            "Verification token is required",
        ));
    }

    let external = state
        .identity()?
        .verify_email(&token_hash, &query.kind)
        .await?;
    let user = User::upsert_from_external(&state.db, &external, None, None).await?;
    let (jar, _session) = establish_session(&state, jar, Some(&user.id), None).await?;

    Ok((
        jar,
        Json(super::MessageResponse::ok("Email verified successfully.")),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

/// POST /api/forgot-password
///
/// The response is the same whether or not an account exists, so the
/// endpoint cannot be used to enumerate addresses.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ForgotPasswordRequest>,
) -> Result<Json<super::MessageResponse>, ApiError> {
    let email = normalize_email(&req.email);
    validate_email(&email).map_err(|e| ApiError::validation_field("email", e))?;

    match state.identity()?.request_password_reset(&email).await {
        Ok(()) => {}
        Err(IdentityError::Rejected(message)) => {
            tracing::debug!(%message, "Password reset request rejected by provider");
        }
        Err(other) => return Err(other.into()),
    }

    Ok(Json(super::MessageResponse::ok(
        "If an account exists for that email, a reset link has been sent.",
    )))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

/// POST /api/reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<(CookieJar, Json<super::MessageResponse>), ApiError> {
    let token = normalize_text(&req.token, 500);
    let mut errors = ValidationErrorBuilder::new();
    if token.is_empty() {
        errors.add("token", "Reset token is required");
    }
    if let Err(e) = validate_password_strength(&req.new_password) {
        errors.add("newPassword", e);
    }
    errors.finish()?;

    let external = state
        .identity()?
        .reset_password(&token, &req.new_password)
        .await?;

    // Mirror the new credential locally so legacy lookups stay consistent.
    let user = User::upsert_from_external(&state.db, &external, None, None).await?;
    let hash = hash_password(&req.new_password)
        .map_err(|_| ApiError::internal("Failed to update password"))?;
    User::set_password_hash(&state.db, &user.id, &hash).await?;

    let (jar, _session) = establish_session(&state, jar, Some(&user.id), None).await?;

    tracing::info!(user_id = %user.id, "Password reset completed");

    Ok((
        jar,
        Json(super::MessageResponse::ok("Password reset successfully.")),
    ))
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub success: bool,
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// GET /api/csrf-token
///
/// Returns the session's anti-forgery token, creating an anonymous session
/// when the request carries none (pre-login forms need one).
pub async fn csrf_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<CsrfTokenResponse>), ApiError> {
    if let Some(session) = load_session(&state, &jar).await? {
        return Ok((
            jar,
            Json(CsrfTokenResponse {
                success: true,
                csrf_token: session.csrf_token,
            }),
        ));
    }

    let (jar, session) = establish_session(&state, jar, None, None).await?;
    Ok((
        jar,
        Json(CsrfTokenResponse {
            success: true,
            csrf_token: session.csrf_token,
        }),
    ))
}

/// POST /api/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<super::MessageResponse>), ApiError> {
    if let Some(session) = load_session(&state, &jar).await? {
        Session::delete(&state.db, &session.id).await?;
    }

    Ok((
        jar.add(clear_session_cookie()),
        Json(super::MessageResponse::ok("Logged out successfully")),
    ))
}
