//! HTTP surface: routing, shared response types, and the handler modules.

pub mod admin;
pub mod auth;
pub mod claims;
pub mod error;
pub mod uploads;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

/// Plain success/message envelope shared by endpoints without richer payloads
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the application router.
///
/// State-changing routes sit behind the CSRF layer; the verification link
/// arrives by email and is the one state change exempt from it. Reads only
/// need a session, enforced by their extractors.
pub fn create_router(state: Arc<AppState>) -> Router {
    // Multipart bodies need headroom beyond the file cap itself.
    let body_limit = state.config.uploads.max_size_bytes as usize + 1024 * 1024;

    let mutations = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/resend-verification", post(auth::resend_verification))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .route("/logout", post(auth::logout))
        .route("/submit-claim", post(claims::submit_claim))
        .route("/profile/update", post(claims::update_profile))
        .route("/change-password", post(claims::change_password))
        .route("/contact", post(claims::contact))
        .route("/admin/login", post(admin::login))
        .route("/admin/claims/update", post(admin::update_claim_status))
        .route("/admin/users/credit", post(admin::credit_user))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_csrf,
        ))
        .layer(DefaultBodyLimit::max(body_limit));

    let reads = Router::new()
        .route("/csrf-token", get(auth::csrf_token))
        .route("/verify-email", get(auth::verify_email))
        .route("/dashboard", get(claims::dashboard))
        .route("/claims/history", get(claims::claims_history))
        .route("/profile", get(claims::get_profile))
        .route("/admin/dashboard", get(admin::dashboard))
        .route("/admin/claims", get(admin::list_claims))
        .route("/uploads/:name", get(uploads::download));

    Router::new()
        .route("/health", get(health))
        .nest("/api", mutations.merge(reads))
        .route("/uploads", get(uploads::reject_direct_access))
        .route("/uploads/*path", get(uploads::reject_direct_access))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use crate::api::auth::{generate_token, hash_token, CSRF_HEADER, SESSION_COOKIE};
    use crate::config::Config;
    use crate::db::{self, Claim, Session, User};
    use crate::identity::ExternalIdentity;
    use crate::storage::UploadStore;

    async fn test_state(dir: &tempfile::TempDir) -> Arc<AppState> {
        let config = Config::default();
        let db = db::test_pool().await;
        let uploads = UploadStore::new(dir.path(), config.uploads.max_size_bytes).unwrap();
        Arc::new(AppState::new(config, db, None, uploads))
    }

    /// Create a verified user with a live session, returning the raw session
    /// token for the cookie alongside the stored session row.
    async fn login_test_user(state: &AppState) -> (User, Session, String) {
        let external = ExternalIdentity {
            id: "ext-user-1".to_string(),
            email: "claimant@example.com".to_string(),
            email_verified: true,
            name: Some("Test Claimant".to_string()),
            phone: None,
        };
        let user = User::upsert_from_external(&state.db, &external, None, None)
            .await
            .unwrap();

        let token = generate_token();
        let token_hash = hash_token(&state.config.auth.session_secret, &token);
        let csrf_token = generate_token();
        let session = Session::create(
            &state.db,
            &token_hash,
            Some(&user.id),
            None,
            &csrf_token,
            state.config.auth.session_ttl_hours,
        )
        .await
        .unwrap();

        (user, session, token)
    }

    fn claim_form_body(boundary: &str, description: &str) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in [
            ("claimType", "Refund"),
            ("referenceNumber", "REF-1001"),
            ("amount", "42.50"),
            ("description", description),
        ] {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"proof\"; filename=\"receipt.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"png-bytes");
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_claim_requires_description() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let (user, session, token) = login_test_user(&state).await;
        let router = create_router(state.clone());

        let boundary = "claim-form-test";
        let request = |description: &str| {
            Request::builder()
                .method("POST")
                .uri("/api/submit-claim")
                .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"))
                .header(CSRF_HEADER, &session.csrf_token)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(claim_form_body(boundary, description)))
                .unwrap()
        };

        let response = router.clone().oneshot(request("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["success"], serde_json::json!(false));
        assert!(body["error"]["fields"]["description"].is_array());
        assert!(Claim::list_for_user(&state.db, &user.id)
            .await
            .unwrap()
            .is_empty());

        // The same submission goes through once the description is present.
        let response = router
            .clone()
            .oneshot(request("Parcel arrived damaged"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(Claim::list_for_user(&state.db, &user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mutating_routes_reject_missing_or_wrong_csrf_token() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let (_user, session, token) = login_test_user(&state).await;
        let router = create_router(state.clone());

        let post_logout = |csrf: Option<&str>| {
            let mut builder = Request::builder()
                .method("POST")
                .uri("/api/logout")
                .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"));
            if let Some(value) = csrf {
                builder = builder.header(CSRF_HEADER, value);
            }
            builder.body(Body::empty()).unwrap()
        };

        // No header at all.
        let response = router.clone().oneshot(post_logout(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // A token that belongs to nobody.
        let response = router
            .clone()
            .oneshot(post_logout(Some("not-the-token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        // Both rejections happened before the handler: the session survives.
        let token_hash = hash_token(&state.config.auth.session_secret, &token);
        assert!(Session::find_by_token_hash(&state.db, &token_hash)
            .await
            .unwrap()
            .is_some());

        // The session's own token is accepted and the logout takes effect.
        let response = router
            .clone()
            .oneshot(post_logout(Some(&session.csrf_token)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(Session::find_by_token_hash(&state.db, &token_hash)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn forgot_password_validates_the_email() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir).await;
        let (_user, session, token) = login_test_user(&state).await;
        let router = create_router(state.clone());

        let request = Request::builder()
            .method("POST")
            .uri("/api/forgot-password")
            .header(header::COOKIE, format!("{SESSION_COOKIE}={token}"))
            .header(CSRF_HEADER, &session.csrf_token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"email":"not-an-email"}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"]["fields"]["email"].is_array());
    }
}
