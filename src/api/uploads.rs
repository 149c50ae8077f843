//! Proof document delivery.
//!
//! Files are only served through the authorized endpoint. Admins may fetch
//! any proof; users only the ones attached to their own claims. The static
//! upload directory itself is never exposed.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::auth::MaybeSession;
use super::error::ApiError;
use crate::db::Claim;
use crate::AppState;

/// GET /api/uploads/:name
pub async fn download(
    State(state): State<Arc<AppState>>,
    MaybeSession(session): MaybeSession,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let session = session.ok_or_else(|| ApiError::unauthorized("Not authenticated"))?;

    let authorized = if session.admin_id.is_some() {
        true
    } else if let Some(user_id) = &session.user_id {
        Claim::user_owns_proof(&state.db, user_id, &name).await?
    } else {
        false
    };
    if !authorized {
        return Err(ApiError::forbidden("You do not have access to this file."));
    }

    let path = state
        .uploads
        .path_for(&name)
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let body = tokio::fs::read(&path).await.map_err(|e| {
        tracing::error!("Failed to read stored upload {}: {}", name, e);
        ApiError::internal("Failed to read the requested file.")
    })?;

    let content_type = crate::storage::UploadStore::content_type_for(&name);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", name),
            ),
        ],
        body,
    )
        .into_response())
}

/// Any path under /uploads is refused outright.
pub async fn reject_direct_access() -> ApiError {
    ApiError::forbidden("Direct file access is disabled.")
}
