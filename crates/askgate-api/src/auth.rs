//! Bearer-token authentication for protected routes.
//!
//! The token lives in `<data_dir>/api_token`; it is generated on first start
//! and reused afterwards.

use std::path::Path;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use rand::Rng;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Generate a random 32-character hex token.
pub fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Load the token from `token_path`, or generate and save a new one.
pub fn load_or_generate_token(token_path: &Path) -> String {
    if let Ok(contents) = std::fs::read_to_string(token_path) {
        let token = contents.trim().to_string();
        if !token.is_empty() {
            info!(path = %token_path.display(), "API token loaded");
            return token;
        }
    }

    let token = generate_token();
    if let Some(parent) = token_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(token_path, &token) {
        warn!(path = %token_path.display(), error = %e, "Failed to save API token");
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(token_path, std::fs::Permissions::from_mode(0o600));
        }
        info!(path = %token_path.display(), "API token generated");
    }
    token
}

/// Reject requests without `Authorization: Bearer <token>` matching the
/// configured token.
pub async fn require_auth(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(value) = req.headers().get(AUTHORIZATION) else {
        return ApiError::Unauthorized("Missing Authorization header".to_string()).into_response();
    };
    let Ok(value) = value.to_str() else {
        return ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
            .into_response();
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if token == state.api_token => next.run(req).await,
        _ => ApiError::Unauthorized("Invalid bearer token".to_string()).into_response(),
    }
}
