//! Shared-secret bearer authentication.
//!
//! Callers of `/send-push` are other backend services holding the same
//! secret. There are no per-user identities.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use pushgate_common::error::AppError;

use crate::state::AppState;

/// Proof that the request carried `Authorization: Bearer <shared secret>`.
///
/// Use as an Axum extractor on protected routes:
/// ```ignore
/// async fn handler(_auth: ServiceAuth) -> impl IntoResponse { .. }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ServiceAuth;

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Check an `Authorization` header value against the configured secret.
pub fn verify_bearer(header: Option<&str>, secret: &str) -> Result<(), AppError> {
    let token = header
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Forbidden("missing bearer credential".to_string()))?;

    if secret.is_empty() || !constant_time_eq(token, secret) {
        return Err(AppError::Forbidden("invalid bearer credential".to_string()));
    }
    Ok(())
}

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        verify_bearer(header, &state.config.shared_secret).inspect_err(|e| {
            tracing::warn!(error = %e, "Rejected push request");
        })?;

        Ok(ServiceAuth)
    }
}
