//! Shared-secret authentication for write endpoints.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use crate::error::ApiError;
use crate::routes::AppState;

/// Extractor that only succeeds when the request carries
/// `Authorization: Bearer <shared secret>`.
#[derive(Debug, Clone, Copy)]
pub struct RequireSecret;

impl FromRequestParts<AppState> for RequireSecret {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        match token {
            Some(token) if secret_matches(&state.secret, token) => Ok(Self),
            _ => Err(ApiError::Unauthorized),
        }
    }
}

/// Constant-time comparison of a presented token against the secret.
pub fn secret_matches(secret: &str, presented: &str) -> bool {
    secret.as_bytes().ct_eq(presented.trim().as_bytes()).into()
}
