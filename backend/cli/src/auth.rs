//! Request authentication.
//!
//! The `Authorization` header must carry the configured token, either bare
//! or as `Bearer <token>`. With no token configured every request fails.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use tracing::warn;

use crate::api::AppState;

pub struct RequireAuth;

impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.auth_token.as_deref().filter(|t| !t.is_empty()) else {
            warn!("Rejecting request: no auth token configured");
            return Err((StatusCode::UNAUTHORIZED, "Authentication is not configured"));
        };

        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|val| val.to_str().ok());

        match header {
            Some(value) if value.strip_prefix("Bearer ").unwrap_or(value) == expected => {
                Ok(RequireAuth)
            }
            Some(_) => {
                warn!("Invalid authorization token");
                Err((StatusCode::UNAUTHORIZED, "Invalid token"))
            }
            None => {
                warn!("Missing Authorization header");
                Err((StatusCode::UNAUTHORIZED, "Missing credentials"))
            }
        }
    }
}
