//! Bearer-token auth middleware. The token is read from the
//! environment once at startup and stored as a SHA-256 hash; requests
//! compare in constant time. No hash configured = dev mode, no auth.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_hash) = &state.api_token_hash else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) => {
            let presented_hash = Sha256::digest(token.as_bytes());
            if presented_hash.as_slice().ct_eq(expected_hash).unwrap_u8() == 1 {
                next.run(request).await
            } else {
                unauthorized()
            }
        }
        None => unauthorized(),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "invalid or missing bearer token" })),
    )
        .into_response()
}
