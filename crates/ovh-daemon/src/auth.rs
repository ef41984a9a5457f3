//! `X-API-Key` / `X-OVH-Account` handling.
//!
//! The constant-time compare here is hand-rolled rather than pulling in
//! `subtle` for one small function.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api_types::ErrorResponse;
use crate::state::AppState;

/// Constant-time byte comparison: always walks the full length of the
/// longer input so branch timing doesn't leak how many leading bytes
/// matched.
pub fn ct_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let len_match = (a.len() == b.len()) as u8;
    let max_len = a.len().max(b.len());
    let mut diff = 1u8 - len_match;
    for i in 0..max_len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

/// Axum middleware gating every protected route behind `X-API-Key`. A
/// no-op when `ENABLE_API_KEY_AUTH=false`.
pub async fn require_api_key(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if !state.enable_api_key_auth {
        return next.run(req).await;
    }
    let provided = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()).unwrap_or("");
    let expected = state.api_secret_key.as_deref().unwrap_or("");
    if expected.is_empty() || !ct_eq(provided, expected) {
        return unauthorized();
    }
    next.run(req).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "missing or invalid X-API-Key".to_string(),
            code: "unauthorized".to_string(),
        }),
    )
        .into_response()
}

/// `X-OVH-Account` selects the active account for `scope=self` requests,
/// falling back to "default" when unset.
pub fn selected_account(headers: &HeaderMap) -> String {
    headers
        .get("x-ovh-account")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ct_eq_matches_equal_strings() {
        assert!(ct_eq("secret-key", "secret-key"));
    }

    #[test]
    fn ct_eq_rejects_mismatched_strings_of_same_length() {
        assert!(!ct_eq("secret-key", "secret-kex"));
    }

    #[test]
    fn ct_eq_rejects_different_lengths() {
        assert!(!ct_eq("short", "much-longer-value"));
    }
}
