//! Bearer-token authentication for inbound SCIM requests.
//!
//! EntraID presents a shared secret on every provisioning call. Comparison is
//! constant-time so the token cannot be recovered through response timing.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::BridgeError;

/// Middleware guarding every `/scim/*` route. Rejection happens before the
/// handler runs, so an unauthenticated request can have no side effect.
pub async fn require_bearer(
    State(expected): State<Arc<String>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if verify_token(token, &expected) => next.run(request).await,
        Some(_) => {
            warn!("rejected SCIM request with invalid bearer token");
            BridgeError::Unauthorized("invalid bearer token".to_string()).into_response()
        }
        None => {
            warn!("rejected SCIM request without bearer token");
            BridgeError::Unauthorized("bearer token missing".to_string()).into_response()
        }
    }
}

/// Compares a presented token against the expected one in constant time.
pub fn verify_token(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_exact_match() {
        assert!(verify_token("sekrit-token", "sekrit-token"));
    }

    #[test]
    fn rejects_mismatch() {
        assert!(!verify_token("wrong-token!", "sekrit-token"));
    }

    #[test]
    fn rejects_prefix_and_extension() {
        assert!(!verify_token("sekrit", "sekrit-token"));
        assert!(!verify_token("sekrit-token-more", "sekrit-token"));
    }

    #[test]
    fn rejects_empty_presented_token() {
        assert!(!verify_token("", "sekrit-token"));
    }

    #[test]
    fn same_length_near_miss_is_rejected() {
        // Differ only in the final byte, the case a leaky comparison
        // would answer fastest.
        assert!(!verify_token("sekrit-tokeN", "sekrit-token"));
    }
}
