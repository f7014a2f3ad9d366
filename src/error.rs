//! Bridge error taxonomy.
//!
//! Every component returns typed errors; this module maps them onto the SCIM
//! error-response shape at the router boundary. The detail text always makes
//! clear whether anything happened before the failure, so the provider's own
//! retry logic can recover without duplicating work.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::models::scim::ScimError;
use crate::services::publisher::PublishError;

/// Media type mandated by the provisioning protocol.
pub const SCIM_CONTENT_TYPE: &str = "application/scim+json";

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad or missing bearer credential. Rejected before any side effect.
    #[error("authentication failed: {0}")]
    Unauthorized(String),

    /// Generated document failed validation or a required input was absent.
    /// Rejected before any persistence or publish step.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Update or delete for an external id with no store entry.
    #[error("user not found: {0}")]
    NotFound(String),

    /// Failure inside the publish sequence; carries step and branch detail.
    #[error("{0}")]
    Publish(PublishError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<PublishError> for BridgeError {
    fn from(err: PublishError) -> Self {
        Self::Publish(err)
    }
}

impl BridgeError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Publish(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Publish(err) => format!("{err}. {}", err.remediation()),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ScimError::new(status.as_u16(), self.detail());

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(SCIM_CONTENT_TYPE),
        );
        if status == StatusCode::UNAUTHORIZED {
            // Challenge header mandated by the SCIM bearer scheme.
            headers.insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_401_with_challenge() {
        let response =
            BridgeError::Unauthorized("invalid bearer token".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            SCIM_CONTENT_TYPE
        );
    }

    #[test]
    fn validation_maps_to_400() {
        let response = BridgeError::Validation("missing name".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn not_found_maps_to_404() {
        let response = BridgeError::NotFound("abc".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_maps_to_500() {
        let response = BridgeError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
