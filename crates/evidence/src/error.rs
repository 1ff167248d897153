use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub type Result<T, E = EvidenceError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Failed to serialize evidence: {0}")]
    Serialization(String),
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),
    #[error("Not authorized: {0}")]
    Authorization(String),
    #[error("Signing service unavailable: {0}")]
    SigningServiceUnavailable(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Object already exists with different content: {0}")]
    AlreadyExists(String),
    #[error("Request deadline of {0:?} exceeded")]
    Timeout(Duration),
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("No route for {0}")]
    NotFound(String),
    #[error("Method {0} not allowed")]
    MethodNotAllowed(String),
}

/// Body returned for every failure other than malformed input.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_kind: &'static str,
    pub message: String,
}

impl EvidenceError {
    /// Stable machine-readable name used as `error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            EvidenceError::InvalidJson => "invalid_json",
            EvidenceError::Serialization(_) => "serialization_error",
            EvidenceError::KeyNotFound(_) => "key_not_found",
            EvidenceError::Authorization(_) => "authorization_error",
            EvidenceError::SigningServiceUnavailable(_) => "signing_service_unavailable",
            EvidenceError::StorageUnavailable(_) => "storage_unavailable",
            EvidenceError::AlreadyExists(_) => "already_exists",
            EvidenceError::Timeout(_) => "timeout",
            EvidenceError::PayloadTooLarge(_) => "payload_too_large",
            EvidenceError::NotFound(_) => "not_found",
            EvidenceError::MethodNotAllowed(_) => "method_not_allowed",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            EvidenceError::InvalidJson => StatusCode::BAD_REQUEST,
            EvidenceError::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EvidenceError::KeyNotFound(_) | EvidenceError::Authorization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            EvidenceError::SigningServiceUnavailable(_) | EvidenceError::StorageUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            EvidenceError::AlreadyExists(_) => StatusCode::CONFLICT,
            EvidenceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            EvidenceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            EvidenceError::NotFound(_) => StatusCode::NOT_FOUND,
            EvidenceError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl From<serde_json::Error> for EvidenceError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Malformed input keeps the plain-text `Invalid JSON` body; everything else
/// is reported as `{error_kind, message}`.
impl IntoResponse for EvidenceError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            invalid @ EvidenceError::InvalidJson => (status, invalid.to_string()).into_response(),
            other => (
                status,
                Json(ErrorBody {
                    error_kind: other.kind(),
                    message: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_json_returns_400() {
        let response = EvidenceError::InvalidJson.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn serialization_error_returns_422() {
        let response = EvidenceError::Serialization("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn key_not_found_returns_500() {
        let response = EvidenceError::KeyNotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn signing_service_unavailable_returns_503() {
        let response = EvidenceError::SigningServiceUnavailable("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn storage_unavailable_returns_503() {
        let response = EvidenceError::StorageUnavailable("down".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn already_exists_returns_409() {
        let response = EvidenceError::AlreadyExists("EV-1.json".into()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn timeout_returns_504() {
        let response = EvidenceError::Timeout(Duration::from_secs(30)).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn timeout_message_keeps_fractional_deadline() {
        let err = EvidenceError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request deadline of 1.5s exceeded");
    }

    #[test]
    fn routing_errors_map_to_their_statuses() {
        assert_eq!(EvidenceError::PayloadTooLarge(10).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(EvidenceError::NotFound("/x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            EvidenceError::MethodNotAllowed("GET".into()).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn kinds_are_snake_case() {
        assert_eq!(EvidenceError::KeyNotFound(String::new()).kind(), "key_not_found");
        assert_eq!(
            EvidenceError::SigningServiceUnavailable(String::new()).kind(),
            "signing_service_unavailable"
        );
    }
}
