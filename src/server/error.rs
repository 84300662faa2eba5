//! Error types for the REST API server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::replay::ControlError;
use crate::snapshot_store::SnapshotError;
use crate::upstream::FetchError;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Rejected simulation control request
    InvalidControl(ControlError),
    /// Invalid parameter in request
    InvalidParameter(String),
    /// Replay snapshot missing or out of range
    SnapshotUnavailable(String),
    /// Upstream could not be reached or answered with an error
    UpstreamFailed(String),
    /// Upstream or fixture payload failed validation
    MalformedPayload(String),
    /// Internal server error
    InternalError(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::InvalidControl(err) => write!(f, "Invalid control request: {}", err),
            ApiError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            ApiError::SnapshotUnavailable(msg) => write!(f, "Snapshot unavailable: {}", msg),
            ApiError::UpstreamFailed(msg) => write!(f, "Upstream failed: {}", msg),
            ApiError::MalformedPayload(msg) => write!(f, "Malformed payload: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidControl(_) | ApiError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::SnapshotUnavailable(_) => StatusCode::NOT_FOUND,
            ApiError::UpstreamFailed(_) | ApiError::MalformedPayload(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidControl(_) => "InvalidControl",
            ApiError::InvalidParameter(_) => "InvalidParameter",
            ApiError::SnapshotUnavailable(_) => "SnapshotUnavailable",
            ApiError::UpstreamFailed(_) => "UpstreamFailed",
            ApiError::MalformedPayload(_) => "MalformedPayload",
            ApiError::InternalError(_) => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }

        let message = match &self {
            ApiError::InvalidControl(err) => err.to_string(),
            ApiError::InvalidParameter(msg)
            | ApiError::SnapshotUnavailable(msg)
            | ApiError::UpstreamFailed(msg)
            | ApiError::MalformedPayload(msg)
            | ApiError::InternalError(msg) => msg.clone(),
        };

        let body = Json(json!({
            "error": message,
            "type": self.error_type(),
        }));

        (status, body).into_response()
    }
}

// Conversions from other error types

impl From<ControlError> for ApiError {
    fn from(err: ControlError) -> Self {
        ApiError::InvalidControl(err)
    }
}

impl From<SnapshotError> for ApiError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::OutOfRange { .. } | SnapshotError::NotFound(_) => {
                ApiError::SnapshotUnavailable(err.to_string())
            }
            SnapshotError::Invalid { .. } => ApiError::MalformedPayload(err.to_string()),
            SnapshotError::Io(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Network(_) | FetchError::Status(_) => {
                ApiError::UpstreamFailed(err.to_string())
            }
            FetchError::Parse(_) => ApiError::MalformedPayload(err.to_string()),
            FetchError::Unavailable(msg) => ApiError::SnapshotUnavailable(msg),
            FetchError::ClientCreation(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::InvalidParameter(format!("JSON error: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::from(ControlError::UnknownAction("jump".to_string())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(SnapshotError::NotFound(3)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(FetchError::Status(500)).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::from(FetchError::Unavailable("gone".to_string())).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_control_error_message_is_rendered() {
        let response =
            ApiError::from(ControlError::UnknownAction("jump".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
