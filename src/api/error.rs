use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::nodes::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Infra,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

/// HTTP status and error kind for a node failure.
pub fn classify_node_error(error: &NodeError) -> (StatusCode, ErrorKind) {
    match error {
        NodeError::MissingCredential(_)
        | NodeError::MissingInput(_)
        | NodeError::InvalidInput(_)
        | NodeError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, ErrorKind::Validation),
        NodeError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorKind::Provider),
        NodeError::RateLimit(_) => (StatusCode::TOO_MANY_REQUESTS, ErrorKind::Provider),
        NodeError::Upstream { .. } | NodeError::Download(_) => (StatusCode::BAD_GATEWAY, ErrorKind::Provider),
        NodeError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, ErrorKind::Provider),
        NodeError::Unknown(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Infra),
    }
}
