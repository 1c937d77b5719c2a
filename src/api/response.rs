use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::error::{classify_node_error, ApiError, ErrorKind};
use crate::nodes::NodeError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

pub type ApiJson<T> = (StatusCode, Json<ApiEnvelope<T>>);

pub fn success<T>(payload: T) -> ApiJson<T>
where
    T: Serialize,
{
    (
        StatusCode::OK,
        Json(ApiEnvelope {
            ok: true,
            data: Some(payload),
            error: None,
        }),
    )
}

pub fn failure(
    status: StatusCode,
    kind: ErrorKind,
    code: impl Into<String>,
    message: impl Into<String>,
    details: Option<Value>,
) -> ApiJson<Value> {
    (
        status,
        Json(ApiEnvelope {
            ok: false,
            data: None,
            error: Some(ApiError::new(kind, code, message, details)),
        }),
    )
}

pub fn node_failure(error: &NodeError, details: Option<Value>) -> ApiJson<Value> {
    let (status, kind) = classify_node_error(error);
    failure(status, kind, error.code(), error.to_string(), details)
}

/// Logs the detail and answers with a sanitized 500.
pub fn internal_error(message: impl Into<String>) -> ApiJson<Value> {
    let detail = message.into();
    error!(detail = %detail, "internal api error");
    failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Infra,
        "internal_error",
        "Internal server error",
        None,
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn node_failure_carries_code_and_kind() {
        let (status, Json(envelope)) = node_failure(
            &NodeError::RateLimit(String::from("slow down")),
            Some(json!({"debug_logs": "..."})),
        );
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let body = serde_json::to_value(envelope).expect("serialize");
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["error"]["kind"], json!("provider"));
        assert_eq!(body["error"]["code"], json!("rate_limit"));
        assert_eq!(body["error"]["message"], json!("Rate limit exceeded: slow down"));
        assert!(body.get("data").is_none());
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let (status, Json(envelope)) = internal_error("sensitive detail");
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = envelope.error.expect("error");
        assert_eq!(error.message, "Internal server error");
        assert_eq!(error.kind, ErrorKind::Infra);
    }
}
