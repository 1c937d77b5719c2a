pub mod gemini;
pub mod openai_chat;
pub mod openai_images;
pub mod tryon;

use serde::Deserialize;
use serde_json::Value;

use crate::nodes::NodeError;
use crate::trace::DebugTrace;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn summary(&self) -> String {
        format!(
            "Tokens: {} (prompt {}, completion {})",
            self.total_tokens, self.prompt_tokens, self.completion_tokens
        )
    }
}

/// Maps a non-success vendor status to the node error taxonomy, preferring
/// the vendor's own `error.message` over the raw body.
pub fn status_error(status: u16, body: &str) -> NodeError {
    let message = vendor_error_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            format!("HTTP {status}")
        } else {
            trimmed.to_string()
        }
    });
    match status {
        401 | 403 => NodeError::Authentication(message),
        429 => NodeError::RateLimit(message),
        400 if reports_invalid_key(message.as_str()) => NodeError::Authentication(message),
        _ => NodeError::upstream(Some(status), message),
    }
}

/// `error` may be a string or an object carrying `message`.
pub(crate) fn vendor_error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    match value.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(obj.clone()).to_string())),
        other => Some(other.to_string()),
    }
}

fn reports_invalid_key(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("api key not valid")
        || lowered.contains("api_key_invalid")
        || lowered.contains("invalid api key")
}

/// Single attempt: transport failures and non-2xx statuses become node errors.
pub(crate) fn send_checked(
    transport: &dyn HttpTransport,
    request: &HttpRequest,
    trace: &mut DebugTrace,
) -> Result<HttpResponse, NodeError> {
    trace.debug(format!("{} {}", request.method.as_str(), request.url));
    let resp = transport.send(request)?;
    if !resp.is_success() {
        trace.error(format!("API Response Status: {}", resp.status));
        return Err(status_error(resp.status, resp.text().as_str()));
    }
    Ok(resp)
}

pub(crate) fn decode_json<T>(resp: &HttpResponse, vendor: &str) -> Result<T, NodeError>
where
    T: serde::de::DeserializeOwned,
{
    resp.json::<T>()
        .map_err(|e| NodeError::upstream(Some(resp.status), format!("{vendor} JSON decode failed: {e}")))
}
