use thiserror::Error;

use crate::codec::CodecError;
use crate::transport::retry::RetryError;
use crate::transport::TransportError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("{0}")]
    MissingCredential(String),
    #[error("{0}")]
    MissingInput(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid API key: {0}")]
    Authentication(String),
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
    #[error("API error{}: {message}", status_suffix(.status))]
    Upstream { status: Option<u16>, message: String },
    #[error("{0}")]
    Timeout(String),
    #[error("Failed to download result image: {0}")]
    Download(String),
    #[error("Unexpected error: {0}")]
    Unknown(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

impl NodeError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Stable snake_case identifier used by the HTTP bridge.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) => "missing_credential",
            Self::MissingInput(_) => "missing_input",
            Self::InvalidInput(_) => "invalid_input",
            Self::UnsupportedFormat(_) => "unsupported_format",
            Self::Authentication(_) => "authentication",
            Self::RateLimit(_) => "rate_limit",
            Self::Upstream { .. } => "upstream",
            Self::Timeout(_) => "timeout",
            Self::Download(_) => "download",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Failures caught before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential(_)
                | Self::MissingInput(_)
                | Self::InvalidInput(_)
                | Self::UnsupportedFormat(_)
        )
    }
}

impl From<CodecError> for NodeError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::InvalidShape(message) => Self::InvalidInput(message),
            CodecError::UnsupportedFormat(message) => Self::UnsupportedFormat(message),
            CodecError::Encode(source) => Self::Unknown(format!("image encoding failed: {source}")),
        }
    }
}

impl From<TransportError> for NodeError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout(message) => Self::Timeout(format!("Request timed out: {message}")),
            TransportError::Network(message) => {
                Self::upstream(None, format!("Network error: {message}"))
            }
            TransportError::InvalidRequest(message) => Self::Unknown(message),
        }
    }
}

impl From<RetryError> for NodeError {
    fn from(error: RetryError) -> Self {
        match error {
            RetryError::RateLimitExceeded { .. } => Self::RateLimit(String::from(
                "Rate limit exceeded. Please wait before making more requests.",
            )),
            RetryError::TimedOut { .. } => {
                Self::Timeout(String::from("Request timed out after multiple retries"))
            }
            RetryError::Status { status, body } => crate::vendors::status_error(status, body.as_str()),
            RetryError::Network(message) => Self::upstream(None, format!("Network error: {message}")),
        }
    }
}
