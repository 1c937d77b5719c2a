pub mod catalog;
pub mod chat;
pub mod conversation;
mod error;
pub mod gemini_flash;
pub mod image_fidelity;
pub mod virtual_try_on;

use std::sync::Arc;

pub use crate::trace::DebugTrace;
pub use error::NodeError;

use crate::codec::{buffer_to_png, ImageBuffer};
use crate::config::credentials::{CredentialProvider, SharedCredentialProvider};
use crate::config::NodeSettings;
use crate::transport::retry::{SharedSleeper, Sleeper, ThreadSleeper};
use crate::transport::{HttpTransport, ReqwestTransport, SharedHttpTransport};

/// Side-effecting collaborators shared by every node.
#[derive(Clone)]
pub struct NodeRuntime {
    transport: SharedHttpTransport,
    sleeper: SharedSleeper,
    credentials: SharedCredentialProvider,
    settings: Arc<NodeSettings>,
}

impl NodeRuntime {
    pub fn new(
        transport: SharedHttpTransport,
        sleeper: SharedSleeper,
        credentials: SharedCredentialProvider,
        settings: NodeSettings,
    ) -> Self {
        Self {
            transport,
            sleeper,
            credentials,
            settings: Arc::new(settings),
        }
    }

    /// Real HTTP and real sleeping.
    pub fn live(credentials: SharedCredentialProvider, settings: NodeSettings) -> Self {
        Self::new(
            Arc::new(ReqwestTransport),
            Arc::new(ThreadSleeper),
            credentials,
            settings,
        )
    }

    pub fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    pub fn credentials(&self) -> &dyn CredentialProvider {
        self.credentials.as_ref()
    }

    pub fn settings(&self) -> &NodeSettings {
        self.settings.as_ref()
    }
}

pub(crate) fn require_api_key(value: &str, message: &str) -> Result<String, NodeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(NodeError::MissingCredential(message.to_string()));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn require_choice(field: &str, value: &str, options: &[&str]) -> Result<(), NodeError> {
    if options.contains(&value) {
        Ok(())
    } else {
        Err(NodeError::InvalidInput(format!("Invalid {field}: {value}")))
    }
}

pub(crate) fn require_image<'a>(
    image: Option<&'a ImageBuffer>,
    message: &str,
) -> Result<&'a ImageBuffer, NodeError> {
    image.ok_or_else(|| NodeError::MissingInput(message.to_string()))
}

/// Encodes every present image, skipping (and logging) the ones that fail.
pub(crate) fn encode_optional_images(
    images: &[Option<&ImageBuffer>],
    trace: &mut DebugTrace,
) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    for (idx, image) in images.iter().enumerate() {
        let Some(image) = image else {
            continue;
        };
        match buffer_to_png(image) {
            Ok(png) => {
                trace.debug(format!("Image {} added", idx + 1));
                out.push(png);
            }
            Err(err) => trace.warn(format!("Error processing image {}: {err}", idx + 1)),
        }
    }
    out
}

/// First 100 chars followed by `...`, for trace lines.
pub(crate) fn preview(text: &str) -> String {
    let head: String = text.chars().take(100).collect();
    format!("{head}...")
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choice_validation_names_the_field() {
        assert!(require_choice("quality", "high", &["normal", "high"]).is_ok());
        assert_eq!(
            require_choice("quality", "ultra", &["normal", "high"]),
            Err(NodeError::InvalidInput(String::from("Invalid quality: ultra")))
        );
    }

    #[test]
    fn bad_images_are_skipped_not_fatal() {
        let good = ImageBuffer::solid(2, 2, [10, 20, 30]);
        let bad = ImageBuffer::new(vec![1, 6, 6, 2], vec![0.5; 72]).expect("valid shape");
        let mut trace = DebugTrace::new("test");

        let encoded = encode_optional_images(&[Some(&good), None, Some(&bad)], &mut trace);

        assert_eq!(encoded.len(), 1);
        assert!(trace.render(" | ").contains("Error processing image 3"));
    }

    #[test]
    fn blank_key_is_missing_credential() {
        assert!(matches!(
            require_api_key("   ", "API key is required"),
            Err(NodeError::MissingCredential(_))
        ));
        assert_eq!(require_api_key(" sk ", "x").as_deref(), Ok("sk"));
    }
}
