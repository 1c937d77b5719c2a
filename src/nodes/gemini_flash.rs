use serde::Deserialize;

use super::{encode_optional_images, preview, require_api_key, DebugTrace, NodeError, NodeRuntime};
use crate::codec::{image_to_buffer, ImageBuffer};
use crate::prompt::compose_gemini_prompt;
use crate::vendors::gemini::{self, DEFAULT_GEMINI_MODEL};

pub const DEFAULT_PROMPT: &str = "Generate a beautiful landscape with mountains and a lake";
const ERROR_IMAGE_RGB: [u8; 3] = [0, 0, 0];
const PLACEHOLDER_RGB: [u8; 3] = [100, 100, 100];
const PLACEHOLDER_SIZE: u32 = 512;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GeminiFlashRequest {
    pub api_key: String,
    pub prompt: String,
    pub mode: String,
    pub model: String,
    pub primary_image: Option<ImageBuffer>,
    pub reference_image: Option<ImageBuffer>,
    pub secondary_image: Option<ImageBuffer>,
    pub mask_image: Option<ImageBuffer>,
}

impl Default for GeminiFlashRequest {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            prompt: String::from(DEFAULT_PROMPT),
            mode: String::from("generate"),
            model: String::from(DEFAULT_GEMINI_MODEL),
            primary_image: None,
            reference_image: None,
            secondary_image: None,
            mask_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiFlashOutput {
    pub image: ImageBuffer,
    pub text_response: String,
    pub debug_info: String,
}

/// Image generation and editing with Gemini 2.5 Flash Image.
#[derive(Clone)]
pub struct GeminiFlashNode {
    runtime: NodeRuntime,
}

impl GeminiFlashNode {
    pub const NAME: &'static str = "gemini_flash";

    pub fn new(runtime: NodeRuntime) -> Self {
        Self { runtime }
    }

    pub fn run(&self, request: &GeminiFlashRequest) -> GeminiFlashOutput {
        let mut trace = DebugTrace::new(Self::NAME);
        match self.try_run(request, &mut trace) {
            Ok((image, text_response)) => GeminiFlashOutput {
                image,
                text_response,
                debug_info: trace.render(" | "),
            },
            Err(err) => {
                trace.error(format!("Error in Gemini generation: {err}"));
                GeminiFlashOutput {
                    image: ImageBuffer::solid(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, ERROR_IMAGE_RGB),
                    text_response: format!("Error: {err}"),
                    debug_info: trace.render(" | "),
                }
            }
        }
    }

    pub fn try_run(
        &self,
        request: &GeminiFlashRequest,
        trace: &mut DebugTrace,
    ) -> Result<(ImageBuffer, String), NodeError> {
        let api_key = require_api_key(
            request.api_key.as_str(),
            "Google API Key is required. Please enter your API key in the node.",
        )?;
        let model = request.model.trim();
        if model.is_empty() {
            return Err(NodeError::InvalidInput(String::from("model must not be empty")));
        }

        let prompt = compose_gemini_prompt(request.mode.as_str(), request.prompt.as_str());
        trace.info(format!("Mode: {}", request.mode));
        trace.info(format!("Model: {model}"));
        trace.info(format!("Optimized prompt: {}", preview(prompt.as_str())));

        let images = encode_optional_images(
            &[
                request.primary_image.as_ref(),
                request.reference_image.as_ref(),
                request.secondary_image.as_ref(),
                request.mask_image.as_ref(),
            ],
            trace,
        );
        trace.info(format!("Input images: {}", images.len()));

        let reply = gemini::generate_content(
            self.runtime.transport(),
            self.runtime.settings(),
            api_key.as_str(),
            model,
            prompt.as_str(),
            images.as_slice(),
            trace,
        )?;
        if let Some(usage) = reply.usage {
            trace.info(usage.summary());
        }

        let decoded = reply.image.and_then(|bytes| match image_to_buffer(bytes.as_slice()) {
            Ok(image) => Some(image),
            Err(err) => {
                trace.warn(format!("Returned image could not be decoded: {err}"));
                None
            }
        });

        match decoded {
            Some(image) => {
                let (width, height) = image.dimensions()?;
                trace.info(format!("Generated image: {width}x{height}"));
                trace.info("Success: generation completed");
                let text = if reply.text.is_empty() {
                    String::from("Image generated successfully with Gemini 2.5 Flash Image")
                } else {
                    reply.text
                };
                Ok((image, text))
            }
            None => {
                trace.warn("No image generated, using placeholder");
                let text = if reply.text.is_empty() {
                    String::from("No image could be generated")
                } else {
                    reply.text
                };
                Ok((
                    ImageBuffer::solid(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, PLACEHOLDER_RGB),
                    text,
                ))
            }
        }
    }
}
