use serde::Deserialize;

use super::{preview, require_api_key, require_choice, require_image, DebugTrace, NodeError, NodeRuntime};
use crate::codec::{base64_image_to_buffer, buffer_to_png, ImageBuffer};
use crate::prompt::compose_fashion_prompt;
use crate::vendors::openai_images::{
    self, GeneratedImage, ImageEditParams, API_METHODS, BACKGROUNDS, INPUT_FIDELITIES, OUTPUT_FORMATS,
    QUALITIES, SIZES,
};

pub const DEFAULT_PROMPT: &str =
    "Change the outfit color to blue while preserving all details and textures";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImageFidelityRequest {
    pub api_key: String,
    pub prompt: String,
    pub primary_image: Option<ImageBuffer>,
    pub input_fidelity: String,
    pub quality: String,
    pub size: String,
    pub output_format: String,
    pub background: String,
    pub fashion_preset: String,
    pub api_method: String,
    pub reference_image: Option<ImageBuffer>,
    pub mask_image: Option<ImageBuffer>,
}

impl Default for ImageFidelityRequest {
    fn default() -> Self {
        let params = ImageEditParams::default();
        Self {
            api_key: String::new(),
            prompt: String::from(DEFAULT_PROMPT),
            primary_image: None,
            input_fidelity: params.input_fidelity,
            quality: params.quality,
            size: params.size,
            output_format: params.output_format,
            background: params.background,
            fashion_preset: String::from("custom"),
            api_method: String::from("responses_api"),
            reference_image: None,
            mask_image: None,
        }
    }
}

impl ImageFidelityRequest {
    fn params(&self) -> ImageEditParams {
        ImageEditParams {
            input_fidelity: self.input_fidelity.clone(),
            quality: self.quality.clone(),
            size: self.size.clone(),
            output_format: self.output_format.clone(),
            background: self.background.clone(),
        }
    }

    fn validate(&self) -> Result<(), NodeError> {
        require_choice("input_fidelity", self.input_fidelity.as_str(), &INPUT_FIDELITIES)?;
        require_choice("quality", self.quality.as_str(), &QUALITIES)?;
        require_choice("size", self.size.as_str(), &SIZES)?;
        require_choice("output_format", self.output_format.as_str(), &OUTPUT_FORMATS)?;
        require_choice("background", self.background.as_str(), &BACKGROUNDS)?;
        require_choice("api_method", self.api_method.as_str(), &API_METHODS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageFidelityOutput {
    pub image: ImageBuffer,
    pub revised_prompt: String,
    pub debug_info: String,
}

/// High-fidelity fashion edits through the OpenAI Images or Responses API.
///
/// On failure the primary image is passed through unchanged.
#[derive(Clone)]
pub struct ImageFidelityNode {
    runtime: NodeRuntime,
}

impl ImageFidelityNode {
    pub const NAME: &'static str = "image_fidelity";

    pub fn new(runtime: NodeRuntime) -> Self {
        Self { runtime }
    }

    pub fn run(&self, request: &ImageFidelityRequest) -> ImageFidelityOutput {
        let mut trace = DebugTrace::new(Self::NAME);
        match self.try_run(request, &mut trace) {
            Ok((image, revised_prompt)) => ImageFidelityOutput {
                image,
                revised_prompt,
                debug_info: trace.render(" | "),
            },
            Err(err) => {
                trace.error(format!("Error in fashion image generation: {err}"));
                let image = request
                    .primary_image
                    .clone()
                    .unwrap_or_else(|| ImageBuffer::solid(512, 512, [0, 0, 0]));
                ImageFidelityOutput {
                    image,
                    revised_prompt: format!("Error: {err}"),
                    debug_info: trace.render(" | "),
                }
            }
        }
    }

    pub fn try_run(
        &self,
        request: &ImageFidelityRequest,
        trace: &mut DebugTrace,
    ) -> Result<(ImageBuffer, String), NodeError> {
        let api_key = require_api_key(
            request.api_key.as_str(),
            "OpenAI API Key is required. Please enter your API key in the node.",
        )?;
        request.validate()?;
        let primary = require_image(request.primary_image.as_ref(), "Primary image is required")?;
        trace.info("Using provided API key");

        let prompt = compose_fashion_prompt(request.fashion_preset.as_str(), request.prompt.as_str());
        trace.info(format!("Fashion preset: {}", request.fashion_preset));
        trace.info(format!("Final prompt: {}", preview(prompt.as_str())));

        let params = request.params();
        let primary_png = buffer_to_png(primary)?;
        let use_responses = request.api_method == "responses_api" || request.reference_image.is_some();
        let settings = self.runtime.settings();
        let transport = self.runtime.transport();

        let (generated, api_used): (GeneratedImage, &str) = if use_responses {
            trace.info("Using Responses API");
            let mut images = vec![primary_png];
            if let Some(reference) = request.reference_image.as_ref() {
                images.push(buffer_to_png(reference)?);
            }
            let generated = openai_images::edit_with_responses_api(
                transport,
                settings,
                api_key.as_str(),
                prompt.as_str(),
                &params,
                images.as_slice(),
                trace,
            )?;
            (generated, "responses_api")
        } else {
            trace.info("Using Images API");
            let mask_png = request.mask_image.as_ref().map(buffer_to_png).transpose()?;
            let generated = openai_images::edit_with_images_api(
                transport,
                settings,
                api_key.as_str(),
                prompt.as_str(),
                &params,
                primary_png,
                mask_png,
                trace,
            )?;
            (generated, "images_api")
        };
        trace.info(format!("API used: {api_used}"));
        trace.info(format!("Input fidelity: {}", request.input_fidelity));

        let image = base64_image_to_buffer(generated.b64_image.as_str())?;
        trace.info("Success: Image generated successfully");
        Ok((image, generated.revised_prompt))
    }
}
