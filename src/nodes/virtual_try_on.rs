use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::{require_api_key, require_choice, require_image, DebugTrace, NodeError, NodeRuntime};
use crate::codec::{buffer_to_png, image_to_buffer, ImageBuffer};
use crate::vendors::tryon::{self, TryOnCall, QUALITIES, WORKFLOW_TYPES};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VirtualTryOnRequest {
    pub api_key: String,
    pub base_image: Option<ImageBuffer>,
    pub product_image: Option<ImageBuffer>,
    pub workflow_type: String,
    pub quality: String,
    pub mask_image: Option<ImageBuffer>,
}

impl Default for VirtualTryOnRequest {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_image: None,
            product_image: None,
            workflow_type: String::from("eyewear"),
            quality: String::from("normal"),
            mask_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTryOnOutput {
    pub image: ImageBuffer,
    pub debug_logs: String,
}

/// Unlike the other nodes, try-on failures are surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("VirtualTryOn Error: {error}")]
pub struct TryOnFailure {
    #[source]
    pub error: NodeError,
    pub debug_logs: String,
}

/// PNG copies of the inputs on disk for the lifetime of one call.
struct StagedImages {
    files: Vec<NamedTempFile>,
}

impl StagedImages {
    fn new() -> Self {
        Self { files: Vec::new() }
    }

    /// Writes `png` to a fresh `tryon_*.png` file and returns the bytes read back.
    fn stage(&mut self, dir: Option<&Path>, png: &[u8], trace: &mut DebugTrace) -> Result<Vec<u8>, NodeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("tryon_").suffix(".png");
        let created = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut file = created.map_err(stage_error)?;
        file.write_all(png).map_err(stage_error)?;
        file.flush().map_err(stage_error)?;
        let bytes = std::fs::read(file.path()).map_err(stage_error)?;
        trace.debug(format!("Staged {} bytes at {}", bytes.len(), file.path().display()));
        self.files.push(file);
        Ok(bytes)
    }

    fn cleanup(self, trace: &mut DebugTrace) {
        for file in self.files {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => trace.debug(format!("Cleaned up temp file: {}", path.display())),
                Err(err) => trace.warn(format!("Failed to clean up temp file {}: {err}", path.display())),
            }
        }
    }
}

fn stage_error(err: std::io::Error) -> NodeError {
    NodeError::Unknown(format!("failed to stage temp image: {err}"))
}

/// Virtual try-on through the YourMirror generate endpoint.
#[derive(Clone)]
pub struct VirtualTryOnNode {
    runtime: NodeRuntime,
    temp_dir: Option<PathBuf>,
}

impl VirtualTryOnNode {
    pub const NAME: &'static str = "virtual_try_on";

    pub fn new(runtime: NodeRuntime) -> Self {
        Self {
            runtime,
            temp_dir: None,
        }
    }

    /// Stages temp images under `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn run(&self, request: &VirtualTryOnRequest) -> Result<VirtualTryOnOutput, TryOnFailure> {
        let mut trace = DebugTrace::new(Self::NAME);
        trace.info("Starting VirtualTryOn generation");
        let mut staged = StagedImages::new();
        let result = self.try_run(request, &mut staged, &mut trace);
        staged.cleanup(&mut trace);

        match result {
            Ok(image) => Ok(VirtualTryOnOutput {
                image,
                debug_logs: trace.render_tagged("\n"),
            }),
            Err(error) => {
                trace.error(format!("Error in virtual try-on: {error}"));
                Err(TryOnFailure {
                    error,
                    debug_logs: trace.render_tagged("\n"),
                })
            }
        }
    }

    fn try_run(
        &self,
        request: &VirtualTryOnRequest,
        staged: &mut StagedImages,
        trace: &mut DebugTrace,
    ) -> Result<ImageBuffer, NodeError> {
        let api_key = require_api_key(
            request.api_key.as_str(),
            "API key is required. Get your API key from yourmirror.io",
        )?;
        if require_choice("workflow_type", request.workflow_type.as_str(), &WORKFLOW_TYPES).is_err() {
            return Err(NodeError::InvalidInput(format!(
                "Invalid workflow type: {}",
                request.workflow_type
            )));
        }
        if require_choice("quality", request.quality.as_str(), &QUALITIES).is_err() {
            return Err(NodeError::InvalidInput(format!(
                "Invalid quality setting: {}",
                request.quality
            )));
        }
        let base = require_image(request.base_image.as_ref(), "Base image (person) is required")?;
        let product = require_image(request.product_image.as_ref(), "Product image (garment) is required")?;
        trace.info(format!(
            "Workflow: {}, quality: {}",
            request.workflow_type, request.quality
        ));

        let dir = self.temp_dir.as_deref();
        let base_png = staged.stage(dir, buffer_to_png(base)?.as_slice(), trace)?;
        let product_png = staged.stage(dir, buffer_to_png(product)?.as_slice(), trace)?;
        let mask_png = match request.mask_image.as_ref() {
            Some(mask) => {
                trace.info("Using mask image");
                Some(staged.stage(dir, buffer_to_png(mask)?.as_slice(), trace)?)
            }
            None => None,
        };

        let call = TryOnCall {
            api_key: api_key.as_str(),
            base_png: base_png.as_slice(),
            product_png: product_png.as_slice(),
            mask_png: mask_png.as_deref(),
            workflow_type: request.workflow_type.as_str(),
            quality: request.quality.as_str(),
        };
        let settings = self.runtime.settings();
        let url = tryon::generate(
            self.runtime.transport(),
            self.runtime.sleeper(),
            settings,
            &call,
            trace,
        )?;
        let bytes = tryon::download_result(self.runtime.transport(), settings, url.as_str(), trace)?;
        let image = image_to_buffer(bytes.as_slice()).map_err(|e| NodeError::Download(e.to_string()))?;
        if let Ok((width, height)) = image.dimensions() {
            trace.info(format!("Result image: {width}x{height}"));
        }
        trace.info("Virtual try-on completed");
        Ok(image)
    }
}
