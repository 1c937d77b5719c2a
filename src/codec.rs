use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::Deserialize;
use thiserror::Error;

/// Host-side image tensor: a shape plus row-major `f32` samples.
///
/// Accepted layouts are `(N, H, W, C)`, `(H, W, C)`, `(C, H, W)` and `(H, W)`.
/// Buffers built by this crate are always `(1, H, W, 3)` in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "WireImage")]
pub struct ImageBuffer {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// JSON forms an image buffer may arrive in.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireImage {
    Encoded { png_base64: String },
    Raw { shape: Vec<usize>, data: Vec<f32> },
}

impl TryFrom<WireImage> for ImageBuffer {
    type Error = CodecError;

    fn try_from(wire: WireImage) -> Result<Self, Self::Error> {
        match wire {
            WireImage::Encoded { png_base64 } => base64_image_to_buffer(png_base64.as_str()),
            WireImage::Raw { shape, data } => Self::new(shape, data),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid image buffer: {0}")]
    InvalidShape(String),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("PNG encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

impl ImageBuffer {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, CodecError> {
        if shape.len() < 2 || shape.len() > 4 {
            return Err(CodecError::InvalidShape(format!(
                "expected 2 to 4 dimensions, got {}",
                shape.len()
            )));
        }
        if shape.iter().any(|dim| *dim == 0) {
            return Err(CodecError::InvalidShape(format!(
                "zero-sized dimension in shape {shape:?}"
            )));
        }
        let expected = shape
            .iter()
            .try_fold(1_usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| {
                CodecError::InvalidShape(format!("shape {shape:?} is too large"))
            })?;
        if expected != data.len() {
            return Err(CodecError::InvalidShape(format!(
                "shape {shape:?} needs {expected} samples, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A `(1, H, W, 3)` buffer filled with one color.
    pub fn solid(height: u32, width: u32, rgb: [u8; 3]) -> Self {
        let pixels = height as usize * width as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend(rgb.iter().map(|v| f32::from(*v) / 255.0));
        }
        Self {
            shape: vec![1, height as usize, width as usize, 3],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    pub fn data(&self) -> &[f32] {
        self.data.as_slice()
    }

    /// `(width, height)` of the frame that would be encoded.
    pub fn dimensions(&self) -> Result<(u32, u32), CodecError> {
        let frame = self.to_hwc_frame()?;
        Ok((frame.width as u32, frame.height as u32))
    }

    fn to_hwc_frame(&self) -> Result<HwcFrame, CodecError> {
        let frame_shape = match self.shape.as_slice() {
            [_, a, b, c] => [*a, *b, *c],
            [a, b, c] => [*a, *b, *c],
            [h, w] => [*h, *w, 1],
            other => {
                return Err(CodecError::InvalidShape(format!(
                    "unsupported tensor rank {}",
                    other.len()
                )))
            }
        };
        // Batched input: only the first frame is encoded.
        let frame_len = frame_shape.iter().product::<usize>();
        let samples = &self.data[..frame_len];

        let [a, b, c] = frame_shape;
        // Channel-first only when the trailing axis cannot be a channel axis.
        let channel_first = is_channel_count(a) && c > 4;
        if !channel_first {
            return Ok(HwcFrame {
                height: a,
                width: b,
                channels: c,
                samples: samples.to_vec(),
            });
        }

        let (channels, height, width) = (a, b, c);
        let plane = height * width;
        let mut out = vec![0.0_f32; samples.len()];
        for ch in 0..channels {
            for idx in 0..plane {
                out[idx * channels + ch] = samples[ch * plane + idx];
            }
        }
        Ok(HwcFrame {
            height,
            width,
            channels,
            samples: out,
        })
    }
}

struct HwcFrame {
    height: usize,
    width: usize,
    channels: usize,
    samples: Vec<f32>,
}

fn is_channel_count(value: usize) -> bool {
    matches!(value, 1 | 3 | 4)
}

/// Converts a host image buffer into a PNG byte stream.
pub fn buffer_to_png(buffer: &ImageBuffer) -> Result<Vec<u8>, CodecError> {
    let rgb = buffer_to_rgb_image(buffer)?;
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(rgb)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(CodecError::Encode)?;
    Ok(bytes)
}

pub fn buffer_to_png_base64(buffer: &ImageBuffer) -> Result<String, CodecError> {
    Ok(BASE64_STANDARD.encode(buffer_to_png(buffer)?))
}

pub fn png_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64_STANDARD.encode(png))
}

/// Decodes PNG/JPEG/WEBP bytes into a `(1, H, W, 3)` buffer in `[0, 1]`.
pub fn image_to_buffer(bytes: &[u8]) -> Result<ImageBuffer, CodecError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| CodecError::UnsupportedFormat(format!("image decode failed: {e}")))?;
    Ok(rgb_image_to_buffer(&decoded.to_rgb8()))
}

/// Accepts bare base64 or a `data:image/...;base64,` URL.
pub fn base64_image_to_buffer(encoded: &str) -> Result<ImageBuffer, CodecError> {
    let trimmed = encoded.trim();
    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    let bytes = BASE64_STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| CodecError::UnsupportedFormat(format!("image base64 decode failed: {e}")))?;
    image_to_buffer(bytes.as_slice())
}

fn rgb_image_to_buffer(image: &RgbImage) -> ImageBuffer {
    let (width, height) = image.dimensions();
    ImageBuffer {
        shape: vec![1, height as usize, width as usize, 3],
        data: image
            .as_raw()
            .iter()
            .map(|v| f32::from(*v) / 255.0)
            .collect(),
    }
}

fn buffer_to_rgb_image(buffer: &ImageBuffer) -> Result<RgbImage, CodecError> {
    let frame = buffer.to_hwc_frame()?;
    let max_sample = frame
        .samples
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(f32::MIN, f32::max);
    let scale = if max_sample <= 1.0 { 255.0 } else { 1.0 };
    let to_u8 = |v: f32| (v * scale).round().clamp(0.0, 255.0) as u8;

    let pixels = frame.height * frame.width;
    let mut raw = Vec::with_capacity(pixels * 3);
    match frame.channels {
        1 => {
            for v in frame.samples.iter() {
                let gray = to_u8(*v);
                raw.extend_from_slice(&[gray, gray, gray]);
            }
        }
        3 => raw.extend(frame.samples.iter().map(|v| to_u8(*v))),
        4 => {
            for px in frame.samples.chunks_exact(4) {
                raw.extend(px[..3].iter().map(|v| to_u8(*v)));
            }
        }
        other => {
            return Err(CodecError::UnsupportedFormat(format!(
                "{other} channels (shape {:?})",
                buffer.shape()
            )))
        }
    }

    RgbImage::from_raw(frame.width as u32, frame.height as u32, raw).ok_or_else(|| {
        CodecError::InvalidShape(format!("raster size mismatch for shape {:?}", buffer.shape()))
    })
}
