use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{decode_json, send_checked};
use crate::codec::png_data_url;
use crate::config::NodeSettings;
use crate::nodes::NodeError;
use crate::trace::DebugTrace;
use crate::transport::{FormField, HttpRequest, HttpResponse, HttpTransport};

pub const INPUT_FIDELITIES: [&str; 2] = ["high", "low"];
pub const QUALITIES: [&str; 4] = ["auto", "low", "medium", "high"];
pub const SIZES: [&str; 4] = ["auto", "1024x1024", "1024x1536", "1536x1024"];
pub const OUTPUT_FORMATS: [&str; 3] = ["png", "jpeg", "webp"];
pub const BACKGROUNDS: [&str; 3] = ["auto", "opaque", "transparent"];
pub const API_METHODS: [&str; 2] = ["responses_api", "images_api"];

const IMAGES_API_DEFAULT_REVISED_PROMPT: &str = "N/A (Images API)";
const RESPONSES_API_DEFAULT_REVISED_PROMPT: &str = "Generated via Responses API";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEditParams {
    pub input_fidelity: String,
    pub quality: String,
    pub size: String,
    pub output_format: String,
    pub background: String,
}

impl Default for ImageEditParams {
    fn default() -> Self {
        Self {
            input_fidelity: String::from("high"),
            quality: String::from("high"),
            size: String::from("auto"),
            output_format: String::from("png"),
            background: String::from("auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub b64_image: String,
    pub revised_prompt: String,
}

#[derive(Debug, Deserialize)]
struct ImagesEditResponse {
    #[serde(default)]
    data: Vec<ImagesEditItem>,
}

#[derive(Debug, Deserialize)]
struct ImagesEditItem {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

pub fn build_images_edit_request(
    settings: &NodeSettings,
    api_key: &str,
    prompt: &str,
    params: &ImageEditParams,
    primary_png: Vec<u8>,
    mask_png: Option<Vec<u8>>,
) -> HttpRequest {
    let mut fields = vec![
        FormField::text("model", settings.images_model.as_str()),
        FormField::png("image", "image.png", primary_png),
        FormField::text("prompt", prompt),
        FormField::text("size", params.size.as_str()),
        FormField::text("quality", params.quality.as_str()),
    ];
    if params.input_fidelity == "high" {
        fields.push(FormField::text("input_fidelity", "high"));
    }
    if params.output_format != "auto" {
        fields.push(FormField::text("output_format", params.output_format.as_str()));
    }
    if params.background != "auto" {
        fields.push(FormField::text("background", params.background.as_str()));
    }
    if let Some(mask) = mask_png {
        fields.push(FormField::png("mask", "mask.png", mask));
    }
    HttpRequest::post_multipart(
        format!("{}/v1/images/edits", settings.openai_base_url),
        fields,
        settings.vendor_timeout(),
    )
    .with_bearer(api_key)
}

pub fn parse_images_edit_response(resp: &HttpResponse) -> Result<GeneratedImage, NodeError> {
    let payload: ImagesEditResponse = decode_json(resp, "OpenAI Images API")?;
    let item = payload
        .data
        .into_iter()
        .next()
        .ok_or_else(|| NodeError::upstream(Some(resp.status), "No data received from Images API"))?;
    let b64_image = item
        .b64_json
        .ok_or_else(|| NodeError::upstream(Some(resp.status), "No image data in Images API response"))?;
    Ok(GeneratedImage {
        b64_image,
        revised_prompt: item
            .revised_prompt
            .unwrap_or_else(|| String::from(IMAGES_API_DEFAULT_REVISED_PROMPT)),
    })
}

/// `images` are PNG streams in the order they should be shown to the model.
pub fn build_responses_request(
    settings: &NodeSettings,
    api_key: &str,
    prompt: &str,
    params: &ImageEditParams,
    images: &[Vec<u8>],
) -> HttpRequest {
    let mut content = vec![json!({"type": "input_text", "text": prompt})];
    content.extend(images.iter().map(|png| {
        json!({
            "type": "input_image",
            "image_url": png_data_url(png.as_slice()),
        })
    }));

    let mut tool = Map::new();
    tool.insert(String::from("type"), json!("image_generation"));
    if params.input_fidelity == "high" {
        tool.insert(String::from("input_fidelity"), json!("high"));
    }
    for (key, value) in [
        ("quality", &params.quality),
        ("size", &params.size),
        ("output_format", &params.output_format),
        ("background", &params.background),
    ] {
        if value != "auto" {
            tool.insert(key.to_string(), json!(value));
        }
    }

    let body = json!({
        "model": settings.responses_model,
        "input": [{"role": "user", "content": content}],
        "tools": [Value::Object(tool)],
    });
    HttpRequest::post_json(
        format!("{}/v1/responses", settings.openai_base_url),
        body,
        settings.vendor_timeout(),
    )
    .with_bearer(api_key)
}

pub fn parse_responses_response(resp: &HttpResponse) -> Result<GeneratedImage, NodeError> {
    let payload: ResponsesResponse = decode_json(resp, "OpenAI Responses API")?;
    if payload.output.is_empty() {
        return Err(NodeError::upstream(
            Some(resp.status),
            "No output received from Responses API",
        ));
    }
    let call = payload
        .output
        .into_iter()
        .find(|item| item.kind == "image_generation_call" && item.result.is_some())
        .ok_or_else(|| {
            NodeError::upstream(
                Some(resp.status),
                "No image generation calls found in Responses API response",
            )
        })?;
    Ok(GeneratedImage {
        b64_image: call.result.unwrap_or_default(),
        revised_prompt: call
            .revised_prompt
            .unwrap_or_else(|| String::from(RESPONSES_API_DEFAULT_REVISED_PROMPT)),
    })
}

pub fn edit_with_images_api(
    transport: &dyn HttpTransport,
    settings: &NodeSettings,
    api_key: &str,
    prompt: &str,
    params: &ImageEditParams,
    primary_png: Vec<u8>,
    mask_png: Option<Vec<u8>>,
    trace: &mut DebugTrace,
) -> Result<GeneratedImage, NodeError> {
    let request = build_images_edit_request(settings, api_key, prompt, params, primary_png, mask_png);
    let resp = send_checked(transport, &request, trace)?;
    parse_images_edit_response(&resp)
}

pub fn edit_with_responses_api(
    transport: &dyn HttpTransport,
    settings: &NodeSettings,
    api_key: &str,
    prompt: &str,
    params: &ImageEditParams,
    images: &[Vec<u8>],
    trace: &mut DebugTrace,
) -> Result<GeneratedImage, NodeError> {
    let request = build_responses_request(settings, api_key, prompt, params, images);
    let resp = send_checked(transport, &request, trace)?;
    parse_responses_response(&resp)
}
