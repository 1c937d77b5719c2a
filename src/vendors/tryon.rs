use serde_json::{json, Value};
use url::Url;

use super::vendor_error_message;
use crate::codec::png_data_url;
use crate::config::NodeSettings;
use crate::nodes::NodeError;
use crate::trace::DebugTrace;
use crate::transport::retry::{send_with_backoff, Sleeper};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const WORKFLOW_TYPES: [&str; 5] = ["eyewear", "footwear", "dress", "bottom", "top"];
pub const QUALITIES: [&str; 2] = ["normal", "high"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnCall<'a> {
    pub api_key: &'a str,
    pub base_png: &'a [u8],
    pub product_png: &'a [u8],
    pub mask_png: Option<&'a [u8]>,
    pub workflow_type: &'a str,
    pub quality: &'a str,
}

fn file_payload(png: &[u8]) -> Value {
    json!({
        "path": png_data_url(png),
        "meta": {"_type": "gradio.FileData"},
    })
}

pub fn build_generate_request(settings: &NodeSettings, call: &TryOnCall<'_>) -> HttpRequest {
    let body = json!({
        "data": [
            file_payload(call.base_png),
            file_payload(call.product_png),
            call.workflow_type,
            call.mask_png.map(file_payload),
            call.quality,
            call.api_key.trim(),
        ]
    });
    let high_quality = call.quality.eq_ignore_ascii_case("high");
    HttpRequest::post_json(
        format!("{}/generate", settings.tryon_base_url),
        body,
        settings.tryon_timeout(high_quality),
    )
    .with_header("User-Agent", settings.user_agent.as_str())
}

/// Extracts the result URL from a successful `/generate` reply.
pub fn parse_generate_response(resp: &HttpResponse) -> Result<String, NodeError> {
    let text = resp.text();
    if let Some(message) = vendor_error_message(text.as_str()) {
        return Err(NodeError::upstream(
            Some(resp.status),
            format!("API Error: {message}"),
        ));
    }
    let payload: Value = serde_json::from_str(text.as_str())
        .map_err(|e| NodeError::upstream(Some(resp.status), format!("try-on JSON decode failed: {e}")))?;
    let first = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .ok_or_else(|| NodeError::upstream(Some(resp.status), "No image data returned from API"))?;
    let raw = match first {
        Value::String(url) => url.as_str(),
        Value::Object(obj) => obj
            .get("url")
            .or_else(|| obj.get("path"))
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::upstream(Some(resp.status), "No image data returned from API"))?,
        _ => return Err(NodeError::upstream(Some(resp.status), "No image data returned from API")),
    };
    let url = Url::parse(raw)
        .map_err(|e| NodeError::upstream(Some(resp.status), format!("invalid result URL '{raw}': {e}")))?;
    Ok(url.to_string())
}

/// Posts the try-on job through the backoff wrapper and returns the result URL.
pub fn generate(
    transport: &dyn HttpTransport,
    sleeper: &dyn Sleeper,
    settings: &NodeSettings,
    call: &TryOnCall<'_>,
    trace: &mut DebugTrace,
) -> Result<String, NodeError> {
    let request = build_generate_request(settings, call);
    trace.debug("API Payload structure:");
    trace.debug(format!("  - Workflow type: {}", call.workflow_type));
    trace.debug(format!("  - Has mask: {}", call.mask_png.is_some()));
    trace.debug(format!("  - Quality: {}", call.quality));
    trace.debug(format!("  - API key length: {}", call.api_key.trim().len()));
    trace.debug(format!("Request timeout: {}s", request.timeout.as_secs()));

    let resp = send_with_backoff(transport, sleeper, &request, settings.retry_policy(), trace)?;
    let url = parse_generate_response(&resp)?;
    trace.info("API request successful!");
    Ok(url)
}

/// Fetches the rendered image once; every failure is a download error.
pub fn download_result(
    transport: &dyn HttpTransport,
    settings: &NodeSettings,
    image_url: &str,
    trace: &mut DebugTrace,
) -> Result<Vec<u8>, NodeError> {
    trace.info(format!("Downloading result image from: {image_url}"));
    let request = HttpRequest::get(image_url, settings.download_timeout());
    let resp = transport
        .send(&request)
        .map_err(|e| NodeError::Download(e.to_string()))?;
    if !resp.is_success() {
        return Err(NodeError::Download(format!(
            "HTTP {} from {image_url}",
            resp.status
        )));
    }
    Ok(resp.body)
}
