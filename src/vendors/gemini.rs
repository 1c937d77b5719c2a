use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{decode_json, send_checked, TokenUsage};
use crate::config::NodeSettings;
use crate::nodes::NodeError;
use crate::trace::DebugTrace;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const GEMINI_MODELS: [&str; 1] = ["gemini-2.5-flash-image-preview"];
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiReply {
    pub text: String,
    /// Raw bytes of the last inline image part, if any.
    pub image: Option<Vec<u8>>,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(meta: UsageMetadata) -> Self {
        Self {
            prompt_tokens: meta.prompt_token_count,
            completion_tokens: meta.candidates_token_count,
            total_tokens: meta.total_token_count,
        }
    }
}

fn safety_settings() -> Value {
    json!([
        {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
        {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_MEDIUM_AND_ABOVE"},
    ])
}

/// `images` are PNG streams already ordered primary, reference, secondary, mask.
pub fn build_request(
    settings: &NodeSettings,
    api_key: &str,
    model: &str,
    prompt: &str,
    images: &[Vec<u8>],
) -> HttpRequest {
    let mut parts = vec![json!({"text": prompt})];
    parts.extend(images.iter().map(|png| {
        json!({
            "inline_data": {
                "mime_type": "image/png",
                "data": BASE64_STANDARD.encode(png.as_slice()),
            }
        })
    }));
    let body = json!({
        "contents": [{"role": "user", "parts": parts}],
        "safetySettings": safety_settings(),
        "generationConfig": {
            "temperature": 0.7,
            "topP": 0.9,
            "topK": 40,
            "maxOutputTokens": 2048,
        },
    });
    HttpRequest::post_json(
        format!(
            "{}/v1beta/models/{model}:generateContent",
            settings.gemini_base_url
        ),
        body,
        settings.vendor_timeout(),
    )
    .with_header("x-goog-api-key", api_key)
}

pub fn parse_reply(resp: &HttpResponse) -> Result<GeminiReply, NodeError> {
    let payload: GenerateContentResponse = decode_json(resp, "Gemini")?;
    let mut texts = Vec::new();
    let mut image = None;
    let parts = payload
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts)
        .unwrap_or_default();
    for part in parts {
        if let Some(text) = part.text.filter(|t| !t.is_empty()) {
            texts.push(text);
        } else if let Some(inline) = part.inline_data {
            match BASE64_STANDARD.decode(inline.data.as_bytes()) {
                Ok(bytes) => image = Some(bytes),
                Err(error) => tracing::warn!(error = %error, "skipping inline image with invalid base64"),
            }
        }
    }
    Ok(GeminiReply {
        text: texts.join(" ").trim().to_string(),
        image,
        usage: payload.usage_metadata.map(TokenUsage::from),
    })
}

pub fn generate_content(
    transport: &dyn HttpTransport,
    settings: &NodeSettings,
    api_key: &str,
    model: &str,
    prompt: &str,
    images: &[Vec<u8>],
    trace: &mut DebugTrace,
) -> Result<GeminiReply, NodeError> {
    let request = build_request(settings, api_key, model, prompt, images);
    let resp = send_checked(transport, &request, trace)?;
    parse_reply(&resp)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn request_orders_text_before_images_and_sets_key_header() {
        let request = build_request(
            &NodeSettings::default(),
            "g-key",
            DEFAULT_GEMINI_MODEL,
            "a lake",
            &[vec![1, 2], vec![3]],
        );
        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image-preview:generateContent"
        );
        assert_eq!(
            request.headers,
            vec![(String::from("x-goog-api-key"), String::from("g-key"))]
        );
        assert!(request.bearer_token.is_none());

        let body = request.json_body().expect("json body");
        let parts = body["contents"][0]["parts"].as_array().expect("parts");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], json!({"text": "a lake"}));
        assert_eq!(parts[1]["inline_data"]["data"], json!("AQI="));
        assert_eq!(parts[2]["inline_data"]["data"], json!("Aw=="));
        assert_eq!(body["generationConfig"]["topK"], json!(40));
        assert_eq!(body["safetySettings"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn parses_recorded_text_and_image_reply() {
        let resp = HttpResponse::new(
            200,
            json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [
                            {"text": "Here is your lake."},
                            {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                            {"text": "Enjoy!"}
                        ]
                    },
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 1290, "totalTokenCount": 1300}
            })
            .to_string(),
        );
        let reply = parse_reply(&resp).expect("reply");
        assert_eq!(reply.text, "Here is your lake. Enjoy!");
        assert_eq!(reply.image, Some(vec![1, 2, 3]));
        assert_eq!(reply.usage.map(|u| u.total_tokens), Some(1300));
    }

    #[test]
    fn accepts_snake_case_inline_data_and_keeps_last_image() {
        let resp = HttpResponse::new(
            200,
            json!({
                "candidates": [{"content": {"parts": [
                    {"inline_data": {"mime_type": "image/png", "data": "AQ=="}},
                    {"inline_data": {"mime_type": "image/png", "data": "Ag=="}}
                ]}}]
            })
            .to_string(),
        );
        let reply = parse_reply(&resp).expect("reply");
        assert_eq!(reply.image, Some(vec![2]));
        assert!(reply.text.is_empty());
    }

    #[test]
    fn blocked_prompt_yields_no_image() {
        let resp = HttpResponse::new(
            200,
            json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string(),
        );
        let reply = parse_reply(&resp).expect("reply");
        assert!(reply.image.is_none());
        assert!(reply.usage.is_none());
    }
}
