use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{decode_json, send_checked, TokenUsage};
use crate::config::NodeSettings;
use crate::nodes::NodeError;
use crate::prompt::detect_language;
use crate::trace::DebugTrace;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub const CHAT_MODELS: [&str; 4] = ["gpt-4o-mini", "gpt-4o", "gpt-4-turbo", "gpt-4"];
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const CHAT_TEMPERATURE: f64 = 0.7;
const ENGLISH_PREFIX: &str = "English response: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
        }
    }

    /// User turn made of an instruction followed by image data URLs.
    pub fn user_with_images(text: impl Into<String>, image_urls: Vec<String>) -> Self {
        let mut parts = vec![ContentPart::Text { text: text.into() }];
        parts.extend(
            image_urls
                .into_iter()
                .map(|url| ContentPart::ImageUrl {
                    image_url: ImageUrl { url },
                }),
        );
        Self {
            role: ChatRole::User,
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_characters: u32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub fn build_request(
    settings: &NodeSettings,
    api_key: &str,
    request: &ChatCompletionRequest,
) -> Result<HttpRequest, NodeError> {
    let body = serde_json::to_value(ChatCompletionBody {
        model: request.model.as_str(),
        messages: request.messages.as_slice(),
        max_tokens: request.max_characters.saturating_mul(2),
        temperature: CHAT_TEMPERATURE,
    })
    .map_err(|e| NodeError::Unknown(format!("chat request encode failed: {e}")))?;
    Ok(HttpRequest::post_json(
        format!("{}/v1/chat/completions", settings.openai_base_url),
        body,
        settings.vendor_timeout(),
    )
    .with_bearer(api_key))
}

pub fn parse_reply(resp: &HttpResponse) -> Result<ChatReply, NodeError> {
    let payload: ChatCompletionResponse = decode_json(resp, "OpenAI chat")?;
    let text = payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| NodeError::upstream(Some(resp.status), "No choices returned from chat completion"))?;
    Ok(ChatReply {
        text: text.trim().to_string(),
        usage: payload.usage,
    })
}

pub fn complete(
    transport: &dyn HttpTransport,
    settings: &NodeSettings,
    api_key: &str,
    request: &ChatCompletionRequest,
    trace: &mut DebugTrace,
) -> Result<ChatReply, NodeError> {
    let http = build_request(settings, api_key, request)?;
    let resp = send_checked(transport, &http, trace)?;
    parse_reply(&resp)
}

/// Cuts `text` to `max_characters` chars, backs off to the last space and
/// appends `...`. Text within the limit is returned unchanged. When the cut
/// contains no space at all, the single overlong word is hard-cut at the limit.
pub fn truncate_at_word_boundary(text: &str, max_characters: usize) -> String {
    if text.chars().count() <= max_characters {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_characters).collect();
    let head = match cut.rfind(' ') {
        Some(idx) => &cut[..idx],
        None => cut.as_str(),
    };
    format!("{head}...")
}

/// Heuristic: replies not detected as English get a marker prefix and are
/// truncated again.
pub fn enforce_english(text: String, max_characters: usize) -> String {
    let lang = detect_language(text.as_str());
    if lang == "en" {
        return text;
    }
    warn!(detected = %lang, "reply not detected as English, prefixing marker");
    truncate_at_word_boundary(format!("{ENGLISH_PREFIX}{text}").as_str(), max_characters)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn request_body_interleaves_text_and_images() {
        let request = ChatCompletionRequest {
            model: String::from("gpt-4o-mini"),
            messages: vec![
                ChatMessage::text(ChatRole::System, "be brief"),
                ChatMessage::user_with_images("describe", vec![String::from("data:image/png;base64,AAA")]),
            ],
            max_characters: 500,
        };
        let http = build_request(&NodeSettings::default(), "sk-test", &request).expect("request");

        assert_eq!(http.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(http.bearer_token.as_deref(), Some("sk-test"));
        assert_eq!(
            http.json_body().cloned(),
            Some(json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": [
                        {"type": "text", "text": "describe"},
                        {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAA"}}
                    ]}
                ],
                "max_tokens": 1000,
                "temperature": 0.7
            }))
        );
    }

    #[test]
    fn parses_recorded_completion() {
        let resp = HttpResponse::new(
            200,
            json!({
                "id": "chatcmpl-123",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "  A crisp studio portrait.  "},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 20, "completion_tokens": 7, "total_tokens": 27}
            })
            .to_string(),
        );
        let reply = parse_reply(&resp).expect("reply");
        assert_eq!(reply.text, "A crisp studio portrait.");
        assert_eq!(reply.usage.map(|u| u.total_tokens), Some(27));
    }

    #[test]
    fn empty_choices_is_upstream_error() {
        let resp = HttpResponse::new(200, json!({"choices": []}).to_string());
        assert!(matches!(parse_reply(&resp), Err(NodeError::Upstream { .. })));
    }

    #[test]
    fn truncation_never_splits_words_and_stays_bounded() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda";
        for max in 6..text.len() {
            let out = truncate_at_word_boundary(text, max);
            assert!(out.chars().count() <= max + 3, "max={max} out={out}");
            let head = out.strip_suffix("...").unwrap_or(out.as_str());
            assert!(
                head.split(' ').all(|word| text.split(' ').any(|w| w == word)),
                "split a word at max={max}: {out}"
            );
        }
        assert_eq!(truncate_at_word_boundary("short", 50), "short");
        assert_eq!(truncate_at_word_boundary("hello world again", 13), "hello world...");
    }

    #[test]
    fn single_overlong_word_is_hard_cut() {
        let word = "supercalifragilisticexpialidocious";
        assert_eq!(truncate_at_word_boundary(word, 10), "supercalif...");
        assert_eq!(truncate_at_word_boundary("antidisestablishment rocks", 8), "antidise...");
    }

    #[test]
    fn english_text_passes_through() {
        let text = String::from("This is a clear English sentence about fashion photography.");
        assert_eq!(enforce_english(text.clone(), 500), text);
    }

    #[test]
    fn non_english_reply_is_prefixed() {
        let text = String::from("Esta es una respuesta completamente escrita en español para la prueba.");
        let out = enforce_english(text, 500);
        assert!(out.starts_with(ENGLISH_PREFIX));
    }
}
