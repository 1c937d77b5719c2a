use serde::{Deserialize, Serialize};

use super::{encode_optional_images, require_api_key, require_choice, DebugTrace, NodeError, NodeRuntime};
use crate::codec::{png_data_url, ImageBuffer};
use crate::config::credentials::OPENAI_API_KEY;
use crate::prompt::{compose_chat_instruction, detect_language};
use crate::vendors::openai_chat::{
    self, enforce_english, truncate_at_word_boundary, ChatCompletionRequest, ChatMessage, ChatReply,
    CHAT_MODELS, DEFAULT_CHAT_MODEL,
};

pub const DEFAULT_USER_PROMPT: &str = "Enhance this image";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that always responds in English. Enhance and improve the user's request with professional terminology.";
pub const MIN_CHARACTERS: u32 = 50;
pub const MAX_CHARACTERS: u32 = 2000;
pub const DEFAULT_MAX_CHARACTERS: u32 = 500;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub api_key: String,
    pub user_prompt: String,
    pub model: String,
    pub max_characters: u32,
    pub system_prompt: String,
    pub image_1: Option<ImageBuffer>,
    pub image_2: Option<ImageBuffer>,
    pub image_3: Option<ImageBuffer>,
    pub use_env_key: bool,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            user_prompt: String::from(DEFAULT_USER_PROMPT),
            model: String::from(DEFAULT_CHAT_MODEL),
            max_characters: DEFAULT_MAX_CHARACTERS,
            system_prompt: String::from(DEFAULT_SYSTEM_PROMPT),
            image_1: None,
            image_2: None,
            image_3: None,
            use_env_key: true,
        }
    }
}

impl ChatRequest {
    fn images(&self) -> [Option<&ImageBuffer>; 3] {
        [
            self.image_1.as_ref(),
            self.image_2.as_ref(),
            self.image_3.as_ref(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatOutput {
    pub response_text: String,
}

/// Single-turn chat with optional images; failures come back as an
/// `"Error: ..."` response text.
#[derive(Clone)]
pub struct OpenAiChatNode {
    runtime: NodeRuntime,
}

impl OpenAiChatNode {
    pub const NAME: &'static str = "openai_chat";

    pub fn new(runtime: NodeRuntime) -> Self {
        Self { runtime }
    }

    pub fn run(&self, request: &ChatRequest) -> ChatOutput {
        let mut trace = DebugTrace::new(Self::NAME);
        let response_text = match self.try_run(request, &mut trace) {
            Ok(text) => text,
            Err(err) => {
                trace.error(err.to_string());
                format!("Error: {err}")
            }
        };
        ChatOutput { response_text }
    }

    pub fn try_run(&self, request: &ChatRequest, trace: &mut DebugTrace) -> Result<String, NodeError> {
        validate_chat_params(request)?;
        let api_key = resolve_openai_key(&self.runtime, request)?;

        let lang = detect_language(request.user_prompt.as_str());
        trace.info(format!("Detected language: {lang}"));
        let instruction = compose_chat_instruction(
            request.system_prompt.as_str(),
            request.user_prompt.as_str(),
            lang.as_str(),
            request.max_characters,
        );
        let image_urls = encode_chat_images(request, trace);

        let completion = ChatCompletionRequest {
            model: request.model.clone(),
            messages: vec![ChatMessage::user_with_images(instruction, image_urls)],
            max_characters: request.max_characters,
        };
        let reply = openai_chat::complete(
            self.runtime.transport(),
            self.runtime.settings(),
            api_key.as_str(),
            &completion,
            trace,
        )?;
        Ok(finish_reply(reply, request.max_characters, trace))
    }
}

pub(crate) fn validate_chat_params(request: &ChatRequest) -> Result<(), NodeError> {
    require_choice("model", request.model.as_str(), &CHAT_MODELS)?;
    if !(MIN_CHARACTERS..=MAX_CHARACTERS).contains(&request.max_characters) {
        return Err(NodeError::InvalidInput(format!(
            "max_characters must be between {MIN_CHARACTERS} and {MAX_CHARACTERS}, got {}",
            request.max_characters
        )));
    }
    Ok(())
}

pub(crate) fn resolve_openai_key(runtime: &NodeRuntime, request: &ChatRequest) -> Result<String, NodeError> {
    if request.use_env_key {
        return runtime.credentials().lookup(OPENAI_API_KEY).ok_or_else(|| {
            NodeError::MissingCredential(format!(
                "{OPENAI_API_KEY} not found in environment or credential files"
            ))
        });
    }
    require_api_key(request.api_key.as_str(), "API key is required")
}

pub(crate) fn encode_chat_images(request: &ChatRequest, trace: &mut DebugTrace) -> Vec<String> {
    encode_optional_images(&request.images(), trace)
        .iter()
        .map(|png| png_data_url(png.as_slice()))
        .collect()
}

pub(crate) fn finish_reply(reply: ChatReply, max_characters: u32, trace: &mut DebugTrace) -> String {
    let max = max_characters as usize;
    let text = enforce_english(truncate_at_word_boundary(reply.text.as_str(), max), max);
    let tokens = reply
        .usage
        .map(|usage| usage.summary())
        .unwrap_or_else(|| String::from("Tokens: n/a"));
    trace.info(format!(
        "{tokens} | Characters: {}/{max_characters}",
        text.chars().count()
    ));
    text
}
