use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::api::error::ErrorKind;
use crate::api::response::{failure, internal_error, node_failure, success, ApiJson};
use crate::api::server::AppState;
use crate::codec::{buffer_to_png_base64, ImageBuffer};
use crate::config::credentials::{GEMINI_API_KEY, OPENAI_API_KEY, TRYON_API_KEY};
use crate::nodes::catalog::{find_node, node_catalog, NodeDescriptor};
use crate::nodes::chat::{ChatRequest, OpenAiChatNode};
use crate::nodes::conversation::{ConversationRequest, ConversationStore, OpenAiConversationNode};
use crate::nodes::gemini_flash::{GeminiFlashNode, GeminiFlashRequest};
use crate::nodes::image_fidelity::{ImageFidelityNode, ImageFidelityRequest};
use crate::nodes::virtual_try_on::{VirtualTryOnNode, VirtualTryOnRequest};
use crate::nodes::{NodeError, NodeRuntime};

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("{error}")]
    Node {
        error: NodeError,
        debug_logs: Option<String>,
    },
}

impl From<NodeError> for InvokeError {
    fn from(error: NodeError) -> Self {
        Self::Node {
            error,
            debug_logs: None,
        }
    }
}

impl InvokeError {
    fn into_api(self) -> ApiJson<Value> {
        match self {
            Self::UnknownNode(name) => failure(
                StatusCode::NOT_FOUND,
                ErrorKind::Validation,
                "node_not_found",
                format!("Unknown node: {name}"),
                None,
            ),
            Self::InvalidBody(message) => failure(
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation,
                "invalid_request",
                message,
                None,
            ),
            Self::Node { error, debug_logs } => {
                let details = debug_logs.map(|logs| json!({"debug_logs": logs}));
                node_failure(&error, details)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConversationInvoke {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    request: ConversationRequest,
}

fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, InvokeError> {
    serde_json::from_value(body).map_err(|e| InvokeError::InvalidBody(e.to_string()))
}

fn image_json(image: &ImageBuffer) -> Result<Value, InvokeError> {
    let encoded = buffer_to_png_base64(image).map_err(NodeError::from)?;
    Ok(json!({"png_base64": encoded}))
}

/// Fills a blank node key from the credential provider.
fn fill_api_key(runtime: &NodeRuntime, api_key: &mut String, credential: &str) {
    if api_key.trim().is_empty() {
        if let Some(value) = runtime.credentials().lookup(credential) {
            *api_key = value;
        }
    }
}

/// Runs `name` synchronously against a JSON request body.
pub fn invoke_node(
    runtime: &NodeRuntime,
    conversations: &ConversationStore,
    name: &str,
    body: Value,
) -> Result<Value, InvokeError> {
    match name {
        OpenAiChatNode::NAME => {
            let request: ChatRequest = parse_body(body)?;
            let out = OpenAiChatNode::new(runtime.clone()).run(&request);
            Ok(json!({"response_text": out.response_text}))
        }
        OpenAiConversationNode::NAME => {
            let invoke: ConversationInvoke = parse_body(body)?;
            let session_id = invoke
                .session_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut history = conversations.checkout(session_id.as_str());
            let out = OpenAiConversationNode::new(runtime.clone()).run(&invoke.request, &mut history);
            conversations.checkin(session_id.clone(), history);
            Ok(json!({
                "session_id": session_id,
                "response_text": out.response_text,
                "conversation_summary": out.conversation_summary,
            }))
        }
        ImageFidelityNode::NAME => {
            let mut request: ImageFidelityRequest = parse_body(body)?;
            fill_api_key(runtime, &mut request.api_key, OPENAI_API_KEY);
            let out = ImageFidelityNode::new(runtime.clone()).run(&request);
            Ok(json!({
                "image": image_json(&out.image)?,
                "revised_prompt": out.revised_prompt,
                "debug_info": out.debug_info,
            }))
        }
        GeminiFlashNode::NAME => {
            let mut request: GeminiFlashRequest = parse_body(body)?;
            fill_api_key(runtime, &mut request.api_key, GEMINI_API_KEY);
            let out = GeminiFlashNode::new(runtime.clone()).run(&request);
            Ok(json!({
                "image": image_json(&out.image)?,
                "text_response": out.text_response,
                "debug_info": out.debug_info,
            }))
        }
        VirtualTryOnNode::NAME => {
            let mut request: VirtualTryOnRequest = parse_body(body)?;
            fill_api_key(runtime, &mut request.api_key, TRYON_API_KEY);
            let out = VirtualTryOnNode::new(runtime.clone())
                .run(&request)
                .map_err(|failure| InvokeError::Node {
                    error: failure.error,
                    debug_logs: Some(failure.debug_logs),
                })?;
            Ok(json!({
                "image": image_json(&out.image)?,
                "debug_logs": out.debug_logs,
            }))
        }
        other => Err(InvokeError::UnknownNode(other.to_string())),
    }
}

pub async fn list_nodes_handler() -> ApiJson<Vec<NodeDescriptor>> {
    success(node_catalog())
}

pub async fn get_node_handler(Path(name): Path<String>) -> ApiJson<Value> {
    match find_node(name.as_str()) {
        Some(node) => match serde_json::to_value(node) {
            Ok(value) => success(value),
            Err(e) => internal_error(format!("node descriptor serialization failed: {e}")),
        },
        None => InvokeError::UnknownNode(name).into_api(),
    }
}

pub async fn invoke_node_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> ApiJson<Value> {
    let runtime = state.runtime.clone();
    let conversations = state.conversations.clone();
    let result = tokio::task::spawn_blocking(move || {
        invoke_node(&runtime, conversations.as_ref(), name.as_str(), body)
    })
    .await;

    match result {
        Ok(Ok(outputs)) => success(outputs),
        Ok(Err(error)) => error.into_api(),
        Err(join_error) => internal_error(format!("node invocation task failed: {join_error}")),
    }
}

pub async fn clear_conversation_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiJson<Value> {
    let cleared = state.conversations.remove(session_id.as_str());
    success(json!({"session_id": session_id, "cleared": cleared}))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::credentials::StaticCredentials;
    use crate::nodes::testing::runtime_with;
    use crate::transport::testing::FakeTransport;
    use crate::transport::HttpResponse;

    fn chat_reply(text: &str) -> Result<HttpResponse, crate::transport::TransportError> {
        Ok(HttpResponse::new(
            200,
            json!({"choices": [{"message": {"content": text}}]}).to_string(),
        ))
    }

    #[test]
    fn unknown_node_is_rejected() {
        let runtime = runtime_with(Arc::new(FakeTransport::default()), StaticCredentials::default());
        let err = invoke_node(&runtime, &ConversationStore::new(), "nope", json!({})).expect_err("unknown");
        assert!(matches!(err, InvokeError::UnknownNode(name) if name == "nope"));
    }

    #[test]
    fn malformed_image_is_an_invalid_body() {
        let runtime = runtime_with(Arc::new(FakeTransport::default()), StaticCredentials::default());
        let err = invoke_node(
            &runtime,
            &ConversationStore::new(),
            GeminiFlashNode::NAME,
            json!({"primary_image": {"shape": [1, 2, 2, 3], "data": [0.0]}}),
        )
        .expect_err("bad shape");
        assert!(matches!(err, InvokeError::InvalidBody(_)));
    }

    #[test]
    fn conversation_history_survives_between_invocations() {
        let transport = Arc::new(FakeTransport::with_replies(vec![
            chat_reply("The first answer is written in plain English for the user."),
            chat_reply("The second answer is written in plain English for the user."),
        ]));
        let runtime = runtime_with(transport.clone(), StaticCredentials::new([(OPENAI_API_KEY, "sk")]));
        let store = ConversationStore::new();

        let first = invoke_node(
            &runtime,
            &store,
            OpenAiConversationNode::NAME,
            json!({"session_id": "s-1", "user_prompt": "first question"}),
        )
        .expect("first");
        let second = invoke_node(
            &runtime,
            &store,
            OpenAiConversationNode::NAME,
            json!({"session_id": "s-1", "user_prompt": "second question"}),
        )
        .expect("second");

        assert_eq!(first["session_id"], json!("s-1"));
        assert!(second["conversation_summary"]
            .as_str()
            .is_some_and(|s| s.starts_with("User: first question\n")));
        assert_eq!(store.session_count(), 1);
        let replayed = transport.seen()[1].json_body().cloned().expect("json body");
        assert_eq!(replayed["messages"].as_array().map(Vec::len), Some(4));
    }

    #[test]
    fn failed_sessionless_conversations_are_not_stored() {
        let runtime = runtime_with(
            Arc::new(FakeTransport::default()),
            StaticCredentials::new([(OPENAI_API_KEY, "sk")]),
        );
        let store = ConversationStore::new();

        for _ in 0..50 {
            let out = invoke_node(
                &runtime,
                &store,
                OpenAiConversationNode::NAME,
                json!({"user_prompt": "hi"}),
            )
            .expect("sentinel output");
            assert!(out["response_text"].as_str().is_some_and(|t| t.starts_with("Error:")));
        }

        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn blank_key_is_filled_from_credentials() {
        let transport = Arc::new(FakeTransport::with_json(200, json!({"candidates": []})));
        let runtime = runtime_with(transport.clone(), StaticCredentials::new([(GEMINI_API_KEY, "g-env")]));

        let out = invoke_node(&runtime, &ConversationStore::new(), GeminiFlashNode::NAME, json!({}))
            .expect("gemini outputs");

        assert_eq!(out["text_response"], json!("No image could be generated"));
        assert!(out["image"]["png_base64"].as_str().is_some_and(|s| !s.is_empty()));
        let seen = transport.seen();
        assert!(seen[0]
            .headers
            .iter()
            .any(|(name, value)| name == "x-goog-api-key" && value == "g-env"));
    }

    #[test]
    fn try_on_failure_keeps_debug_logs() {
        let runtime = runtime_with(Arc::new(FakeTransport::default()), StaticCredentials::default());
        let err = invoke_node(
            &runtime,
            &ConversationStore::new(),
            VirtualTryOnNode::NAME,
            json!({"api_key": "ym"}),
        )
        .expect_err("missing images");
        let InvokeError::Node { error, debug_logs } = err else {
            panic!("expected node error");
        };
        assert_eq!(error, NodeError::MissingInput(String::from("Base image (person) is required")));
        assert!(debug_logs.is_some_and(|logs| logs.contains("[virtual_try_on ERROR]")));
    }
}
