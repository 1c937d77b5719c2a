use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::chat::{encode_chat_images, finish_reply, resolve_openai_key, validate_chat_params, ChatRequest};
use super::{DebugTrace, NodeError, NodeRuntime};
use crate::prompt::{compose_conversation_turn, detect_language};
use crate::vendors::openai_chat::{self, ChatCompletionRequest, ChatMessage, ChatRole};

/// Ten user/assistant exchanges.
pub const MAX_HISTORY_ENTRIES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        self.turns.as_slice()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn exchange_count(&self) -> usize {
        self.turns.len() / 2
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Appends one exchange and evicts the oldest pairs beyond the cap.
    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role: TurnRole::User,
            content: user.into(),
        });
        self.turns.push(ConversationTurn {
            role: TurnRole::Assistant,
            content: assistant.into(),
        });
        while self.turns.len() > MAX_HISTORY_ENTRIES {
            let evict = self.turns.len().min(2);
            self.turns.drain(..evict);
        }
    }

    /// `User: ...\nAssistant: ...\n\n` for every complete exchange.
    pub fn summary(&self) -> String {
        self.turns
            .chunks_exact(2)
            .map(|pair| format!("User: {}\nAssistant: {}\n\n", pair[0].content, pair[1].content))
            .collect()
    }

    fn as_messages(&self) -> impl Iterator<Item = ChatMessage> + '_ {
        self.turns.iter().map(|turn| {
            let role = match turn.role {
                TurnRole::User => ChatRole::User,
                TurnRole::Assistant => ChatRole::Assistant,
            };
            ChatMessage::text(role, turn.content.clone())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConversationRequest {
    #[serde(flatten)]
    pub chat: ChatRequest,
    #[serde(default)]
    pub clear_history: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationOutput {
    pub response_text: String,
    pub conversation_summary: String,
}

/// Multi-turn chat over a caller-owned [`ConversationHistory`].
#[derive(Clone)]
pub struct OpenAiConversationNode {
    runtime: NodeRuntime,
}

impl OpenAiConversationNode {
    pub const NAME: &'static str = "openai_conversation";

    pub fn new(runtime: NodeRuntime) -> Self {
        Self { runtime }
    }

    pub fn run(&self, request: &ConversationRequest, history: &mut ConversationHistory) -> ConversationOutput {
        let mut trace = DebugTrace::new(Self::NAME);
        match self.try_run(request, history, &mut trace) {
            Ok(response_text) => ConversationOutput {
                response_text,
                conversation_summary: history.summary(),
            },
            Err(err) => {
                trace.error(err.to_string());
                ConversationOutput {
                    response_text: format!("Error: {err}"),
                    conversation_summary: String::new(),
                }
            }
        }
    }

    pub fn try_run(
        &self,
        request: &ConversationRequest,
        history: &mut ConversationHistory,
        trace: &mut DebugTrace,
    ) -> Result<String, NodeError> {
        if request.clear_history {
            history.clear();
            trace.info("Conversation history cleared");
        }
        let chat = &request.chat;
        validate_chat_params(chat)?;
        let api_key = resolve_openai_key(&self.runtime, chat)?;

        let lang = detect_language(chat.user_prompt.as_str());
        trace.info(format!("Detected language: {lang}"));
        let turn = compose_conversation_turn(chat.user_prompt.as_str(), lang.as_str(), chat.max_characters);
        let image_urls = encode_chat_images(chat, trace);

        let mut messages = vec![ChatMessage::text(ChatRole::System, chat.system_prompt.clone())];
        messages.extend(history.as_messages());
        messages.push(ChatMessage::user_with_images(turn, image_urls));

        let completion = ChatCompletionRequest {
            model: chat.model.clone(),
            messages,
            max_characters: chat.max_characters,
        };
        let reply = openai_chat::complete(
            self.runtime.transport(),
            self.runtime.settings(),
            api_key.as_str(),
            &completion,
            trace,
        )?;
        let text = finish_reply(reply, chat.max_characters, trace);

        history.record_exchange(chat.user_prompt.clone(), text.clone());
        trace.info(format!("Exchanges in history: {}", history.exchange_count()));
        Ok(text)
    }
}

/// Sessions kept by a [`ConversationStore`] before the least recently used
/// one is dropped.
pub const DEFAULT_MAX_SESSIONS: usize = 256;

#[derive(Debug)]
struct StoredSession {
    history: ConversationHistory,
    touched: u64,
}

#[derive(Debug, Default)]
struct Sessions {
    entries: HashMap<String, StoredSession>,
    clock: u64,
}

/// Histories keyed by a caller-chosen session id, bounded to `max_sessions`.
#[derive(Debug)]
pub struct ConversationStore {
    sessions: Mutex<Sessions>,
    max_sessions: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::with_max_sessions(DEFAULT_MAX_SESSIONS)
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sessions(max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            max_sessions: max_sessions.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes the session's history for the duration of a call; an unknown
    /// session starts empty.
    pub fn checkout(&self, session_id: &str) -> ConversationHistory {
        self.lock()
            .entries
            .remove(session_id)
            .map(|stored| stored.history)
            .unwrap_or_default()
    }

    /// Stores a history back. Empty histories are not kept, and the least
    /// recently stored session is evicted once the store is full.
    pub fn checkin(&self, session_id: impl Into<String>, history: ConversationHistory) {
        let session_id = session_id.into();
        let mut sessions = self.lock();
        if history.is_empty() {
            sessions.entries.remove(session_id.as_str());
            return;
        }
        sessions.clock += 1;
        let touched = sessions.clock;
        sessions
            .entries
            .insert(session_id, StoredSession { history, touched });

        while sessions.entries.len() > self.max_sessions {
            let oldest = sessions
                .entries
                .iter()
                .min_by_key(|(_, stored)| stored.touched)
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else { break };
            sessions.entries.remove(oldest.as_str());
            tracing::debug!(session_id = %oldest, "evicted conversation session");
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.lock().entries.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::config::credentials::{StaticCredentials, OPENAI_API_KEY};
    use crate::nodes::testing::runtime_with;
    use crate::transport::testing::FakeTransport;
    use crate::transport::{HttpResponse, TransportError};

    fn reply(text: &str) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse::new(
            200,
            json!({"choices": [{"message": {"content": text}}]}).to_string(),
        ))
    }

    fn node(transport: Arc<FakeTransport>) -> OpenAiConversationNode {
        OpenAiConversationNode::new(runtime_with(
            transport,
            StaticCredentials::new([(OPENAI_API_KEY, "sk")]),
        ))
    }

    fn prompt(text: &str) -> ConversationRequest {
        ConversationRequest {
            chat: ChatRequest {
                user_prompt: text.to_string(),
                ..ChatRequest::default()
            },
            clear_history: false,
        }
    }

    #[test]
    fn history_is_capped_and_evicts_oldest_pair() {
        let mut history = ConversationHistory::new();
        for i in 0..15 {
            history.record_exchange(format!("q{i}"), format!("a{i}"));
            assert!(history.len() <= MAX_HISTORY_ENTRIES);
        }
        assert_eq!(history.len(), MAX_HISTORY_ENTRIES);
        assert_eq!(history.turns()[0].content, "q5");
        assert_eq!(history.turns()[0].role, TurnRole::User);
        assert_eq!(history.turns()[19].content, "a14");
    }

    #[test]
    fn summary_lists_complete_pairs() {
        let mut history = ConversationHistory::new();
        history.record_exchange("hi", "hello");
        history.record_exchange("more", "sure");
        assert_eq!(
            history.summary(),
            "User: hi\nAssistant: hello\n\nUser: more\nAssistant: sure\n\n"
        );
    }

    #[test]
    fn successive_turns_replay_history() {
        let transport = Arc::new(FakeTransport::with_replies(vec![
            reply("The first answer is written in plain English for the user."),
            reply("The second answer is written in plain English for the user."),
        ]));
        let node = node(transport.clone());
        let mut history = ConversationHistory::new();

        node.run(&prompt("first question"), &mut history);
        let out = node.run(&prompt("second question"), &mut history);

        assert_eq!(
            out.response_text,
            "The second answer is written in plain English for the user."
        );
        assert_eq!(history.exchange_count(), 2);
        assert!(out.conversation_summary.starts_with("User: first question\n"));

        let second = transport.seen()[1].json_body().cloned().expect("json body");
        let messages = second["messages"].as_array().expect("messages").clone();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], json!("system"));
        assert_eq!(messages[1], json!({"role": "user", "content": "first question"}));
        assert_eq!(messages[2]["role"], json!("assistant"));
        assert!(messages[3]["content"][0]["text"]
            .as_str()
            .is_some_and(|t| t.starts_with("User request (detected language:")));
    }

    #[test]
    fn clear_history_resets_before_the_call() {
        let transport = Arc::new(FakeTransport::with_replies(vec![reply("Fresh start answer.")]));
        let node = node(transport);
        let mut history = ConversationHistory::new();
        history.record_exchange("old", "stale");

        let mut request = prompt("new topic");
        request.clear_history = true;
        node.run(&request, &mut history);

        assert_eq!(history.exchange_count(), 1);
        assert_eq!(history.turns()[0].content, "new topic");
    }

    #[test]
    fn failures_leave_history_untouched() {
        let transport = Arc::new(FakeTransport::with_json(
            429,
            json!({"error": {"message": "Rate limit reached"}}),
        ));
        let node = node(transport);
        let mut history = ConversationHistory::new();
        history.record_exchange("kept", "yes");

        let out = node.run(&prompt("will fail"), &mut history);

        assert_eq!(out.response_text, "Error: Rate limit exceeded: Rate limit reached");
        assert_eq!(out.conversation_summary, "");
        assert_eq!(history.exchange_count(), 1);
    }

    #[test]
    fn store_checks_histories_in_and_out() {
        let store = ConversationStore::new();
        let mut history = store.checkout("s1");
        assert!(history.is_empty());
        history.record_exchange("a", "b");
        store.checkin("s1", history);

        assert_eq!(store.session_count(), 1);
        assert_eq!(store.checkout("s1").exchange_count(), 1);
        assert_eq!(store.session_count(), 0);
        assert!(!store.remove("s1"));
    }

    #[test]
    fn empty_histories_are_not_stored() {
        let store = ConversationStore::new();
        for i in 0..50 {
            let id = format!("minted-{i}");
            let history = store.checkout(id.as_str());
            store.checkin(id, history);
        }
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn store_evicts_least_recently_used_sessions() {
        let store = ConversationStore::with_max_sessions(3);
        for id in ["a", "b", "c"] {
            let mut history = ConversationHistory::new();
            history.record_exchange("q", "r");
            store.checkin(id, history);
        }
        // Touch "a" so "b" becomes the oldest.
        let a = store.checkout("a");
        store.checkin("a", a);

        let mut history = ConversationHistory::new();
        history.record_exchange("q", "r");
        store.checkin("d", history);

        assert_eq!(store.session_count(), 3);
        assert!(!store.remove("b"));
        assert!(store.remove("a"));
        assert!(store.remove("c"));
        assert!(store.remove("d"));
    }

    #[test]
    fn request_deserializes_flattened_chat_fields() {
        let request: ConversationRequest = serde_json::from_value(json!({
            "user_prompt": "hola",
            "max_characters": 120,
            "clear_history": true
        }))
        .expect("request");
        assert_eq!(request.chat.user_prompt, "hola");
        assert_eq!(request.chat.max_characters, 120);
        assert!(request.chat.use_env_key);
        assert!(request.clear_history);
    }
}
