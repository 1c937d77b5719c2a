use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::nodes::{
    clear_conversation_handler, get_node_handler, invoke_node_handler, list_nodes_handler,
};
use crate::config::credentials::{DotenvCredentials, EnvCredentials, SharedCredentialProvider};
use crate::config::{load_node_settings, resolve_settings_path};
use crate::nodes::conversation::ConversationStore;
use crate::nodes::NodeRuntime;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub runtime: NodeRuntime,
    pub conversations: Arc<ConversationStore>,
}

impl AppState {
    pub fn new(runtime: NodeRuntime) -> Self {
        Self {
            service_name: "atelier-nodes",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            runtime,
            conversations: Arc::new(ConversationStore::new()),
        }
    }
}

/// Live runtime rooted at `app_root`: settings from TOML, credentials from the
/// first dotenv-style file found, falling back to the process environment.
pub fn live_runtime(app_root: &Path) -> Result<NodeRuntime, Box<dyn std::error::Error>> {
    let settings = load_node_settings(resolve_settings_path(app_root).as_path())?;
    let candidates = DotenvCredentials::default_candidates(app_root);
    let credentials: SharedCredentialProvider = match DotenvCredentials::discover(candidates.as_slice()) {
        Ok(found) => Arc::new(found),
        Err(error) => {
            warn!(error = %error, "credential file unreadable, using environment only");
            Arc::new(EnvCredentials)
        }
    };
    Ok(NodeRuntime::live(credentials, settings))
}

pub fn default_app_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/nodes", get(list_nodes_handler))
        .route("/api/nodes/{name}", get(get_node_handler))
        .route("/api/nodes/{name}/invoke", post(invoke_node_handler))
        .route("/api/conversations/{session_id}", delete(clear_conversation_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, runtime: NodeRuntime) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(AppState::new(runtime));
    info!(bind = %addr, "starting atelier-nodes HTTP bridge");
    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "sessions": state.conversations.session_count(),
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
