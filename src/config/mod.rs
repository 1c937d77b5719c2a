pub mod credentials;
mod dotenv;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::transport::retry::RetryPolicy;

pub const SETTINGS_PATH_ENV: &str = "ATELIER_NODES_CONFIG";
pub const DEFAULT_SETTINGS_REL_PATH: &str = "config/nodes.toml";

/// Upper bound on rate-limit retries; settings may only lower it.
pub const MAX_RETRIES: u32 = 3;

/// Vendor endpoints, timeouts and defaults shared by all nodes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub openai_base_url: String,
    pub gemini_base_url: String,
    pub tryon_base_url: String,
    pub vendor_timeout_secs: u64,
    pub tryon_timeout_secs: u64,
    pub tryon_high_quality_timeout_secs: Option<u64>,
    pub download_timeout_secs: u64,
    /// Clamped to [`MAX_RETRIES`] when the retry policy is built.
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub user_agent: String,
    pub images_model: String,
    pub responses_model: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            openai_base_url: String::from("https://api.openai.com"),
            gemini_base_url: String::from("https://generativelanguage.googleapis.com"),
            tryon_base_url: String::from("https://apiservice.yourmirror.io"),
            vendor_timeout_secs: 300,
            tryon_timeout_secs: 60,
            tryon_high_quality_timeout_secs: None,
            download_timeout_secs: 60,
            max_retries: MAX_RETRIES,
            retry_base_delay_secs: 5,
            user_agent: format!("atelier-nodes/{}", env!("CARGO_PKG_VERSION")),
            images_model: String::from("gpt-image-1"),
            responses_model: String::from("gpt-4.1"),
        }
    }
}

impl NodeSettings {
    pub fn vendor_timeout(&self) -> Duration {
        Duration::from_secs(self.vendor_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// High quality try-on renders get at least 180 seconds unless an
    /// explicit override is configured.
    pub fn tryon_timeout(&self, high_quality: bool) -> Duration {
        if !high_quality {
            return Duration::from_secs(self.tryon_timeout_secs);
        }
        let secs = self
            .tryon_high_quality_timeout_secs
            .unwrap_or_else(|| self.tryon_timeout_secs.max(180));
        Duration::from_secs(secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.min(MAX_RETRIES),
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read settings file '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse TOML settings '{path}': {message}")]
    ParseToml { path: String, message: String },
}

pub fn resolve_settings_path(app_root: &Path) -> PathBuf {
    match std::env::var(SETTINGS_PATH_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => app_root.join(DEFAULT_SETTINGS_REL_PATH),
    }
}

/// Loads settings from `path`; a missing file yields the defaults.
pub fn load_node_settings(path: &Path) -> Result<NodeSettings, SettingsError> {
    if !path.exists() {
        return Ok(NodeSettings::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_node_settings(raw.as_str()).map_err(|message| SettingsError::ParseToml {
        path: path.display().to_string(),
        message,
    })
}

fn parse_node_settings(raw: &str) -> Result<NodeSettings, String> {
    let mut settings = toml::from_str::<NodeSettings>(raw).map_err(|e| e.to_string())?;
    for url in [
        &mut settings.openai_base_url,
        &mut settings.gemini_base_url,
        &mut settings.tryon_base_url,
    ] {
        let trimmed = url.trim().trim_end_matches('/').to_string();
        if trimmed.is_empty() {
            return Err(String::from("base URLs must not be empty"));
        }
        *url = trimmed;
    }
    Ok(settings)
}
