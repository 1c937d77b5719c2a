use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use super::dotenv::load_key_value_file;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const TRYON_API_KEY: &str = "YOURMIRROR_API_KEY";

/// Source of API keys for nodes that may fall back to configured credentials.
pub trait CredentialProvider: Send + Sync + 'static {
    fn lookup(&self, name: &str) -> Option<String>;
}

pub type SharedCredentialProvider = Arc<dyn CredentialProvider>;

#[derive(Debug, Default, Clone)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    values: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn lookup(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
    }
}

/// Keys read from the first existing `KEY=value` file among a list of
/// candidates, falling back to the process environment. The environment is
/// never modified.
#[derive(Debug, Default, Clone)]
pub struct DotenvCredentials {
    source: Option<PathBuf>,
    values: HashMap<String, String>,
}

impl DotenvCredentials {
    pub fn discover(candidates: &[PathBuf]) -> Result<Self, std::io::Error> {
        for path in candidates {
            if !path.is_file() {
                debug!(path = %path.display(), "credential file not present");
                continue;
            }
            let values = load_key_value_file(path.as_path())?;
            info!(path = %path.display(), keys = values.len(), "loaded credential file");
            return Ok(Self {
                source: Some(path.clone()),
                values,
            });
        }
        Ok(Self::default())
    }

    pub fn default_candidates(app_root: &Path) -> Vec<PathBuf> {
        let mut out = vec![app_root.join(".env"), app_root.join("config.env")];
        if let Some(home) = std::env::var_os("HOME") {
            out.push(PathBuf::from(home).join(".config/atelier-nodes/credentials.env"));
        }
        out
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl CredentialProvider for DotenvCredentials {
    fn lookup(&self, name: &str) -> Option<String> {
        self.values
            .get(name)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| EnvCredentials.lookup(name))
    }
}
