use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl TraceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub level: TraceLevel,
    pub message: String,
}

/// Human-readable lines collected during one node invocation.
///
/// Each line is also forwarded to `tracing` under the node's name.
#[derive(Debug, Clone)]
pub struct DebugTrace {
    node: &'static str,
    lines: Vec<TraceLine>,
}

impl DebugTrace {
    pub fn new(node: &'static str) -> Self {
        Self {
            node,
            lines: Vec::new(),
        }
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.push(TraceLevel::Debug, message.into());
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(TraceLevel::Info, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(TraceLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(TraceLevel::Error, message.into());
    }

    pub fn lines(&self) -> &[TraceLine] {
        self.lines.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Messages only, joined with `separator`.
    pub fn render(&self, separator: &str) -> String {
        self.lines
            .iter()
            .map(|line| line.message.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// `[node LEVEL] message` lines joined with `separator`.
    pub fn render_tagged(&self, separator: &str) -> String {
        self.lines
            .iter()
            .map(|line| format!("[{} {}] {}", self.node, line.level.as_str(), line.message))
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn push(&mut self, level: TraceLevel, message: String) {
        match level {
            TraceLevel::Debug => debug!(node = self.node, "{message}"),
            TraceLevel::Info => info!(node = self.node, "{message}"),
            TraceLevel::Warn => warn!(node = self.node, "{message}"),
            TraceLevel::Error => error!(node = self.node, "{message}"),
        }
        self.lines.push(TraceLine { level, message });
    }
}
