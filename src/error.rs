use thiserror::Error;

use crate::paper::SourceKind;

pub type Result<T> = std::result::Result<T, DeepPaperError>;

#[derive(Debug, Error)]
pub enum DeepPaperError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: SearchError,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Failures of a single source search.
///
/// Per-record extraction problems never show up here: those records are
/// skipped and logged by the normalizers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    #[error("{origin} is cooling down, retry in {retry_after_ms} ms")]
    RateLimited {
        origin: SourceKind,
        retry_after_ms: u64,
    },

    #[error("{origin} returned HTTP {status}: {body}")]
    UpstreamHttp {
        origin: SourceKind,
        status: u16,
        body: String,
    },

    #[error("{origin} payload could not be parsed: {message}")]
    Parse { origin: SourceKind, message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid tool input: {0}")]
    InvalidInput(String),

    #[error("{origin} request failed: {message}")]
    Transport { origin: SourceKind, message: String },

    #[error("{0}")]
    Unknown(String),
}

impl SearchError {
    /// Stable machine-readable tag, surfaced to the agent next to the message.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::RateLimited { .. } => "rate_limited",
            SearchError::UpstreamHttp { .. } => "upstream_http",
            SearchError::Parse { .. } => "parse_failure",
            SearchError::Configuration(_) => "configuration",
            SearchError::InvalidInput(_) => "invalid_input",
            SearchError::Transport { .. } => "transport",
            SearchError::Unknown(_) => "unknown",
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            SearchError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
