use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeepPaperError, Result};
use crate::paper::SourceKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Origins allowed by CORS. Empty means any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    /// Only `gemini` is accepted by the server.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            endpoint: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_provider() -> String {
    "gemini".into()
}

fn default_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_model_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Replaces the built-in research instructions.
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            instructions: None,
        }
    }
}

fn default_max_steps() -> usize {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overrides the built-in cooldown; `0` disables it.
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            base_url: None,
            cooldown_ms: None,
            api_key: None,
            timeout_secs: default_source_timeout(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_source_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SourcesConfig {
    #[serde(default)]
    pub arxiv: SourceConfig,
    #[serde(default)]
    pub semantic_scholar: SourceConfig,
    #[serde(default)]
    pub core: SourceConfig,
    #[serde(default)]
    pub jstage: SourceConfig,
    #[serde(default)]
    pub conference: SourceConfig,
    #[serde(default)]
    pub brave: SourceConfig,
}

impl SourcesConfig {
    pub fn get(&self, source: SourceKind) -> &SourceConfig {
        match source {
            SourceKind::Arxiv => &self.arxiv,
            SourceKind::SemanticScholar => &self.semantic_scholar,
            SourceKind::Core => &self.core,
            SourceKind::Jstage => &self.jstage,
            SourceKind::Conference => &self.conference,
            SourceKind::Brave => &self.brave,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Tool names answering with an empty result instead of failing.
    #[serde(default)]
    pub degrade: Vec<String>,
    /// Keep paper links in what the agent sees.
    #[serde(default)]
    pub expose_links: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| DeepPaperError::Config(format!("failed to parse configuration: {err}")))
    }

    /// Reads `path` when it exists, otherwise starts from defaults; the
    /// environment is applied on top either way.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|name| env::var(name).ok());
        Ok(cfg)
    }

    /// Applies environment style overrides resolved through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(host) = lookup("DEEP_PAPER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DEEP_PAPER_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_GENERATIVE_AI_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = lookup("DEEP_PAPER_MODEL") {
            self.model.model = model;
        }
        if let Some(key) = lookup("CORE_API_KEY") {
            self.sources.core.api_key = Some(key);
        }
        if let Some(key) = lookup("BRAVE_SEARCH_API_KEY") {
            self.sources.brave.api_key = Some(key);
        }
        if let Some(key) = lookup("SEMANTIC_SCHOLAR_API_KEY") {
            self.sources.semantic_scholar.api_key = Some(key);
        }
        if let Some(format) = lookup("DEEP_PAPER_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.telemetry.format = LogFormat::Json,
                "pretty" | "text" => self.telemetry.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }
}
