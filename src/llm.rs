//! Language model implementations and abstractions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::ModelConfig;
use crate::error::{DeepPaperError, Result, SearchError};
use crate::paper::SourceKind;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const API_KEY_VARIABLE: &str = "GEMINI_API_KEY";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Minimal abstraction around a text completion provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Text generated with web grounding plus the URIs it was grounded on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundedAnswer {
    pub text: String,
    pub citations: Vec<String>,
}

#[derive(Debug)]
enum GenerateFailure {
    MissingKey,
    Transport(String),
    Status(u16, String),
    Parse(String),
}

impl GenerateFailure {
    fn into_model_error(self) -> DeepPaperError {
        match self {
            GenerateFailure::MissingKey => {
                DeepPaperError::LanguageModel(format!("{API_KEY_VARIABLE} is not set"))
            }
            GenerateFailure::Transport(message) => {
                DeepPaperError::LanguageModel(format!("Gemini request error: {message}"))
            }
            GenerateFailure::Status(429, body) => {
                DeepPaperError::LanguageModel(format!("gemini rate limit exceeded: {body}"))
            }
            GenerateFailure::Status(status, body) => {
                DeepPaperError::LanguageModel(format!("gemini request failed with {status}: {body}"))
            }
            GenerateFailure::Parse(message) => {
                DeepPaperError::LanguageModel(format!("Gemini response parse error: {message}"))
            }
        }
    }

    fn into_search_error(self, source: SourceKind) -> SearchError {
        match self {
            GenerateFailure::MissingKey => {
                SearchError::Configuration(format!("{API_KEY_VARIABLE} is not set"))
            }
            GenerateFailure::Transport(message) => SearchError::Transport {
                origin: source,
                message,
            },
            GenerateFailure::Status(status, body) => SearchError::UpstreamHttp {
                origin: source,
                status,
                body,
            },
            GenerateFailure::Parse(message) => SearchError::Parse {
                origin: source,
                message,
            },
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    model: String,
    api_key: Option<String>,
    endpoint: String,
}

impl GeminiClient {
    /// The key is checked when a request is made, not here.
    pub fn new(model: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        Self::build(model.into(), api_key, DEFAULT_GEMINI_ENDPOINT.into(), 60)
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        Self::build(
            cfg.model.clone(),
            cfg.api_key.clone(),
            cfg.endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_ENDPOINT.to_string()),
            cfg.timeout_secs,
        )
    }

    fn build(model: String, api_key: Option<String>, endpoint: String, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_secs.max(1)))
                .user_agent(crate::http::user_agent())
                .build()
                .map_err(|err| DeepPaperError::LanguageModel(format!("http client error: {err}")))?,
            model,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            endpoint,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generation with the `google_search` tool enabled. Failures are reported
    /// against `source`.
    pub async fn generate_grounded(
        &self,
        prompt: &str,
        source: SourceKind,
    ) -> std::result::Result<GroundedAnswer, SearchError> {
        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "tools": [{"google_search": {}}],
        });
        let response = self
            .generate(&payload)
            .await
            .map_err(|failure| failure.into_search_error(source))?;
        Ok(GroundedAnswer {
            text: response.text(),
            citations: response.citations(),
        })
    }

    async fn generate(&self, payload: &Value) -> std::result::Result<GenerateResponse, GenerateFailure> {
        let api_key = self.api_key.as_deref().ok_or(GenerateFailure::MissingKey)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        );
        debug!(model = %self.model, "calling Gemini generateContent");

        let resp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| GenerateFailure::Transport(err.without_url().to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| GenerateFailure::Transport(err.without_url().to_string()))?;
        if !status.is_success() {
            return Err(GenerateFailure::Status(status.as_u16(), body));
        }
        serde_json::from_str(&body).map_err(|err| GenerateFailure::Parse(err.to_string()))
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
        });
        let response = self
            .generate(&payload)
            .await
            .map_err(GenerateFailure::into_model_error)?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(DeepPaperError::LanguageModel(
                "Gemini returned an empty candidate".into(),
            ));
        }
        Ok(text)
    }
}

/// A deterministic model used for tests and demos.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut locked = self
            .responses
            .lock()
            .map_err(|_| DeepPaperError::LanguageModel("stub model poisoned".into()))?;
        locked.pop_front().ok_or_else(|| {
            DeepPaperError::LanguageModel("StubModel ran out of scripted responses".into())
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|cand| cand.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn citations(&self) -> Vec<String> {
        let mut uris: Vec<String> = Vec::new();
        let chunks = self
            .candidates
            .first()
            .and_then(|cand| cand.grounding_metadata.as_ref())
            .map(|meta| meta.grounding_chunks.as_slice())
            .unwrap_or_default();
        for uri in chunks
            .iter()
            .filter_map(|chunk| chunk.web.as_ref())
            .filter_map(|web| web.uri.as_ref())
        {
            if !uri.is_empty() && !uris.contains(uri) {
                uris.push(uri.clone());
            }
        }
        uris
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
}
