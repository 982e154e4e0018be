//! Outbound HTTP plumbing shared by the source clients.

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::SearchError;
use crate::paper::SourceKind;

const ERROR_BODY_LIMIT: usize = 512;

pub fn user_agent() -> String {
    format!("deep-paper/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone)]
pub struct SourceHttp {
    client: reqwest::Client,
    source: SourceKind,
}

impl SourceHttp {
    pub fn new(source: SourceKind, timeout: Duration) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|err| SearchError::Transport {
                origin: source,
                message: format!("http client error: {err}"),
            })?;
        Ok(Self { client, source })
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }

    /// Sends the request and turns non-2xx statuses into
    /// [`SearchError::UpstreamHttp`].
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, SearchError> {
        let response = request.send().await.map_err(|err| SearchError::Transport {
            origin: self.source,
            message: err.to_string(),
        })?;

        let status = response.status();
        debug!(source = %self.source, %status, url = %response.url(), "upstream responded");
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(SearchError::UpstreamHttp {
            origin: self.source,
            status: status.as_u16(),
            body,
        })
    }

    pub async fn text(&self, request: RequestBuilder) -> Result<String, SearchError> {
        self.send(request)
            .await?
            .text()
            .await
            .map_err(|err| SearchError::Transport {
                origin: self.source,
                message: format!("failed to read response: {err}"),
            })
    }

    pub async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SearchError> {
        let body = self.text(request).await?;
        serde_json::from_str(&body).map_err(|err| SearchError::Parse {
            origin: self.source,
            message: err.to_string(),
        })
    }
}

/// Resolves a credential at call time.
pub fn require_key(key: Option<&str>, variable: &str) -> Result<String, SearchError> {
    key.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .ok_or_else(|| SearchError::Configuration(format!("{variable} is not set")))
}
