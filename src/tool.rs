use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::collector::UrlCollector;
use crate::error::{DeepPaperError, Result, SearchError};
use crate::paper::SearchResponse;
use crate::sources::{PaperSource, SearchRequest};

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Optionally return a JSON Schema-like object describing the expected arguments.
    fn parameters(&self) -> Option<Value> {
        None
    }

    async fn call(&self, input: Value) -> std::result::Result<Value, SearchError>;
}

/// Static description of a tool that can be embedded in prompts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| DeepPaperError::ToolNotFound(name.to_string()))?;
        tool.call(input)
            .await
            .map_err(|source| DeepPaperError::ToolInvocation {
                name: name.to_string(),
                source,
            })
    }
}

/// What a search tool does when its source fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Surface the [`SearchError`] to the caller.
    #[default]
    Propagate,
    /// Log the failure and answer with an empty result.
    Degrade,
}

/// Adapts a [`PaperSource`] to the [`Tool`] contract: validates input,
/// clamps `maxResults`, feeds the URL collector and applies the error policy.
pub struct SearchTool<S: PaperSource> {
    source: S,
    collector: UrlCollector,
    policy: ErrorPolicy,
    expose_links: bool,
}

impl<S: PaperSource> SearchTool<S> {
    pub fn new(source: S, collector: UrlCollector) -> Self {
        Self {
            source,
            collector,
            policy: ErrorPolicy::default(),
            expose_links: false,
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep paper links in the agent-facing output.
    pub fn with_links(mut self, expose: bool) -> Self {
        self.expose_links = expose;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Typed entry point shared by [`Tool::call`].
    pub async fn search(
        &self,
        mut request: SearchRequest<S::Filters>,
    ) -> std::result::Result<SearchResponse, SearchError> {
        if request.query.trim().is_empty() {
            return Err(SearchError::InvalidInput(format!(
                "`query` must not be empty for {}",
                self.source.tool_name()
            )));
        }
        request.max_results = Some(request.clamped_max(S::DEFAULT_RESULTS, S::MAX_RESULTS));

        match self.source.search(&request).await {
            Ok(response) => {
                let collected = self.collector.record_papers(S::KIND, &response.papers);
                info!(
                    tool = self.source.tool_name(),
                    papers = response.papers.len(),
                    total = response.total_results,
                    collected,
                    "search completed"
                );
                Ok(if self.expose_links {
                    response
                } else {
                    response.without_links()
                })
            }
            Err(err) => match self.policy {
                ErrorPolicy::Propagate => Err(err),
                ErrorPolicy::Degrade => {
                    warn!(
                        tool = self.source.tool_name(),
                        error = %err,
                        "search failed, answering with an empty result"
                    );
                    Ok(SearchResponse::empty())
                }
            },
        }
    }

    fn schema(&self) -> Value {
        let mut properties = Map::new();
        properties.insert(
            "query".into(),
            json!({"type": "string", "description": "Search query"}),
        );
        properties.insert(
            "maxResults".into(),
            json!({
                "type": "integer",
                "minimum": 1,
                "maximum": S::MAX_RESULTS,
                "default": S::DEFAULT_RESULTS,
                "description": "Maximum number of papers to return"
            }),
        );
        if let Value::Object(filters) = self.source.filter_schema() {
            properties.extend(filters);
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": ["query"]
        })
    }
}

#[async_trait]
impl<S: PaperSource + 'static> Tool for SearchTool<S> {
    fn name(&self) -> &str {
        self.source.tool_name()
    }

    fn description(&self) -> &str {
        self.source.description()
    }

    fn parameters(&self) -> Option<Value> {
        Some(self.schema())
    }

    async fn call(&self, input: Value) -> std::result::Result<Value, SearchError> {
        let request: SearchRequest<S::Filters> = serde_json::from_value(input).map_err(|err| {
            SearchError::InvalidInput(format!(
                "invalid input for {}: {err}",
                self.source.tool_name()
            ))
        })?;
        let response = self.search(request).await?;
        serde_json::to_value(response).map_err(|err| SearchError::Unknown(err.to_string()))
    }
}
