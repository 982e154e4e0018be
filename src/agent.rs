use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{DeepPaperError, Result};
use crate::llm::LanguageModel;
use crate::metrics::{MetricsTracker, RunGuard};
use crate::tool::ToolRegistry;

pub const RESEARCH_INSTRUCTIONS: &str = "You are Deep Paper, a research assistant. \
Answer the user's research question by searching the academic tools available to you. \
Prefer arxiv_search, semantic_scholar_search and core_search for papers, jstage_search for \
Japanese literature, conference_search only when the databases return nothing useful, and \
web_search for non-academic context. When a tool reports `rate_limited`, switch to another \
source instead of retrying immediately. Never invent papers, authors or links: cite only what \
the tools returned. Finish with a structured markdown report: a short summary, the key papers \
(title, authors, year, source) and open questions.";

/// Structured instructions the language model should emit.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentDirective {
    Respond {
        content: String,
    },
    CallTool {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

/// Drives one chat turn and streams the answer as text chunks.
///
/// Implementations stop producing output once `chunks` is closed.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(&self, message: &str, chunks: mpsc::Sender<String>) -> Result<()>;
}

#[derive(Debug, Clone)]
enum Entry {
    User(String),
    ToolCall { name: String, arguments: Value },
    ToolResult { name: String, output: Value },
    ToolFailure { name: String, error: Value },
}

/// A tool-using agent that alternates between the language model and the
/// registered search tools.
pub struct ResearchAgent<M: LanguageModel + ?Sized> {
    instructions: String,
    model: Arc<M>,
    tools: ToolRegistry,
    max_steps: usize,
    metrics: Option<MetricsTracker>,
}

impl<M: LanguageModel + ?Sized> ResearchAgent<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            instructions: RESEARCH_INSTRUCTIONS.to_string(),
            model,
            tools: ToolRegistry::new(),
            max_steps: 8,
            metrics: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs the tool loop to completion and returns the final report.
    ///
    /// Tool failures are handed back to the model as observations; only model
    /// failures and the step limit end the run with an error.
    pub async fn respond(&self, message: &str) -> Result<String> {
        let mut guard: Option<RunGuard> = self.metrics.as_ref().map(MetricsTracker::start_run);
        let result = self.run_loop(message, &mut guard).await;
        if let Some(guard) = guard {
            guard.finish(result.is_ok());
        }
        result
    }

    async fn run_loop(&self, message: &str, guard: &mut Option<RunGuard>) -> Result<String> {
        let mut transcript = vec![Entry::User(message.to_string())];

        for step in 0..self.max_steps {
            let prompt = self.build_prompt(&transcript);
            let raw = self.model.complete(&prompt).await?;
            debug!(step, "model turn completed");

            match parse_directive(&raw)? {
                AgentDirective::Respond { content } => {
                    info!(steps = step + 1, "research run finished");
                    return Ok(content);
                }
                AgentDirective::CallTool { name, arguments } => {
                    if let Some(guard) = guard.as_mut() {
                        guard.record_tool_call();
                    }
                    transcript.push(Entry::ToolCall {
                        name: name.clone(),
                        arguments: arguments.clone(),
                    });

                    match self.tools.call(&name, arguments).await {
                        Ok(output) => transcript.push(Entry::ToolResult { name, output }),
                        Err(err) => {
                            warn!(tool = %name, error = %err, "tool call failed");
                            if let Some(guard) = guard.as_mut() {
                                guard.record_failure();
                            }
                            transcript.push(Entry::ToolFailure {
                                name,
                                error: failure_observation(&err),
                            });
                        }
                    }
                }
            }
        }

        Err(DeepPaperError::Protocol(
            "Agent reached the step limit without returning a response".into(),
        ))
    }

    fn build_prompt(&self, transcript: &[Entry]) -> String {
        let mut prompt = String::new();
        prompt.push_str(&format!("System: {}\n\n", self.instructions));
        prompt.push_str("You must answer with JSON in one of the following formats:\n");
        prompt.push_str("- {\"action\":\"respond\",\"content\":\"<final markdown report>\"}\n");
        prompt.push_str(
            "- {\"action\":\"call_tool\",\"name\":\"<tool name>\",\"arguments\":{...}}\n\n",
        );
        if self.tools.is_empty() {
            prompt.push_str("No tools are available.\n\n");
        } else {
            prompt.push_str("Available tools:\n");
            for tool in self.tools.describe() {
                prompt.push_str(&format!("- {}: {}", tool.name, tool.description));
                if let Some(params) = &tool.parameters {
                    prompt.push_str(&format!(" (parameters: {})", params));
                }
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("Conversation so far:\n");
        for entry in transcript {
            match entry {
                Entry::User(text) => prompt.push_str(&format!("[User] {text}\n")),
                Entry::ToolCall { name, arguments } => {
                    prompt.push_str(&format!("[Assistant] -> calling {name} with {arguments}\n"))
                }
                Entry::ToolResult { name, output } => {
                    prompt.push_str(&format!("[Tool] <- {name} returned {output}\n"))
                }
                Entry::ToolFailure { name, error } => {
                    prompt.push_str(&format!("[Tool] <- {name} failed with {error}\n"))
                }
            }
        }
        prompt
    }
}

#[async_trait]
impl<M: LanguageModel + ?Sized + 'static> Orchestrator for ResearchAgent<M> {
    async fn run(&self, message: &str, chunks: mpsc::Sender<String>) -> Result<()> {
        let report = self.respond(message).await?;
        for chunk in paragraphs(&report) {
            if chunks.send(chunk).await.is_err() {
                debug!("chunk receiver dropped, stopping relay");
                break;
            }
        }
        Ok(())
    }
}

/// Accepts bare JSON or JSON wrapped in a markdown fence. Output that holds
/// no directive at all is taken as the final answer.
pub fn parse_directive(raw: &str) -> Result<AgentDirective> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DeepPaperError::Protocol(
            "language model returned an empty response".into(),
        ));
    }
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if let Ok(directive) = serde_json::from_str::<AgentDirective>(body) {
        return Ok(directive);
    }
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(directive) = serde_json::from_str::<AgentDirective>(&body[start..=end]) {
                return Ok(directive);
            }
        }
    }
    if serde_json::from_str::<Value>(body).is_ok_and(|v| v.get("action").is_some()) {
        return Err(DeepPaperError::Protocol(format!(
            "Expected JSON directive with `action`, got `{body}`"
        )));
    }
    Ok(AgentDirective::Respond {
        content: trimmed.to_string(),
    })
}

fn failure_observation(err: &DeepPaperError) -> Value {
    match err {
        DeepPaperError::ToolInvocation { source, .. } => json!({
            "kind": source.kind(),
            "message": source.to_string(),
            "retryAfterMs": source.retry_after_ms(),
        }),
        other => json!({"kind": "tool_error", "message": other.to_string()}),
    }
}

/// Splits a report on blank lines, keeping the separator on every chunk but
/// the last so the concatenation reproduces the report.
pub fn paragraphs(report: &str) -> Vec<String> {
    let parts: Vec<&str> = report.split("\n\n").collect();
    let last = parts.len().saturating_sub(1);
    parts
        .into_iter()
        .enumerate()
        .filter_map(|(index, part)| {
            let chunk = if index < last {
                format!("{part}\n\n")
            } else {
                part.to_string()
            };
            (!chunk.is_empty()).then_some(chunk)
        })
        .collect()
}
