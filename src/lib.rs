//! Backend of a research assistant that searches academic sources.
//!
//! The crate provides:
//! - Source clients for arXiv, Semantic Scholar, CORE, J-STAGE, a
//!   search-grounded conference fallback and Brave web search, each paired with
//!   a normalizer producing [`Paper`] records.
//! - A per-source [`RateLimiter`] and a shared [`UrlCollector`].
//! - A uniform tool interface (`Tool`, `ToolRegistry`, `SearchTool`).
//! - A `ResearchAgent` that loops between a language model and the tools, and
//!   an axum server relaying its answer over server-sent events.

pub mod agent;
pub mod collector;
pub mod config;
pub mod error;
pub mod feed;
pub mod http;
pub mod llm;
pub mod metrics;
pub mod paper;
pub mod rate_limit;
#[cfg(feature = "server")]
pub mod server;
pub mod sources;
pub mod telemetry;
pub mod tool;
pub mod toolkit;

pub use agent::{AgentDirective, Orchestrator, ResearchAgent};
pub use collector::{CollectedUrl, UrlCollector};
pub use config::AppConfig;
pub use error::{DeepPaperError, Result, SearchError};
pub use llm::{GeminiClient, LanguageModel, StubModel};
pub use metrics::MetricsTracker;
pub use paper::{Paper, SearchResponse, SourceKind};
pub use rate_limit::{CooldownPolicy, CooldownRule, RateGate, RateKey, RateLimiter};
pub use sources::{PaperSource, SearchRequest};
pub use tool::{ErrorPolicy, SearchTool, Tool, ToolRegistry};
pub use toolkit::{rate_limiter_from_config, research_toolkit};
