//! Source clients and their response normalizers.
//!
//! - arXiv: Atom feed, fail-fast cooldown
//! - Semantic Scholar: Graph API JSON, waiting cooldown
//! - CORE: v3 JSON, bearer token
//! - J-STAGE: Atom/RSS with PRISM and Dublin Core fields, waiting cooldown
//! - Conference: search-grounded generation, parsed back into papers
//! - Brave: general web search

pub mod arxiv;
pub mod brave;
pub mod conference;
pub mod core_api;
pub mod jstage;
pub mod semantic_scholar;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::SearchError;
use crate::paper::{SearchResponse, SourceKind};

pub use arxiv::ArxivClient;
pub use brave::BraveClient;
pub use conference::ConferenceClient;
pub use core_api::CoreClient;
pub use jstage::JstageClient;
pub use semantic_scholar::SemanticScholarClient;

/// Typed tool input: the shared fields plus source specific filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest<F> {
    pub query: String,
    #[serde(default, alias = "max_results")]
    pub max_results: Option<usize>,
    #[serde(flatten)]
    pub filters: F,
}

impl<F: Default> SearchRequest<F> {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: None,
            filters: F::default(),
        }
    }
}

impl<F> SearchRequest<F> {
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = Some(max);
        self
    }

    /// Requested result count bounded to `1..=bound`.
    pub fn clamped_max(&self, default: usize, bound: usize) -> usize {
        self.max_results.unwrap_or(default).clamp(1, bound.max(1))
    }
}

#[async_trait]
pub trait PaperSource: Send + Sync {
    type Filters: DeserializeOwned + Default + Send + Sync + std::fmt::Debug;

    const KIND: SourceKind;
    /// Upper bound advertised in the tool schema and enforced before sending.
    const MAX_RESULTS: usize;
    const DEFAULT_RESULTS: usize;

    fn tool_name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Schema properties of [`Self::Filters`].
    fn filter_schema(&self) -> Value {
        json!({})
    }

    async fn search(
        &self,
        request: &SearchRequest<Self::Filters>,
    ) -> Result<SearchResponse, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, Deserialize, PartialEq)]
    #[serde(default, rename_all = "camelCase")]
    struct YearFilters {
        year_from: Option<i32>,
    }

    #[test]
    fn flattens_filters_and_accepts_snake_case_limit() {
        let request: SearchRequest<YearFilters> = serde_json::from_value(json!({
            "query": "quantum",
            "max_results": 7,
            "yearFrom": 2020
        }))
        .unwrap();
        assert_eq!(request.max_results, Some(7));
        assert_eq!(request.filters.year_from, Some(2020));
    }

    #[test]
    fn clamps_into_bounds() {
        let request = SearchRequest::<YearFilters>::new("q");
        assert_eq!(request.clamped_max(10, 50), 10);
        assert_eq!(request.clone().with_max_results(0).clamped_max(10, 50), 1);
        assert_eq!(request.with_max_results(99).clamped_max(10, 50), 50);
    }
}
