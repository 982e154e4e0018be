//! CORE v3 open access aggregator.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::http::{require_key, SourceHttp};
use crate::paper::{clean_text, normalize_date, Paper, SearchResponse, SourceKind};
use crate::rate_limit::RateGate;
use crate::sources::{PaperSource, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk/v3";
pub const API_KEY_VARIABLE: &str = "CORE_API_KEY";

/// Authors kept per paper in the normalized output.
pub const MAX_AUTHORS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreFilters {
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

pub struct CoreClient {
    http: SourceHttp,
    gate: RateGate,
    base_url: String,
    api_key: Option<String>,
}

impl CoreClient {
    pub fn new(http: SourceHttp, gate: RateGate, api_key: Option<String>) -> Self {
        Self {
            http,
            gate,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PaperSource for CoreClient {
    type Filters = CoreFilters;

    const KIND: SourceKind = SourceKind::Core;
    const MAX_RESULTS: usize = 100;
    const DEFAULT_RESULTS: usize = 10;

    fn tool_name(&self) -> &'static str {
        "core_search"
    }

    fn description(&self) -> &'static str {
        "Search CORE, an aggregator of open access research papers from repositories and journals."
    }

    fn filter_schema(&self) -> Value {
        json!({
            "yearFrom": {"type": "integer", "description": "Earliest publication year"},
            "yearTo": {"type": "integer", "description": "Latest publication year"}
        })
    }

    async fn search(
        &self,
        request: &SearchRequest<CoreFilters>,
    ) -> Result<SearchResponse, SearchError> {
        let api_key = require_key(self.api_key.as_deref(), API_KEY_VARIABLE)?;
        self.gate.acquire().await?;

        let limit = request.clamped_max(Self::DEFAULT_RESULTS, Self::MAX_RESULTS);
        let query = build_query(&request.query, &request.filters);
        let url = format!("{}/search/works", self.base_url.trim_end_matches('/'));
        let builder = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .query(&[("q", query.as_str()), ("limit", &limit.to_string())]);

        debug!(%query, limit, "querying CORE");
        let body: Value = self.http.json(builder).await?;
        Ok(parse_core_response(&body))
    }
}

/// Appends year constraints using CORE's query language.
pub fn build_query(query: &str, filters: &CoreFilters) -> String {
    let mut clauses = vec![query.trim().to_string()];
    if let Some(from) = filters.year_from {
        clauses.push(format!("yearPublished>={from}"));
    }
    if let Some(to) = filters.year_to {
        clauses.push(format!("yearPublished<={to}"));
    }
    if clauses.len() == 1 {
        return clauses.remove(0);
    }
    clauses[0] = format!("({})", clauses[0]);
    clauses.join(" AND ")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CoreWork {
    id: Option<Value>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    authors: Vec<CoreAuthor>,
    published_date: Option<String>,
    year_published: Option<i32>,
    doi: Option<String>,
    download_url: Option<String>,
    #[serde(default)]
    links: Vec<CoreLink>,
    publisher: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoreAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoreLink {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
}

pub fn parse_core_response(body: &Value) -> SearchResponse {
    let results = body
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut papers = Vec::with_capacity(results.len());
    for (index, result) in results.iter().enumerate() {
        match CoreWork::deserialize(result).map(to_paper) {
            Ok(Some(paper)) => papers.push(paper),
            Ok(None) => warn!(index, "skipping CORE work without id or title"),
            Err(err) => warn!(index, error = %err, "skipping malformed CORE work"),
        }
    }

    let total = body
        .get("totalHits")
        .and_then(Value::as_u64)
        .unwrap_or(papers.len() as u64);
    SearchResponse::new(papers, total)
}

fn to_paper(work: CoreWork) -> Option<Paper> {
    let title = clean_text(work.title.as_deref())?;
    let core_id = work.id.as_ref().and_then(|id| match id {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let doi = work.doi.as_deref().map(str::trim).filter(|d| !d.is_empty());
    let source_id = doi.map(String::from).or_else(|| core_id.clone())?;

    let link = work
        .download_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(String::from)
        .or_else(|| doi.map(|doi| format!("https://doi.org/{doi}")))
        .or_else(|| link_of_type(&work.links, "display"))
        .or_else(|| core_id.as_ref().map(|id| format!("https://core.ac.uk/works/{id}")));

    let published = work
        .published_date
        .as_deref()
        .and_then(normalize_date)
        .or_else(|| work.year_published.map(|year| year.to_string()));

    let authors = work
        .authors
        .iter()
        .filter_map(|author| clean_text(author.name.as_deref()))
        .take(MAX_AUTHORS)
        .collect();

    Some(
        Paper::new(title, source_id)
            .with_abstract(clean_text(work.abstract_text.as_deref()))
            .with_published_date(published)
            .with_authors(authors)
            .with_link(link)
            .with_venue(clean_text(work.publisher.as_deref())),
    )
}

fn link_of_type(links: &[CoreLink], kind: &str) -> Option<String> {
    links
        .iter()
        .find(|link| link.kind.as_deref() == Some(kind))
        .and_then(|link| link.url.clone())
        .filter(|url| !url.is_empty())
}
