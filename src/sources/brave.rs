use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::http::{require_key, SourceHttp};
use crate::paper::{clean_text, normalize_date, Paper, SearchResponse, SourceKind};
use crate::rate_limit::RateGate;
use crate::sources::{PaperSource, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.search.brave.com";
pub const API_KEY_VARIABLE: &str = "BRAVE_SEARCH_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Day,
    Week,
    Month,
    Year,
}

impl Freshness {
    fn code(&self) -> &'static str {
        match self {
            Freshness::Day => "pd",
            Freshness::Week => "pw",
            Freshness::Month => "pm",
            Freshness::Year => "py",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BraveFilters {
    pub freshness: Option<Freshness>,
}

pub struct BraveClient {
    http: SourceHttp,
    gate: RateGate,
    base_url: String,
    api_key: Option<String>,
}

impl BraveClient {
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
impl PaperSource for BraveClient {
    type Filters = BraveFilters;

    const KIND: SourceKind = SourceKind::Brave;
    const MAX_RESULTS: usize = 20;
    const DEFAULT_RESULTS: usize = 10;

    fn tool_name(&self) -> &'static str {
        "web_search"
    }

    fn description(&self) -> &'static str {
        "General web search. Use for context that academic databases do not cover, such as \
         project pages, blog posts and news about research."
    }

    fn filter_schema(&self) -> Value {
        json!({
            "freshness": {"type": "string", "enum": ["day", "week", "month", "year"]}
        })
    }

    async fn search(
        &self,
        request: &SearchRequest<BraveFilters>,
    ) -> Result<SearchResponse, SearchError> {
        let api_key = require_key(self.api_key.as_deref(), API_KEY_VARIABLE)?;
        self.gate.acquire().await?;

        let count = request.clamped_max(Self::DEFAULT_RESULTS, Self::MAX_RESULTS);
        let mut params = vec![
            ("q", request.query.trim().to_string()),
            ("count", count.to_string()),
        ];
        if let Some(freshness) = request.filters.freshness {
            params.push(("freshness", freshness.code().to_string()));
        }

        let url = format!("{}/res/v1/web/search", self.base_url.trim_end_matches('/'));
        let builder = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&params);

        debug!(query = %request.query, count, "querying Brave web search");
        let body: Value = self.http.json(builder).await?;
        Ok(parse_brave_response(&body))
    }
}

#[derive(Debug, Deserialize)]
struct WebResult {
    title: Option<String>,
    url: Option<String>,
    description: Option<String>,
    page_age: Option<String>,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    name: Option<String>,
}

pub fn parse_brave_response(body: &Value) -> SearchResponse {
    let results = body
        .pointer("/web/results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut papers = Vec::with_capacity(results.len());
    for (index, result) in results.iter().enumerate() {
        let parsed = match WebResult::deserialize(result) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(index, error = %err, "skipping malformed web result");
                continue;
            }
        };
        let (Some(title), Some(url)) = (
            clean_text(parsed.title.as_deref().map(strip_tags).as_deref()),
            parsed.url.filter(|url| !url.trim().is_empty()),
        ) else {
            warn!(index, "skipping web result without title or url");
            continue;
        };
        papers.push(
            Paper::new(title, url.clone())
                .with_abstract(clean_text(parsed.description.as_deref().map(strip_tags).as_deref()))
                .with_published_date(parsed.page_age.as_deref().and_then(normalize_date))
                .with_link(Some(url))
                .with_venue(parsed.profile.and_then(|p| clean_text(p.name.as_deref()))),
        );
    }

    let total = papers.len() as u64;
    SearchResponse::new(papers, total)
}

/// Removes the inline highlighting tags Brave puts in snippets.
fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
}
