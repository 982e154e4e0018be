//! arXiv search over the public export API.
//!
//! The Atom feed is read with the structural extractor in [`crate::feed`].
//! Calls are gated by a fail-fast cooldown: an early second call is rejected
//! with [`SearchError::RateLimited`] instead of being delayed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::feed::{parse_records, FeedRecord};
use crate::http::SourceHttp;
use crate::paper::{clean_text, normalize_date, Paper, SearchResponse, SourceKind};
use crate::rate_limit::RateGate;
use crate::sources::{PaperSource, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://export.arxiv.org/api/query";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArxivSort {
    Relevance,
    LastUpdatedDate,
    SubmittedDate,
}

impl ArxivSort {
    fn as_str(&self) -> &'static str {
        match self {
            ArxivSort::Relevance => "relevance",
            ArxivSort::LastUpdatedDate => "lastUpdatedDate",
            ArxivSort::SubmittedDate => "submittedDate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArxivFilters {
    /// arXiv subject class such as `cs.AI`.
    pub category: Option<String>,
    pub sort_by: Option<ArxivSort>,
    pub sort_order: Option<SortOrder>,
}

pub struct ArxivClient {
    http: SourceHttp,
    gate: RateGate,
    base_url: String,
}

impl ArxivClient {
    pub fn new(http: SourceHttp, gate: RateGate) -> Self {
        Self {
            http,
            gate,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    type Filters = ArxivFilters;

    const KIND: SourceKind = SourceKind::Arxiv;
    const MAX_RESULTS: usize = 50;
    const DEFAULT_RESULTS: usize = 10;

    fn tool_name(&self) -> &'static str {
        "arxiv_search"
    }

    fn description(&self) -> &'static str {
        "Search arXiv for preprints. Returns titles, authors, abstracts and submission dates. \
         Calls closer than 30 seconds apart are rejected with a retry hint."
    }

    fn filter_schema(&self) -> Value {
        json!({
            "category": {
                "type": "string",
                "description": "Optional arXiv category (e.g. 'cs.AI', 'physics.hep-th')"
            },
            "sortBy": {"type": "string", "enum": ["relevance", "lastUpdatedDate", "submittedDate"]},
            "sortOrder": {"type": "string", "enum": ["ascending", "descending"]}
        })
    }

    async fn search(
        &self,
        request: &SearchRequest<ArxivFilters>,
    ) -> Result<SearchResponse, SearchError> {
        self.gate.acquire().await?;

        let max_results = request.clamped_max(Self::DEFAULT_RESULTS, Self::MAX_RESULTS);
        let search_query = match request.filters.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => {
                format!("cat:{category} AND all:{}", request.query.trim())
            }
            _ => format!("all:{}", request.query.trim()),
        };

        let mut params = vec![
            ("search_query", search_query),
            ("start", "0".to_string()),
            ("max_results", max_results.to_string()),
        ];
        if let Some(sort) = request.filters.sort_by {
            params.push(("sortBy", sort.as_str().to_string()));
        }
        if let Some(order) = request.filters.sort_order {
            let order = match order {
                SortOrder::Ascending => "ascending",
                SortOrder::Descending => "descending",
            };
            params.push(("sortOrder", order.to_string()));
        }

        debug!(query = %request.query, max_results, "querying arXiv");
        let xml = self.http.text(self.http.get(&self.base_url).query(&params)).await?;
        Ok(parse_arxiv_feed(&xml))
    }
}

/// Normalizes an arXiv Atom feed. Entries without an id or title are dropped.
pub fn parse_arxiv_feed(xml: &str) -> SearchResponse {
    let feed = parse_records(xml, "entry");
    let mut papers = Vec::with_capacity(feed.records.len());
    for record in &feed.records {
        match entry_to_paper(record) {
            Some(paper) => papers.push(paper),
            None => warn!("skipping arXiv entry without id or title"),
        }
    }
    let total = feed.total_results.unwrap_or(papers.len() as u64);
    SearchResponse::new(papers, total)
}

fn entry_to_paper(record: &FeedRecord) -> Option<Paper> {
    let id_uri = record.first("id")?.trim();
    let arxiv_id = arxiv_id_from_uri(id_uri)?;
    let title = clean_text(record.first("title"))?;

    let abs_link = record
        .links
        .iter()
        .find(|link| link.rel.as_deref() == Some("alternate"))
        .map(|link| link.href.as_str())
        .unwrap_or(id_uri);

    let authors = record
        .all_at("author/name")
        .into_iter()
        .filter_map(|name| clean_text(Some(name)))
        .collect();

    Some(
        Paper::new(title, arxiv_id)
            .with_abstract(clean_text(record.first("summary")))
            .with_published_date(record.first("published").and_then(normalize_date))
            .with_authors(authors)
            .with_link(Some(pdf_link(abs_link)))
            .with_venue(clean_text(record.first("arxiv:journal_ref"))),
    )
}

/// `http://arxiv.org/abs/2301.12345v2` -> `2301.12345v2`; old style ids keep
/// their archive prefix (`hep-th/9901001v1`).
pub fn arxiv_id_from_uri(uri: &str) -> Option<String> {
    let id = match uri.split_once("/abs/") {
        Some((_, rest)) => rest,
        None => uri.trim_end_matches('/').rsplit('/').next()?,
    };
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Rewrites an abstract-page link into the matching PDF link.
pub fn pdf_link(abs_url: &str) -> String {
    let mut link = abs_url.trim().replacen("/abs/", "/pdf/", 1);
    if !link.ends_with(".pdf") {
        link.push_str(".pdf");
    }
    link
}
