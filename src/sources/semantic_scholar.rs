use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::http::SourceHttp;
use crate::paper::{clean_text, normalize_date, Paper, SearchResponse, SourceKind};
use crate::rate_limit::RateGate;
use crate::sources::{PaperSource, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org";

const FIELDS: &str =
    "title,abstract,year,venue,authors,citationCount,externalIds,url,publicationDate,openAccessPdf";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScholarFilters {
    /// Publication year or range, e.g. `2020` or `2019-2023`.
    pub year: Option<String>,
    /// Comma separated list such as `Computer Science,Medicine`.
    pub fields_of_study: Option<String>,
    pub open_access_only: bool,
}

pub struct SemanticScholarClient {
    http: SourceHttp,
    gate: RateGate,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(http: SourceHttp, gate: RateGate) -> Self {
        Self {
            http,
            gate,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Optional key; anonymous access works with a lower upstream quota.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|key| !key.trim().is_empty());
        self
    }
}

#[async_trait]
impl PaperSource for SemanticScholarClient {
    type Filters = ScholarFilters;

    const KIND: SourceKind = SourceKind::SemanticScholar;
    const MAX_RESULTS: usize = 100;
    const DEFAULT_RESULTS: usize = 10;

    fn tool_name(&self) -> &'static str {
        "semantic_scholar_search"
    }

    fn description(&self) -> &'static str {
        "Search Semantic Scholar across all disciplines. Returns titles, authors, abstracts, \
         venues and citation counts."
    }

    fn filter_schema(&self) -> Value {
        json!({
            "year": {"type": "string", "description": "Year or range such as '2020' or '2018-2022'"},
            "fieldsOfStudy": {"type": "string", "description": "Comma separated fields of study"},
            "openAccessOnly": {"type": "boolean", "description": "Only papers with an open access PDF"}
        })
    }

    async fn search(
        &self,
        request: &SearchRequest<ScholarFilters>,
    ) -> Result<SearchResponse, SearchError> {
        self.gate.acquire().await?;

        let limit = request.clamped_max(Self::DEFAULT_RESULTS, Self::MAX_RESULTS);
        let mut params = vec![
            ("query", request.query.trim().to_string()),
            ("limit", limit.to_string()),
            ("fields", FIELDS.to_string()),
        ];
        if let Some(year) = request.filters.year.as_deref().filter(|y| !y.trim().is_empty()) {
            params.push(("year", year.trim().to_string()));
        }
        if let Some(fields) = request
            .filters
            .fields_of_study
            .as_deref()
            .filter(|f| !f.trim().is_empty())
        {
            params.push(("fieldsOfStudy", fields.trim().to_string()));
        }
        if request.filters.open_access_only {
            params.push(("openAccessPdf", String::new()));
        }

        let url = format!("{}/graph/v1/paper/search", self.base_url.trim_end_matches('/'));
        let mut builder = self.http.get(&url).query(&params);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        debug!(query = %request.query, limit, "querying Semantic Scholar");
        let body: Value = self.http.json(builder).await?;
        Ok(parse_scholar_response(&body))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScholarPaper {
    paper_id: Option<String>,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<ScholarAuthor>,
    citation_count: Option<u64>,
    external_ids: Option<ExternalIds>,
    url: Option<String>,
    publication_date: Option<String>,
    open_access_pdf: Option<OpenAccessPdf>,
}

#[derive(Debug, Deserialize)]
struct ScholarAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    #[serde(rename = "DOI")]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAccessPdf {
    url: Option<String>,
}

/// Normalizes a `/paper/search` body. Records are decoded one at a time so a
/// malformed record only costs itself.
pub fn parse_scholar_response(body: &Value) -> SearchResponse {
    let records = body
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut papers = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        let parsed = match ScholarPaper::deserialize(record) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(index, error = %err, "skipping malformed Semantic Scholar record");
                continue;
            }
        };
        match to_paper(parsed) {
            Some(paper) => papers.push(paper),
            None => warn!(index, "skipping Semantic Scholar record without id or title"),
        }
    }

    let total = body
        .get("total")
        .and_then(Value::as_u64)
        .unwrap_or(papers.len() as u64);
    SearchResponse::new(papers, total)
}

fn to_paper(record: ScholarPaper) -> Option<Paper> {
    let title = clean_text(record.title.as_deref())?;
    let doi = record
        .external_ids
        .and_then(|ids| ids.doi)
        .filter(|doi| !doi.trim().is_empty());
    let source_id = doi
        .or(record.paper_id)
        .filter(|id| !id.trim().is_empty())?;

    let published = record
        .publication_date
        .as_deref()
        .and_then(normalize_date)
        .or_else(|| record.year.map(|year| year.to_string()));
    let link = record
        .open_access_pdf
        .and_then(|pdf| pdf.url)
        .filter(|url| !url.is_empty())
        .or(record.url);

    Some(
        Paper::new(title, source_id)
            .with_abstract(clean_text(record.abstract_text.as_deref()))
            .with_published_date(published)
            .with_authors(
                record
                    .authors
                    .into_iter()
                    .filter_map(|author| clean_text(author.name.as_deref()))
                    .collect(),
            )
            .with_link(link)
            .with_venue(clean_text(record.venue.as_deref()))
            .with_citation_count(Some(record.citation_count.unwrap_or(0))),
    )
}
