//! J-STAGE (Japan Science and Technology Information Aggregator) article search.
//!
//! The service answers with Atom, older mirrors with RSS. Both are read through
//! [`parse_entries_or_items`], so `<entry>` wins whenever it is present.
//! Field lookups try the J-STAGE specific bilingual elements first and then the
//! PRISM and Dublin Core equivalents.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::feed::{parse_entries_or_items, FeedRecord};
use crate::http::SourceHttp;
use crate::paper::{clean_text, normalize_date, Paper, SearchResponse, SourceKind};
use crate::rate_limit::RateGate;
use crate::sources::{PaperSource, SearchRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.jstage.jst.go.jp/searchapi/do";

const TITLE_PATHS: [&str; 3] = ["article_title/en", "article_title/ja", "title"];
const AUTHOR_PATHS: [&str; 3] = ["author/en/name", "author/ja/name", "author/name"];
const DATE_FIELDS: [&str; 3] = ["prism:publicationDate", "pubyear", "dc:date"];
const VENUE_PATHS: [&str; 3] = [
    "material_title/en",
    "material_title/ja",
    "prism:publicationName",
];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JstageFilters {
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
}

pub struct JstageClient {
    http: SourceHttp,
    gate: RateGate,
    base_url: String,
}

impl JstageClient {
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
impl PaperSource for JstageClient {
    type Filters = JstageFilters;

    const KIND: SourceKind = SourceKind::Jstage;
    const MAX_RESULTS: usize = 100;
    const DEFAULT_RESULTS: usize = 10;

    fn tool_name(&self) -> &'static str {
        "jstage_search"
    }

    fn description(&self) -> &'static str {
        "Search J-STAGE for Japanese academic journal articles (English and Japanese metadata)."
    }

    fn filter_schema(&self) -> Value {
        json!({
            "yearFrom": {"type": "integer", "description": "Earliest publication year"},
            "yearTo": {"type": "integer", "description": "Latest publication year"}
        })
    }

    async fn search(
        &self,
        request: &SearchRequest<JstageFilters>,
    ) -> Result<SearchResponse, SearchError> {
        self.gate.acquire().await?;

        let count = request.clamped_max(Self::DEFAULT_RESULTS, Self::MAX_RESULTS);
        let mut params = vec![
            ("service", "3".to_string()),
            ("keyword", request.query.trim().to_string()),
            ("count", count.to_string()),
        ];
        if let Some(from) = request.filters.year_from {
            params.push(("pubyearfrom", from.to_string()));
        }
        if let Some(to) = request.filters.year_to {
            params.push(("pubyearto", to.to_string()));
        }

        debug!(query = %request.query, count, "querying J-STAGE");
        let xml = self.http.text(self.http.get(&self.base_url).query(&params)).await?;
        Ok(parse_jstage_feed(&xml))
    }
}

pub fn parse_jstage_feed(xml: &str) -> SearchResponse {
    let feed = parse_entries_or_items(xml);
    if feed.skipped > 0 {
        warn!(skipped = feed.skipped, "J-STAGE feed contained malformed records");
    }

    let mut papers = Vec::with_capacity(feed.records.len());
    for record in &feed.records {
        match record_to_paper(record) {
            Some(paper) => papers.push(paper),
            None => warn!("skipping J-STAGE record without id or title"),
        }
    }
    let total = feed.total_results.unwrap_or(papers.len() as u64);
    SearchResponse::new(papers, total)
}

fn first_at<'a>(record: &'a FeedRecord, paths: &[&str]) -> Option<&'a str> {
    paths.iter().find_map(|path| record.at(path))
}

fn record_to_paper(record: &FeedRecord) -> Option<Paper> {
    let title = clean_text(first_at(record, &TITLE_PATHS))?;

    let link = first_at(record, &["article_link/en", "article_link/ja"])
        .map(str::trim)
        .map(String::from)
        .or_else(|| {
            record
                .links
                .iter()
                .find(|link| link.rel.as_deref().map_or(true, |rel| rel == "alternate"))
                .map(|link| link.href.clone())
        })
        .or_else(|| record.first("link").map(|link| link.trim().to_string()));

    let source_id = record
        .first_of(&["prism:doi", "doi", "id"])
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .or_else(|| link.clone())?;

    let mut authors: Vec<String> = record
        .all("dc:creator")
        .into_iter()
        .filter_map(|name| clean_text(Some(name)))
        .collect();
    if authors.is_empty() {
        authors = AUTHOR_PATHS
            .iter()
            .map(|path| record.all_at(path))
            .find(|names| !names.is_empty())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|name| clean_text(Some(name)))
            .collect();
    }

    let published = DATE_FIELDS
        .iter()
        .find_map(|field| record.first(field).and_then(normalize_date));

    Some(
        Paper::new(title, source_id)
            .with_abstract(clean_text(record.first_of(&["description", "summary"])))
            .with_published_date(published)
            .with_authors(authors)
            .with_link(link)
            .with_venue(clean_text(first_at(record, &VENUE_PATHS))),
    )
}
