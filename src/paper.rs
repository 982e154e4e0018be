//! Normalized paper records shared by every source.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One integrated search backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Arxiv,
    SemanticScholar,
    Core,
    Jstage,
    Conference,
    Brave,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::Arxiv,
        SourceKind::SemanticScholar,
        SourceKind::Core,
        SourceKind::Jstage,
        SourceKind::Conference,
        SourceKind::Brave,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Arxiv => "arxiv",
            SourceKind::SemanticScholar => "semantic_scholar",
            SourceKind::Core => "core",
            SourceKind::Jstage => "jstage",
            SourceKind::Conference => "conference",
            SourceKind::Brave => "brave",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub published_date: Option<String>,
    pub authors: Vec<String>,
    pub source_id: String,
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_count: Option<u64>,
}

impl Paper {
    pub fn new(title: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            abstract_text: None,
            published_date: None,
            authors: Vec::new(),
            source_id: source_id.into(),
            link: None,
            venue: None,
            citation_count: None,
        }
    }

    pub fn with_abstract(mut self, text: Option<String>) -> Self {
        self.abstract_text = text;
        self
    }

    pub fn with_published_date(mut self, date: Option<String>) -> Self {
        self.published_date = date;
        self
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link;
        self
    }

    pub fn with_venue(mut self, venue: Option<String>) -> Self {
        self.venue = venue;
        self
    }

    pub fn with_citation_count(mut self, count: Option<u64>) -> Self {
        self.citation_count = count;
        self
    }
}

/// Result of one source search.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub papers: Vec<Paper>,
    /// Best-effort count reported by the upstream service.
    pub total_results: u64,
    /// Raw generated text, only set by generative sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
}

impl SearchResponse {
    pub fn new(papers: Vec<Paper>, total_results: u64) -> Self {
        Self {
            papers,
            total_results,
            report: None,
            citations: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Removes links before the response is handed to the agent.
    pub fn without_links(mut self) -> Self {
        for paper in &mut self.papers {
            paper.link = None;
        }
        self
    }
}

/// Collapses runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trims and collapses a text field, mapping blank values to `None`.
pub fn clean_text(value: Option<&str>) -> Option<String> {
    value
        .map(collapse_whitespace)
        .filter(|cleaned| !cleaned.is_empty())
}

/// Normalizes the leading date portion of a timestamp to `YYYY-MM-DD`.
///
/// Partial dates keep their precision (`YYYY-MM` or `YYYY`). Anything that
/// does not start with a plausible four digit year yields `None`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let head = raw
        .trim()
        .split(|c: char| c == 'T' || c.is_whitespace())
        .next()?;
    let mut parts = head.split(|c| c == '-' || c == '/');

    let year = parts.next()?;
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let month = match parts.next() {
        Some(m) => m.parse::<u32>().ok().filter(|m| (1..=12).contains(m)),
        None => return Some(year.to_string()),
    };
    let Some(month) = month else {
        return Some(year.to_string());
    };

    match parts.next().and_then(|d| d.parse::<u32>().ok()) {
        Some(day) if (1..=31).contains(&day) => Some(format!("{year}-{month:02}-{day:02}")),
        _ => Some(format!("{year}-{month:02}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_timestamps_and_partial_dates() {
        assert_eq!(
            normalize_date("2023-01-15T18:00:00Z").as_deref(),
            Some("2023-01-15")
        );
        assert_eq!(normalize_date("2021/3/7").as_deref(), Some("2021-03-07"));
        assert_eq!(normalize_date("2020-05").as_deref(), Some("2020-05"));
        assert_eq!(normalize_date("1999").as_deref(), Some("1999"));
        assert_eq!(normalize_date("2020-13-01").as_deref(), Some("2020"));
        assert_eq!(normalize_date("n.d."), None);
        assert_eq!(normalize_date(""), None);
    }

    #[test]
    fn clean_text_drops_blank_values() {
        assert_eq!(
            clean_text(Some("  Deep\n   learning ")).as_deref(),
            Some("Deep learning")
        );
        assert_eq!(clean_text(Some(" \n ")), None);
        assert_eq!(clean_text(None), None);
    }

    #[test]
    fn serializes_with_camel_case_and_abstract_key() {
        let paper = Paper::new("Attention", "1706.03762")
            .with_abstract(Some("Transformers".into()))
            .with_published_date(Some("2017-06-12".into()));
        let value = serde_json::to_value(&paper).unwrap();
        assert_eq!(value["abstract"], "Transformers");
        assert_eq!(value["publishedDate"], "2017-06-12");
        assert_eq!(value["sourceId"], "1706.03762");
        assert!(value.get("venue").is_none());
    }

    #[test]
    fn without_links_strips_every_paper() {
        let response = SearchResponse::new(
            vec![Paper::new("A", "a").with_link(Some("https://example.org/a".into()))],
            1,
        )
        .without_links();
        assert!(response.papers[0].link.is_none());
    }
}
