//! Conference paper discovery through search-grounded generation.
//!
//! This is not a database query. A generative model with web search writes a
//! numbered markdown report, and [`extract_papers`] pulls paper fields back out
//! of it on a best-effort basis. The raw report always travels with the
//! response, so an extraction that finds nothing still leaves the caller
//! with the text.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::SearchError;
use crate::llm::GeminiClient;
use crate::paper::{clean_text, Paper, SearchResponse, SourceKind};
use crate::rate_limit::RateGate;
use crate::sources::{PaperSource, SearchRequest};

/// Upper bound on papers extracted from one report.
pub const MAX_EXTRACTED: usize = 10;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s*)?(\d{1,2})[.)]\s+(.*)$").expect("valid regex")
});
static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*+]\s+)?[*_]*\s*(title|authors?|conference|venue|year|abstract|summary|url|link|pdf)\s*[*_]*\s*:\s*[*_]*\s*(.*?)\s*$",
    )
    .expect("valid regex")
});
static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s<>()\[\]"'`]+"#).expect("valid regex"));
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid regex"));

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConferenceFilters {
    /// Conference names to focus on, e.g. `["NeurIPS", "ICML"]`.
    pub conferences: Vec<String>,
    pub year: Option<i32>,
}

pub struct ConferenceClient {
    model: GeminiClient,
    gate: RateGate,
}

impl ConferenceClient {
    pub fn new(model: GeminiClient, gate: RateGate) -> Self {
        Self { model, gate }
    }
}

#[async_trait]
impl PaperSource for ConferenceClient {
    type Filters = ConferenceFilters;

    const KIND: SourceKind = SourceKind::Conference;
    const MAX_RESULTS: usize = MAX_EXTRACTED;
    const DEFAULT_RESULTS: usize = 5;

    fn tool_name(&self) -> &'static str {
        "conference_search"
    }

    fn description(&self) -> &'static str {
        "Find recent conference papers with a web-grounded search. Use as a fallback when the \
         structured databases return nothing. Returns extracted papers plus the raw report."
    }

    fn filter_schema(&self) -> Value {
        json!({
            "conferences": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Conference names to focus on (e.g. NeurIPS, ICML, ACL)"
            },
            "year": {"type": "integer", "description": "Conference year"}
        })
    }

    async fn search(
        &self,
        request: &SearchRequest<ConferenceFilters>,
    ) -> Result<SearchResponse, SearchError> {
        self.gate.acquire().await?;

        let limit = request.clamped_max(Self::DEFAULT_RESULTS, Self::MAX_RESULTS);
        let prompt = build_prompt(&request.query, &request.filters, limit);
        debug!(query = %request.query, limit, "running grounded conference search");

        let answer = self.model.generate_grounded(&prompt, Self::KIND).await?;
        let mut papers = extract_papers(&answer.text, &answer.citations);
        papers.truncate(limit);
        if papers.is_empty() && !answer.text.trim().is_empty() {
            warn!("no papers could be extracted from the conference report");
        }

        let total = papers.len() as u64;
        let mut response = SearchResponse::new(papers, total);
        response.report = Some(answer.text);
        response.citations = answer.citations;
        Ok(response)
    }
}

pub fn build_prompt(query: &str, filters: &ConferenceFilters, limit: usize) -> String {
    let mut scope = String::new();
    let conferences: Vec<&str> = filters
        .conferences
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if !conferences.is_empty() {
        scope.push_str(&format!(" presented at {}", conferences.join(", ")));
    }
    if let Some(year) = filters.year {
        scope.push_str(&format!(" in {year}"));
    }

    format!(
        "Search the web for up to {limit} academic conference papers about \"{query}\"{scope}.\n\
         Answer as a numbered markdown list. For every paper use exactly this layout:\n\
         1. **Title:** <paper title>\n\
         \x20  - **Authors:** <comma separated names>\n\
         \x20  - **Conference:** <conference name and year>\n\
         \x20  - **Abstract:** <one or two sentence summary>\n\
         \x20  - **URL:** <link to the paper page or PDF>\n\
         Only list papers you found in search results.",
        query = query.trim()
    )
}

#[derive(Default)]
struct Section {
    number: String,
    heading: String,
    title: Option<String>,
    authors: Option<String>,
    venue: Option<String>,
    year: Option<String>,
    summary: Vec<String>,
    url: Option<String>,
    stray_urls: Vec<String>,
}

/// Splits a markdown report into numbered sections and extracts one paper per
/// section. Sections without a usable title are dropped. At most
/// [`MAX_EXTRACTED`] papers are returned; grounding citations fill in missing
/// links by position.
pub fn extract_papers(report: &str, citations: &[String]) -> Vec<Paper> {
    let mut sections: Vec<Section> = Vec::new();
    let mut in_abstract = false;

    for line in report.lines() {
        if let Some(caps) = SECTION_RE.captures(line) {
            if FIELD_RE.captures(&caps[2]).map_or(true, |f| f[1].eq_ignore_ascii_case("title")) {
                sections.push(Section {
                    number: caps[1].to_string(),
                    heading: caps[2].to_string(),
                    ..Section::default()
                });
                in_abstract = false;
                if let Some(field) = FIELD_RE.captures(&caps[2]) {
                    if let Some(section) = sections.last_mut() {
                        section.title = Some(field[2].to_string());
                    }
                }
                continue;
            }
        }
        let Some(section) = sections.last_mut() else {
            continue;
        };

        match FIELD_RE.captures(line) {
            Some(field) => {
                let value = field[2].to_string();
                in_abstract = false;
                match field[1].to_ascii_lowercase().as_str() {
                    "title" => section.title = Some(value),
                    "author" | "authors" => section.authors = Some(value),
                    "conference" | "venue" => section.venue = Some(value),
                    "year" => section.year = Some(value),
                    "abstract" | "summary" => {
                        section.summary.push(value);
                        in_abstract = true;
                    }
                    _ => section.url = first_url(&value).or(section.url.take()),
                }
            }
            None => {
                section.stray_urls.extend(URL_RE.find_iter(line).map(|m| trim_url(m.as_str())));
                if in_abstract && !line.trim().is_empty() {
                    section.summary.push(line.trim().to_string());
                }
            }
        }
    }

    sections
        .into_iter()
        .filter_map(|section| section_to_paper(section, citations))
        .take(MAX_EXTRACTED)
        .collect()
}

fn section_to_paper(section: Section, citations: &[String]) -> Option<Paper> {
    let title = section
        .title
        .as_deref()
        .map(strip_markup)
        .or_else(|| Some(strip_markup(&section.heading)))
        .and_then(|t| clean_text(Some(&t)))?;

    let link = section
        .url
        .or_else(|| section.stray_urls.into_iter().next())
        .or_else(|| {
            let index: usize = section.number.parse().ok()?;
            citations.get(index.checked_sub(1)?).cloned()
        });

    let authors = section
        .authors
        .as_deref()
        .map(strip_markup)
        .map(|names| {
            names
                .split([',', ';'])
                .flat_map(|part| part.split(" and "))
                .filter_map(|name| clean_text(Some(name)))
                .collect()
        })
        .unwrap_or_default();

    let venue = section.venue.as_deref().map(strip_markup).and_then(|v| clean_text(Some(&v)));
    let year = section
        .year
        .as_deref()
        .or(venue.as_deref())
        .and_then(|text| YEAR_RE.find(text))
        .map(|m| m.as_str().to_string());

    let summary = strip_markup(&section.summary.join(" "));
    let source_id = link
        .clone()
        .unwrap_or_else(|| format!("conference-{}", section.number));

    Some(
        Paper::new(title, source_id)
            .with_abstract(clean_text(Some(&summary)))
            .with_published_date(year)
            .with_authors(authors)
            .with_link(link)
            .with_venue(venue),
    )
}

fn first_url(text: &str) -> Option<String> {
    URL_RE.find(text).map(|m| trim_url(m.as_str()))
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches(['.', ',', ';', ':', '*', '_']).to_string()
}

/// Drops emphasis markers, markdown links (keeping their text) and quotes.
fn strip_markup(text: &str) -> String {
    let mut out = text.replace("**", "").replace("__", "");
    while let (Some(open), Some(mid)) = (out.find('['), out.find("](")) {
        let Some(close) = out[mid..].find(')').map(|i| mid + i) else {
            break;
        };
        if open >= mid {
            break;
        }
        let label = out[open + 1..mid].to_string();
        out.replace_range(open..=close, &label);
    }
    out.trim()
        .trim_matches(|c: char| c == '"' || c == '*' || c == '_' || c == '\u{201c}' || c == '\u{201d}')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "Here are recent papers on retrieval augmented generation:

1. **Title:** Self-RAG: Learning to Retrieve, Generate, and Critique
   - **Authors:** Akari Asai, Zeqiu Wu, Yizhong Wang and Avirup Sil
   - **Conference:** ICLR 2024
   - **Abstract:** Introduces reflection tokens that let a model decide
     when to retrieve.
   - **URL:** https://openreview.net/forum?id=hSyW5go0v8.

2. **Corrective Retrieval Augmented Generation**
   - Authors: Shi-Qi Yan, Jia-Chen Gu
   - Venue: ACL Findings 2024
   - Summary: Adds a lightweight retrieval evaluator.

3. Title:
   - Authors: Nobody

Sources were gathered from the web.";

    #[test]
    fn extracts_numbered_sections() {
        let citations = vec![
            "https://grounding.example/1".to_string(),
            "https://grounding.example/2".to_string(),
        ];
        let papers = extract_papers(REPORT, &citations);
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.title, "Self-RAG: Learning to Retrieve, Generate, and Critique");
        assert_eq!(
            first.authors,
            vec!["Akari Asai", "Zeqiu Wu", "Yizhong Wang", "Avirup Sil"]
        );
        assert_eq!(first.venue.as_deref(), Some("ICLR 2024"));
        assert_eq!(first.published_date.as_deref(), Some("2024"));
        assert_eq!(
            first.abstract_text.as_deref(),
            Some("Introduces reflection tokens that let a model decide when to retrieve.")
        );
        assert_eq!(first.link.as_deref(), Some("https://openreview.net/forum?id=hSyW5go0v8"));

        let second = &papers[1];
        assert_eq!(second.title, "Corrective Retrieval Augmented Generation");
        assert_eq!(second.authors, vec!["Shi-Qi Yan", "Jia-Chen Gu"]);
        assert_eq!(second.link.as_deref(), Some("https://grounding.example/2"));
        assert_eq!(second.source_id, "https://grounding.example/2");
    }

    #[test]
    fn caps_extraction_at_ten_sections() {
        let report: String = (1..=14)
            .map(|n| format!("{n}. **Paper number {n}**\n   - Conference: NeurIPS 2023\n"))
            .collect();
        let papers = extract_papers(&report, &[]);
        assert_eq!(papers.len(), MAX_EXTRACTED);
        assert_eq!(papers[9].title, "Paper number 10");
        assert_eq!(papers[0].source_id, "conference-1");
    }

    #[test]
    fn unstructured_text_yields_no_papers() {
        assert!(extract_papers("I could not find any matching papers.", &[]).is_empty());
    }

    #[test]
    fn strips_markdown_links_and_emphasis() {
        assert_eq!(
            strip_markup("**[Attention Is All You Need](https://arxiv.org/abs/1706.03762)**"),
            "Attention Is All You Need"
        );
        assert_eq!(strip_markup("\"Quoted title\""), "Quoted title");
    }

    #[test]
    fn prompt_mentions_scope() {
        let filters = ConferenceFilters {
            conferences: vec!["NeurIPS".into(), " ".into(), "ICML".into()],
            year: Some(2024),
        };
        let prompt = build_prompt("diffusion models", &filters, 5);
        assert!(prompt.contains("up to 5"));
        assert!(prompt.contains("\"diffusion models\" presented at NeurIPS, ICML in 2024."));
    }
}
