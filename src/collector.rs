use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::paper::{Paper, SourceKind};

/// One addressable source link discovered by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedUrl {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: SourceKind,
}

/// Append-only log of links found during a session, kept apart from what the
/// agent sees so the UI can show verifiable sources.
///
/// Clones share the same log. Entries stay until [`UrlCollector::reset`].
#[derive(Debug, Default, Clone)]
pub struct UrlCollector {
    entries: Arc<Mutex<Vec<CollectedUrl>>>,
}

impl UrlCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: CollectedUrl) {
        self.lock().push(entry);
    }

    /// Records every paper that carries a link, in result order. Returns the
    /// number of entries added.
    pub fn record_papers(&self, source: SourceKind, papers: &[Paper]) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.extend(papers.iter().filter_map(|paper| {
            paper.link.as_ref().map(|url| CollectedUrl {
                id: paper.source_id.clone(),
                title: paper.title.clone(),
                url: url.clone(),
                source,
            })
        }));
        entries.len() - before
    }

    pub fn entries(&self) -> Vec<CollectedUrl> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clears the log and returns what it held.
    pub fn reset(&self) -> Vec<CollectedUrl> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CollectedUrl>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, link: Option<&str>) -> Paper {
        Paper::new(format!("Paper {id}"), id).with_link(link.map(String::from))
    }

    #[test]
    fn keeps_discovery_order_across_sources() {
        let collector = UrlCollector::new();
        collector.record_papers(
            SourceKind::Arxiv,
            &[paper("a", Some("https://arxiv.org/pdf/a.pdf"))],
        );
        collector.record_papers(
            SourceKind::Core,
            &[
                paper("b", Some("https://core.ac.uk/download/b.pdf")),
                paper("c", Some("https://doi.org/c")),
            ],
        );

        let ids: Vec<_> = collector.entries().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(collector.entries()[1].source, SourceKind::Core);
    }

    #[test]
    fn papers_without_links_are_not_collected() {
        let collector = UrlCollector::new();
        let added = collector.record_papers(
            SourceKind::SemanticScholar,
            &[paper("a", None), paper("b", Some("https://example.org/b"))],
        );
        assert_eq!(added, 1);
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn clones_share_state_until_reset() {
        let collector = UrlCollector::new();
        let handle = collector.clone();
        handle.push(CollectedUrl {
            id: "x".into(),
            title: "X".into(),
            url: "https://example.org/x".into(),
            source: SourceKind::Brave,
        });
        assert_eq!(collector.len(), 1);

        let drained = collector.reset();
        assert_eq!(drained.len(), 1);
        assert!(handle.is_empty());
    }
}
