//! Structural extraction of records from Atom and RSS style feeds.
//!
//! Records are flattened into `(path, name, text)` fields where `name` keeps
//! its namespace prefix as written (`prism:doi`, `dc:creator`). Text of child
//! elements is folded into their parents, CDATA sections are unwrapped and
//! `<link>` attributes are kept separately.

use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::paper::collapse_whitespace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedField {
    /// Slash separated element path below the record element.
    pub path: String,
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedLink {
    pub href: String,
    pub rel: Option<String>,
    pub title: Option<String>,
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedRecord {
    pub fields: Vec<FeedField>,
    pub links: Vec<FeedLink>,
}

impl FeedRecord {
    /// First non-empty field with the given qualified name.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.text.as_str())
    }

    pub fn first_of(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| self.first(name))
    }

    pub fn all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| field.name == name)
            .map(|field| field.text.as_str())
            .collect()
    }

    /// First field whose path ends with `path` (for example `article_title/en`).
    pub fn at(&self, path: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| path_matches(&field.path, path))
            .map(|field| field.text.as_str())
    }

    pub fn all_at(&self, path: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|field| path_matches(&field.path, path))
            .map(|field| field.text.as_str())
            .collect()
    }
}

fn path_matches(field_path: &str, wanted: &str) -> bool {
    field_path == wanted
        || field_path
            .strip_suffix(wanted)
            .is_some_and(|prefix| prefix.ends_with('/'))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub records: Vec<FeedRecord>,
    /// Number of record elements seen, including skipped ones.
    pub found: usize,
    /// Records abandoned because of malformed markup.
    pub skipped: usize,
    /// `opensearch:totalResults` (or any `totalResults`) outside the records.
    pub total_results: Option<u64>,
}

/// Extracts every element named `record_tag` (ignoring its prefix).
///
/// Each record is cut out of the payload by its start and end tags and
/// parsed on its own, so markup errors inside one record drop only that
/// record.
pub fn parse_records(xml: &str, record_tag: &str) -> Feed {
    let spans = record_spans(xml, record_tag);
    let mut feed = Feed {
        found: spans.len(),
        ..Feed::default()
    };

    let mut outer = String::with_capacity(xml.len());
    let mut last = 0;
    for span in &spans {
        outer.push_str(&xml[last..span.start]);
        last = span.end;

        if !span.closed {
            warn!(record_tag, offset = span.start, "record has no closing tag");
            feed.skipped += 1;
            continue;
        }
        match parse_record(&xml[span.start..span.end]) {
            Ok(record) => feed.records.push(record),
            Err(err) => {
                warn!(record_tag, offset = span.start, error = %err, "malformed feed record");
                feed.skipped += 1;
            }
        }
    }
    outer.push_str(&xml[last..]);
    feed.total_results = total_results(&outer);
    feed
}

/// Prefers `<entry>` records and falls back to `<item>` when no entry exists.
pub fn parse_entries_or_items(xml: &str) -> Feed {
    let entries = parse_records(xml, "entry");
    if entries.found > 0 {
        return entries;
    }
    let mut items = parse_records(xml, "item");
    if items.total_results.is_none() {
        items.total_results = entries.total_results;
    }
    items
}

pub fn local_name(qualified: &str) -> &str {
    qualified
        .rsplit_once(':')
        .map(|(_, local)| local)
        .unwrap_or(qualified)
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Byte range of one record element inside the payload.
struct Span {
    start: usize,
    end: usize,
    closed: bool,
}

enum Tag<'a> {
    Open {
        name: &'a str,
        len: usize,
        self_closing: bool,
    },
    Close {
        name: &'a str,
        len: usize,
    },
}

/// Finds `<tag ...>` .. `</tag>` ranges, matching `tag` with or without a
/// prefix. A record still open when the next one starts ends there,
/// unclosed.
fn record_spans(xml: &str, record_tag: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut open: Option<usize> = None;
    let mut cursor = 0;

    while let Some(offset) = xml[cursor..].find('<') {
        let at = cursor + offset;
        let rest = &xml[at..];
        if let Some(len) = opaque_len(rest) {
            cursor = at + len;
            continue;
        }
        match tag_at(rest) {
            Some(Tag::Open {
                name,
                len,
                self_closing,
            }) if local_name(name) == record_tag => {
                if let Some(start) = open.take() {
                    spans.push(Span {
                        start,
                        end: at,
                        closed: false,
                    });
                }
                if self_closing {
                    spans.push(Span {
                        start: at,
                        end: at + len,
                        closed: true,
                    });
                } else {
                    open = Some(at);
                }
                cursor = at + len;
            }
            Some(Tag::Close { name, len }) if local_name(name) == record_tag => {
                if let Some(start) = open.take() {
                    spans.push(Span {
                        start,
                        end: at + len,
                        closed: true,
                    });
                }
                cursor = at + len;
            }
            _ => cursor = at + 1,
        }
    }

    if let Some(start) = open {
        spans.push(Span {
            start,
            end: xml.len(),
            closed: false,
        });
    }
    spans
}

/// Length of a comment or CDATA section starting at `rest`.
fn opaque_len(rest: &str) -> Option<usize> {
    let (terminator, body) = if let Some(body) = rest.strip_prefix("<!--") {
        ("-->", body)
    } else if let Some(body) = rest.strip_prefix("<![CDATA[") {
        ("]]>", body)
    } else {
        return None;
    };
    let skipped = rest.len() - body.len();
    Some(
        body.find(terminator)
            .map_or(rest.len(), |end| skipped + end + terminator.len()),
    )
}

fn tag_at(rest: &str) -> Option<Tag<'_>> {
    let after = rest.get(1..)?;
    let (closing, body) = match after.strip_prefix('/') {
        Some(body) => (true, body),
        None => (false, after),
    };
    let name_len = body
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(body.len());
    let name = &body[..name_len];
    if name.is_empty() || name.starts_with(['?', '!']) {
        return None;
    }

    let close = rest.find('>')?;
    if closing {
        Some(Tag::Close {
            name,
            len: close + 1,
        })
    } else {
        Some(Tag::Open {
            name,
            len: close + 1,
            self_closing: rest[..close].ends_with('/'),
        })
    }
}

fn parse_record(block: &str) -> Result<FeedRecord, String> {
    let mut reader = Reader::from_str(block);
    reader.config_mut().trim_text(true);

    let mut builder = RecordBuilder::default();
    let mut opened = false;
    loop {
        match reader.read_event().map_err(|err| err.to_string())? {
            Event::Start(e) => {
                if opened {
                    builder.open(qualified_name(&e), &e);
                } else {
                    opened = true;
                }
            }
            Event::Empty(e) => {
                if !opened {
                    return Ok(builder.record);
                }
                builder.empty(&e);
            }
            Event::Text(t) => builder.text(&text_lossy(&t)),
            Event::CData(c) => builder.text(&String::from_utf8_lossy(&c.into_inner())),
            Event::End(_) => {
                if builder.depth() == 0 {
                    return Ok(builder.record);
                }
                builder.close();
            }
            Event::Eof => return Err("record ended before its closing tag".into()),
            _ => {}
        }
    }
}

/// `opensearch:totalResults` (or any `totalResults`) in the markup around
/// the records.
fn total_results(outer: &str) -> Option<u64> {
    let mut reader = Reader::from_str(outer);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut text = String::new();
    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Eof) => return None,
            Ok(Event::Start(_)) => text.clear(),
            Ok(Event::Text(t)) => text.push_str(&text_lossy(&t)),
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if local_name(&name) == "totalResults" {
                    return text.trim().parse().ok();
                }
                text.clear();
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, position, "malformed markup around feed records");
                if reader.buffer_position() <= position {
                    return None;
                }
            }
        }
    }
}

fn text_lossy(t: &BytesText<'_>) -> String {
    t.unescape()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(t).into_owned())
}

struct Frame {
    name: String,
    text: String,
}

#[derive(Default)]
struct RecordBuilder {
    stack: Vec<Frame>,
    record: FeedRecord,
}

impl RecordBuilder {
    fn depth(&self) -> usize {
        self.stack.len()
    }

    fn open(&mut self, name: String, e: &BytesStart<'_>) {
        if local_name(&name) == "link" {
            self.capture_link(e);
        }
        self.stack.push(Frame {
            name,
            text: String::new(),
        });
    }

    fn empty(&mut self, e: &BytesStart<'_>) {
        if local_name(&qualified_name(e)) == "link" {
            self.capture_link(e);
        }
    }

    fn text(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            append_spaced(&mut frame.text, text);
        }
    }

    fn close(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let text = collapse_whitespace(&frame.text);
        if text.is_empty() {
            return;
        }
        let mut path: Vec<&str> = self.stack.iter().map(|f| f.name.as_str()).collect();
        path.push(&frame.name);
        let path = path.join("/");

        if let Some(parent) = self.stack.last_mut() {
            append_spaced(&mut parent.text, &text);
        }
        self.record.fields.push(FeedField {
            path,
            name: frame.name,
            text,
        });
    }

    fn capture_link(&mut self, e: &BytesStart<'_>) {
        let mut link = FeedLink::default();
        for attr in e.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
            match key.as_str() {
                "href" => link.href = value,
                "rel" => link.rel = Some(value),
                "title" => link.title = Some(value),
                "type" => link.mime = Some(value),
                _ => {}
            }
        }
        if !link.href.is_empty() {
            self.record.links.push(link);
        }
    }
}

fn append_spaced(target: &mut String, text: &str) {
    if !target.is_empty() && !text.is_empty() {
        target.push(' ');
    }
    target.push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_namespaced_fields_and_cdata() {
        let xml = r#"<?xml version="1.0"?>
<rss xmlns:prism="http://prismstandard.org/namespaces/basic/2.0/" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <item>
      <title><![CDATA[Robust <b>control</b> of drones]]></title>
      <dc:creator>Sato Taro</dc:creator>
      <dc:creator>Suzuki Hanako</dc:creator>
      <prism:publicationDate>2022-04-01</prism:publicationDate>
      <link>https://www.jstage.jst.go.jp/article/x/1/1/1_1/_article</link>
    </item>
  </channel>
</rss>"#;
        let feed = parse_records(xml, "item");
        assert_eq!(feed.records.len(), 1);
        let record = &feed.records[0];
        assert_eq!(record.first("title"), Some("Robust <b>control</b> of drones"));
        assert_eq!(record.all("dc:creator"), vec!["Sato Taro", "Suzuki Hanako"]);
        assert_eq!(record.first("prism:publicationDate"), Some("2022-04-01"));
        assert_eq!(
            record.first("link"),
            Some("https://www.jstage.jst.go.jp/article/x/1/1/1_1/_article")
        );
    }

    #[test]
    fn keeps_link_attributes_and_nested_paths() {
        let xml = r#"<feed><opensearch:totalResults>42</opensearch:totalResults>
<entry>
  <author><name>Ada Lovelace</name></author>
  <article_title><en>Analytical engines</en><ja>解析機関</ja></article_title>
  <link rel="alternate" href="https://arxiv.org/abs/1234.5678v1"/>
  <link title="pdf" rel="related" type="application/pdf" href="https://arxiv.org/pdf/1234.5678v1"/>
</entry></feed>"#;
        let feed = parse_records(xml, "entry");
        assert_eq!(feed.total_results, Some(42));
        let record = &feed.records[0];
        assert_eq!(record.at("author/name"), Some("Ada Lovelace"));
        assert_eq!(record.at("article_title/en"), Some("Analytical engines"));
        assert_eq!(record.links.len(), 2);
        assert_eq!(record.links[1].title.as_deref(), Some("pdf"));
        assert_eq!(record.links[1].mime.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn prefers_entries_over_items() {
        let xml = r#"<root>
  <item><title>From item</title></item>
  <entry><title>From entry</title></entry>
</root>"#;
        let feed = parse_entries_or_items(xml);
        assert_eq!(feed.records.len(), 1);
        assert_eq!(feed.records[0].first("title"), Some("From entry"));

        let only_items = parse_entries_or_items("<rss><item><title>Only</title></item></rss>");
        assert_eq!(only_items.records[0].first("title"), Some("Only"));
    }

    #[test]
    fn unknown_entities_fall_back_to_raw_text() {
        let xml = "<feed><entry><title>Caf&eacute; &amp; bar</title></entry></feed>";
        let feed = parse_records(xml, "entry");
        assert_eq!(feed.records.len(), 1);
        assert!(feed.records[0].first("title").unwrap().contains("Caf"));
    }

    #[test]
    fn unterminated_trailing_record_is_skipped() {
        let xml = "<feed><entry><title>Complete</title></entry><entry><title>Cut";
        let feed = parse_records(xml, "entry");
        assert_eq!(feed.found, 2);
        assert_eq!(feed.records.len(), 1);
        assert_eq!(feed.skipped, 1);
    }

    #[test]
    fn malformed_record_does_not_hide_later_ones() {
        let xml = "<feed><opensearch:totalResults>3</opensearch:totalResults>\
<entry><id>1</id><title>One</title><summary>a < b</entry>\
<entry><id>2</id><title>Two</title></entry>\
<entry><id>3</id><title>Three</title></entry></feed>";
        let feed = parse_records(xml, "entry");
        assert_eq!(feed.found, 3);
        assert_eq!(feed.skipped, 1);
        assert_eq!(feed.total_results, Some(3));
        let titles: Vec<_> = feed.records.iter().filter_map(|r| r.first("title")).collect();
        assert_eq!(titles, vec!["Two", "Three"]);
    }

    #[test]
    fn mismatched_item_markup_is_skipped_alone() {
        let xml = "<rss><channel><title>J-STAGE</title>\
<item><title>One</title></item>\
<item><title>Two</title><dc:creator>Broken</item>\
<item><title>Three</title></item></channel></rss>";
        let feed = parse_records(xml, "item");
        assert_eq!(feed.found, 3);
        assert_eq!(feed.skipped, 1);
        let titles: Vec<_> = feed.records.iter().filter_map(|r| r.first("title")).collect();
        assert_eq!(titles, vec!["One", "Three"]);
    }

    #[test]
    fn record_tags_inside_comments_and_cdata_are_ignored() {
        let xml = "<feed><!-- <entry> --><entry><title><![CDATA[x </entry> y]]></title></entry></feed>";
        let feed = parse_records(xml, "entry");
        assert_eq!(feed.found, 1);
        assert_eq!(feed.records[0].first("title"), Some("x </entry> y"));
    }

    #[test]
    fn empty_feed_yields_no_records() {
        let feed = parse_entries_or_items("<feed><title>Nothing</title></feed>");
        assert!(feed.records.is_empty());
        assert_eq!(feed.found, 0);
    }

    #[test]
    fn local_name_strips_prefix() {
        assert_eq!(local_name("prism:doi"), "doi");
        assert_eq!(local_name("title"), "title");
    }
}
