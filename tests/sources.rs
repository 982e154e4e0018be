use std::sync::Arc;
use std::time::Duration;

use deep_paper::http::SourceHttp;
use deep_paper::sources::{
    ArxivClient, BraveClient, ConferenceClient, CoreClient, JstageClient, SemanticScholarClient,
};
use deep_paper::{
    GeminiClient, RateGate, RateKey, RateLimiter, SearchError, SearchTool, SourceKind, Tool,
    UrlCollector,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARXIV_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/">
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2401.00001v2</id>
    <published>2024-01-02T10:00:00Z</published>
    <title>Sparse Transformers at Scale</title>
    <summary>Routing tokens to a few experts.</summary>
    <author><name>Ada Park</name></author>
    <link href="http://arxiv.org/abs/2401.00001v2" rel="alternate" type="text/html"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2401.00002v1</id>
    <title>Mixture of Depths</title>
    <published>2024-01-03T10:00:00Z</published>
  </entry>
</feed>"#;

fn http(source: SourceKind) -> SourceHttp {
    SourceHttp::new(source, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn arxiv_collects_pdf_links_and_rejects_second_call_in_cooldown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .and(query_param("search_query", "cat:cs.LG AND all:sparse transformers"))
        .and(query_param("max_results", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARXIV_FEED))
        .expect(1)
        .mount(&server)
        .await;

    let limiter = Arc::new(RateLimiter::with_defaults());
    let collector = UrlCollector::new();
    let client = ArxivClient::new(
        http(SourceKind::Arxiv),
        RateGate::new(limiter, RateKey::global(SourceKind::Arxiv)),
    )
    .with_base_url(format!("{}/api/query", server.uri()));
    let tool = SearchTool::new(client, collector.clone());

    let output = tool
        .call(json!({"query": "sparse transformers", "maxResults": 5, "category": "cs.LG"}))
        .await
        .unwrap();
    assert_eq!(output["totalResults"], 2);
    assert_eq!(output["papers"][0]["title"], "Sparse Transformers at Scale");
    assert_eq!(output["papers"][0]["sourceId"], "2401.00001v2");
    assert_eq!(output["papers"][0]["publishedDate"], "2024-01-02");
    assert!(output["papers"][0]["link"].is_null());

    let urls: Vec<String> = collector.entries().into_iter().map(|e| e.url).collect();
    assert_eq!(
        urls,
        vec![
            "http://arxiv.org/pdf/2401.00001v2.pdf",
            "http://arxiv.org/pdf/2401.00002v1.pdf"
        ]
    );

    let err = tool.call(json!({"query": "sparse transformers"})).await.unwrap_err();
    match err {
        SearchError::RateLimited {
            origin,
            retry_after_ms,
        } => {
            assert_eq!(origin, SourceKind::Arxiv);
            assert!(retry_after_ms > 0 && retry_after_ms <= 30_000);
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert_eq!(collector.len(), 2);
}

#[tokio::test]
async fn semantic_scholar_sends_key_and_skips_broken_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graph/v1/paper/search"))
        .and(header("x-api-key", "s2-secret"))
        .and(query_param("limit", "3"))
        .and(query_param("year", "2020-2023"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 57,
            "offset": 0,
            "data": [
                {
                    "paperId": "abc123",
                    "title": "Graph Neural Networks for Chemistry",
                    "abstract": "Message passing on molecules.",
                    "year": 2021,
                    "venue": "ICML",
                    "authors": [{"authorId": "1", "name": "Rui Chen"}],
                    "citationCount": 42,
                    "externalIds": {"DOI": "10.5555/gnn.2021"},
                    "url": "https://www.semanticscholar.org/paper/abc123",
                    "publicationDate": null,
                    "openAccessPdf": null
                },
                {"paperId": "def456", "title": "Broken", "authors": "not a list"},
                {"paperId": "ghi789", "title": null}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let collector = UrlCollector::new();
    let client = SemanticScholarClient::new(
        http(SourceKind::SemanticScholar),
        RateGate::open(SourceKind::SemanticScholar),
    )
    .with_base_url(server.uri())
    .with_api_key(Some("s2-secret".into()));
    let tool = SearchTool::new(client, collector.clone()).with_links(true);

    let output = tool
        .call(json!({"query": "gnn chemistry", "maxResults": 3, "year": "2020-2023"}))
        .await
        .unwrap();

    assert_eq!(output["totalResults"], 57);
    assert_eq!(output["papers"].as_array().unwrap().len(), 1);
    let paper = &output["papers"][0];
    assert_eq!(paper["sourceId"], "10.5555/gnn.2021");
    assert_eq!(paper["publishedDate"], "2021");
    assert_eq!(paper["citationCount"], 42);
    assert_eq!(paper["link"], "https://www.semanticscholar.org/paper/abc123");
    assert_eq!(collector.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn semantic_scholar_second_call_waits_out_cooldown() {
    // The base URL cannot be parsed, so each call fails right after the gate
    // without touching the network and only the cooldown consumes time.
    let limiter = Arc::new(RateLimiter::with_defaults());
    let client = SemanticScholarClient::new(
        http(SourceKind::SemanticScholar),
        RateGate::new(limiter, RateKey::global(SourceKind::SemanticScholar)),
    )
    .with_base_url("not a url");
    let tool = SearchTool::new(client, UrlCollector::new());

    let start = tokio::time::Instant::now();
    let first = tool.call(json!({"query": "gnn"})).await.unwrap_err();
    assert_eq!(first.kind(), "transport");
    assert!(start.elapsed() < Duration::from_millis(10));

    let second = tool.call(json!({"query": "gnn"})).await.unwrap_err();
    assert_eq!(second.kind(), "transport");
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(1_000), "waited {waited:?}");
    assert!(waited < Duration::from_millis(1_100), "waited {waited:?}");
}

#[tokio::test]
async fn brave_sends_subscription_token_and_freshness_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/res/v1/web/search"))
        .and(header("accept", "application/json"))
        .and(header("x-subscription-token", "brave-key"))
        .and(query_param("q", "state space models"))
        .and(query_param("count", "4"))
        .and(query_param("freshness", "pw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "search",
            "web": {
                "results": [{
                    "title": "Mamba explained",
                    "url": "https://example.org/mamba",
                    "description": "A <strong>selective</strong> state space model.",
                    "page_age": "2024-02-10T08:00:00",
                    "profile": {"name": "Example Blog"}
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let collector = UrlCollector::new();
    let client = BraveClient::new(
        http(SourceKind::Brave),
        RateGate::open(SourceKind::Brave),
        Some("brave-key".into()),
    )
    .with_base_url(server.uri());
    let tool = SearchTool::new(client, collector.clone()).with_links(true);

    let output = tool
        .call(json!({"query": "state space models", "maxResults": 4, "freshness": "week"}))
        .await
        .unwrap();
    assert_eq!(output["totalResults"], 1);
    let paper = &output["papers"][0];
    assert_eq!(paper["title"], "Mamba explained");
    assert_eq!(paper["sourceId"], "https://example.org/mamba");
    assert_eq!(paper["link"], "https://example.org/mamba");
    assert_eq!(paper["abstract"], "A selective state space model.");
    assert_eq!(paper["publishedDate"], "2024-02-10");
    assert_eq!(collector.entries()[0].source, SourceKind::Brave);
}

#[tokio::test]
async fn core_without_key_fails_before_any_request() {
    let server = MockServer::start().await;
    let client = CoreClient::new(
        http(SourceKind::Core),
        RateGate::open(SourceKind::Core),
        None,
    )
    .with_base_url(server.uri());
    let tool = SearchTool::new(client, UrlCollector::new());

    let err = tool.call(json!({"query": "open science"})).await.unwrap_err();
    assert_eq!(err.kind(), "configuration");
    assert!(err.to_string().contains("CORE_API_KEY"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn core_upstream_failure_keeps_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/works"))
        .and(header("authorization", "Bearer core-key"))
        .and(query_param("q", "(open science) AND yearPublished>=2019"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance window"))
        .mount(&server)
        .await;

    let client = CoreClient::new(
        http(SourceKind::Core),
        RateGate::open(SourceKind::Core),
        Some("core-key".into()),
    )
    .with_base_url(server.uri());
    let tool = SearchTool::new(client, UrlCollector::new());

    let err = tool
        .call(json!({"query": "open science", "yearFrom": 2019}))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SearchError::UpstreamHttp {
            origin: SourceKind::Core,
            status: 503,
            body: "maintenance window".into(),
        }
    );
}

#[tokio::test]
async fn core_empty_result_set_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalHits": 0,
            "limit": 10,
            "offset": 0,
            "results": []
        })))
        .mount(&server)
        .await;

    let collector = UrlCollector::new();
    let client = CoreClient::new(
        http(SourceKind::Core),
        RateGate::open(SourceKind::Core),
        Some("core-key".into()),
    )
    .with_base_url(server.uri());
    let tool = SearchTool::new(client, collector.clone());

    let output = tool.call(json!({"query": "nothing matches"})).await.unwrap();
    assert_eq!(output, json!({"papers": [], "totalResults": 0}));
    assert!(collector.is_empty());
}

#[tokio::test]
async fn jstage_reads_rss_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/searchapi/do"))
        .and(query_param("service", "3"))
        .and(query_param("keyword", "liquefaction"))
        .and(query_param("pubyearfrom", "2020"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:prism="http://prismstandard.org/namespaces/basic/2.0/">
  <channel>
    <item>
      <title>Soil liquefaction mapping</title>
      <link>https://www.jstage.jst.go.jp/article/jgs/1/2/1_2/_article</link>
      <dc:creator>Ichiro Suzuki</dc:creator>
      <prism:publicationDate>2021-07-15</prism:publicationDate>
    </item>
  </channel>
</rss>"#,
        ))
        .mount(&server)
        .await;

    let collector = UrlCollector::new();
    let client = JstageClient::new(http(SourceKind::Jstage), RateGate::open(SourceKind::Jstage))
        .with_base_url(format!("{}/searchapi/do", server.uri()));
    let tool = SearchTool::new(client, collector.clone());

    let output = tool
        .call(json!({"query": "liquefaction", "yearFrom": 2020}))
        .await
        .unwrap();
    assert_eq!(output["papers"][0]["title"], "Soil liquefaction mapping");
    assert_eq!(output["papers"][0]["authors"], json!(["Ichiro Suzuki"]));
    assert_eq!(
        collector.entries()[0].url,
        "https://www.jstage.jst.go.jp/article/jgs/1/2/1_2/_article"
    );
    assert_eq!(collector.entries()[0].source, SourceKind::Jstage);
}

#[tokio::test]
async fn conference_search_extracts_papers_from_grounded_report() {
    let report = "1. **Title:** Sparse Mixture Routing\n   \
                  - **Authors:** Ana Lee, Ben Kim\n   \
                  - **Conference:** ICML 2024\n   \
                  - **Abstract:** Routing tokens sparsely.\n   \
                  - **URL:** https://proceedings.mlr.press/v235/lee24a.html\n\
                  2. **Title:** Adaptive Experts\n   \
                  - **Authors:** Chen Wu\n   \
                  - **Conference:** NeurIPS 2024\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "gem-key"))
        .and(body_partial_json(json!({"tools": [{"google_search": {}}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": report}]},
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://icml.cc/virtual/2024/poster/1"}},
                        {"web": {"uri": "https://neurips.cc/virtual/2024/poster/2"}}
                    ]
                }
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiClient::new("gemini-2.5-flash", Some("gem-key".into()))
        .unwrap()
        .with_endpoint(server.uri());
    let collector = UrlCollector::new();
    let tool = SearchTool::new(
        ConferenceClient::new(model, RateGate::open(SourceKind::Conference)),
        collector.clone(),
    )
    .with_links(true);

    let output = tool
        .call(json!({"query": "mixture of experts", "conferences": ["ICML", "NeurIPS"], "year": 2024}))
        .await
        .unwrap();

    assert_eq!(output["report"], report);
    assert_eq!(output["citations"].as_array().unwrap().len(), 2);
    let papers = output["papers"].as_array().unwrap();
    assert_eq!(papers.len(), 2);
    assert_eq!(papers[0]["authors"], json!(["Ana Lee", "Ben Kim"]));
    assert_eq!(
        papers[0]["link"],
        "https://proceedings.mlr.press/v235/lee24a.html"
    );
    assert_eq!(papers[1]["link"], "https://neurips.cc/virtual/2024/poster/2");
    assert_eq!(papers[1]["publishedDate"], "2024");
    assert_eq!(collector.len(), 2);
}

#[tokio::test]
async fn conference_upstream_failure_is_reported_against_source() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
        .mount(&server)
        .await;

    let model = GeminiClient::new("gemini-2.5-flash", Some("gem-key".into()))
        .unwrap()
        .with_endpoint(server.uri());
    let tool = SearchTool::new(
        ConferenceClient::new(model, RateGate::open(SourceKind::Conference)),
        UrlCollector::new(),
    );

    let err = tool.call(json!({"query": "anything"})).await.unwrap_err();
    assert_eq!(
        err,
        SearchError::UpstreamHttp {
            origin: SourceKind::Conference,
            status: 429,
            body: "quota".into(),
        }
    );
}

#[tokio::test]
async fn collector_keeps_order_across_sources() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ARXIV_FEED))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/works"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalHits": 1,
            "results": [{
                "id": 9911,
                "title": "Open Access Repositories",
                "authors": [{"name": "Dana Ruiz"}],
                "yearPublished": 2019,
                "links": [{"type": "display", "url": "https://core.ac.uk/display/9911"}]
            }]
        })))
        .mount(&server)
        .await;

    let collector = UrlCollector::new();
    let limiter = Arc::new(RateLimiter::new());
    let arxiv = SearchTool::new(
        ArxivClient::new(
            http(SourceKind::Arxiv),
            RateGate::new(Arc::clone(&limiter), RateKey::global(SourceKind::Arxiv)),
        )
        .with_base_url(format!("{}/api/query", server.uri())),
        collector.clone(),
    );
    let core = SearchTool::new(
        CoreClient::new(
            http(SourceKind::Core),
            RateGate::new(limiter, RateKey::global(SourceKind::Core)),
            Some("core-key".into()),
        )
        .with_base_url(server.uri()),
        collector.clone(),
    );

    core.call(json!({"query": "repositories"})).await.unwrap();
    arxiv.call(json!({"query": "sparse"})).await.unwrap();

    let entries = collector.entries();
    let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["9911", "2401.00001v2", "2401.00002v1"]);
    assert_eq!(entries[0].url, "https://core.ac.uk/display/9911");
    assert_eq!(entries[0].source, SourceKind::Core);
}
