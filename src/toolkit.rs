use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::collector::UrlCollector;
use crate::config::{AppConfig, SourceConfig, SourcesConfig, ToolsConfig};
use crate::error::{DeepPaperError, Result};
use crate::http::SourceHttp;
use crate::llm::GeminiClient;
use crate::paper::SourceKind;
use crate::rate_limit::{CooldownPolicy, CooldownRule, RateGate, RateKey, RateLimiter};
use crate::sources::{
    ArxivClient, BraveClient, ConferenceClient, CoreClient, JstageClient, PaperSource,
    SemanticScholarClient,
};
use crate::tool::{ErrorPolicy, SearchTool, ToolRegistry};

/// Built-in cooldowns with the per-source overrides of `sources` applied.
pub fn rate_limiter_from_config(sources: &SourcesConfig) -> RateLimiter {
    let mut limiter = RateLimiter::with_defaults();
    for source in SourceKind::ALL {
        limiter = match sources.get(source).cooldown_ms {
            None => limiter,
            Some(0) => limiter.without_rule(source),
            Some(millis) => {
                let policy = CooldownRule::default_for(source)
                    .map(|rule| rule.policy)
                    .unwrap_or(CooldownPolicy::Wait);
                let rule = match policy {
                    CooldownPolicy::FailFast => CooldownRule::fail_fast(millis),
                    CooldownPolicy::Wait => CooldownRule::wait(millis),
                };
                limiter.with_rule(source, rule)
            }
        };
    }
    limiter
}

/// Registers one search tool per enabled source.
///
/// Credentials are not checked here: a source without its key is still
/// registered and reports a configuration error when called.
pub fn research_toolkit(
    cfg: &AppConfig,
    collector: UrlCollector,
    limiter: Arc<RateLimiter>,
) -> Result<ToolRegistry> {
    let sources = &cfg.sources;
    let mut registry = ToolRegistry::new();
    let gate = |source| RateGate::new(Arc::clone(&limiter), RateKey::global(source));

    if sources.arxiv.enabled {
        let mut client = ArxivClient::new(
            http_for(SourceKind::Arxiv, &sources.arxiv)?,
            gate(SourceKind::Arxiv),
        );
        if let Some(url) = &sources.arxiv.base_url {
            client = client.with_base_url(url);
        }
        register(&mut registry, client, &cfg.tools, &collector);
    }

    if sources.semantic_scholar.enabled {
        let settings = &sources.semantic_scholar;
        let mut client = SemanticScholarClient::new(
            http_for(SourceKind::SemanticScholar, settings)?,
            gate(SourceKind::SemanticScholar),
        )
        .with_api_key(settings.api_key.clone());
        if let Some(url) = &settings.base_url {
            client = client.with_base_url(url);
        }
        register(&mut registry, client, &cfg.tools, &collector);
    }

    if sources.core.enabled {
        let settings = &sources.core;
        let mut client = CoreClient::new(
            http_for(SourceKind::Core, settings)?,
            gate(SourceKind::Core),
            settings.api_key.clone(),
        );
        if let Some(url) = &settings.base_url {
            client = client.with_base_url(url);
        }
        register(&mut registry, client, &cfg.tools, &collector);
    }

    if sources.jstage.enabled {
        let mut client = JstageClient::new(
            http_for(SourceKind::Jstage, &sources.jstage)?,
            gate(SourceKind::Jstage),
        );
        if let Some(url) = &sources.jstage.base_url {
            client = client.with_base_url(url);
        }
        register(&mut registry, client, &cfg.tools, &collector);
    }

    if sources.conference.enabled {
        let settings = &sources.conference;
        let mut model_cfg = cfg.model.clone();
        model_cfg.timeout_secs = settings.timeout_secs.max(model_cfg.timeout_secs);
        if settings.api_key.is_some() {
            model_cfg.api_key = settings.api_key.clone();
        }
        if settings.base_url.is_some() {
            model_cfg.endpoint = settings.base_url.clone();
        }
        let client = ConferenceClient::new(
            GeminiClient::from_config(&model_cfg)?,
            gate(SourceKind::Conference),
        );
        register(&mut registry, client, &cfg.tools, &collector);
    }

    if sources.brave.enabled {
        let settings = &sources.brave;
        let mut client = BraveClient::new(
            http_for(SourceKind::Brave, settings)?,
            gate(SourceKind::Brave),
            settings.api_key.clone(),
        );
        if let Some(url) = &settings.base_url {
            client = client.with_base_url(url);
        }
        register(&mut registry, client, &cfg.tools, &collector);
    }

    info!(tools = ?registry.names(), "research toolkit ready");
    Ok(registry)
}

fn http_for(source: SourceKind, settings: &SourceConfig) -> Result<SourceHttp> {
    SourceHttp::new(source, Duration::from_secs(settings.timeout_secs.max(1)))
        .map_err(|err| DeepPaperError::Config(err.to_string()))
}

fn register<S: PaperSource + 'static>(
    registry: &mut ToolRegistry,
    source: S,
    tools: &ToolsConfig,
    collector: &UrlCollector,
) {
    let policy = if tools.degrade.iter().any(|name| name == source.tool_name()) {
        ErrorPolicy::Degrade
    } else {
        ErrorPolicy::Propagate
    };
    registry.register(
        SearchTool::new(source, collector.clone())
            .with_policy(policy)
            .with_links(tools.expose_links),
    );
}
