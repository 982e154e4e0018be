use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::{Orchestrator, ResearchAgent};
use crate::collector::UrlCollector;
use crate::config::AppConfig;
use crate::error::{DeepPaperError, Result};
use crate::llm::GeminiClient;
use crate::metrics::MetricsTracker;
use crate::toolkit::{rate_limiter_from_config, research_toolkit};

pub const CHAT_ROUTE: &str = "/api/agents/deep-paper";

const CHANNEL_CAPACITY: usize = 32;

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<dyn Orchestrator>,
    collector: UrlCollector,
    metrics: MetricsTracker,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        collector: UrlCollector,
        metrics: MetricsTracker,
    ) -> Self {
        Self {
            orchestrator,
            collector,
            metrics,
        }
    }

    /// Wires the research agent, its tools and the shared collector.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if cfg.model.provider != "gemini" {
            return Err(DeepPaperError::Config(format!(
                "unsupported model provider `{}`",
                cfg.model.provider
            )));
        }
        let collector = UrlCollector::new();
        let metrics = MetricsTracker::new();
        let limiter = Arc::new(rate_limiter_from_config(&cfg.sources));
        let tools = research_toolkit(cfg, collector.clone(), limiter)?;

        let mut agent = ResearchAgent::new(Arc::new(GeminiClient::from_config(&cfg.model)?))
            .with_tools(tools)
            .with_max_steps(cfg.agent.max_steps)
            .with_metrics(metrics.clone());
        if let Some(instructions) = &cfg.agent.instructions {
            agent = agent.with_instructions(instructions.clone());
        }
        Ok(Self::new(Arc::new(agent), collector, metrics))
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(CHAT_ROUTE, post(chat))
        .route("/api/urls", get(list_urls).delete(clear_urls))
        .route("/api/metrics", get(metrics_summary))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Any origin when the list is empty.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub async fn serve(state: AppState, cfg: &AppConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|err| DeepPaperError::Config(format!("invalid listen address: {err}")))?;
    let app = router(state, &cfg.security.allowed_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "deep-paper listening");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| DeepPaperError::Protocol(format!("server error: {err}")))?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
}

fn frame(payload: Value) -> Event {
    Event::default().data(payload.to_string())
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.into()})),
    )
        .into_response()
}

/// Relays the orchestrator's chunks as SSE frames: `{"chunk"}` repeatedly,
/// then `{"done": true}` or a terminal `{"error"}`.
///
/// The run happens on its own task. When the client goes away the relay stops
/// and the run ends at its next send; requests it already issued upstream are
/// left to finish.
async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return bad_request("message must not be empty");
    }

    let (frames_tx, frames_rx) = mpsc::channel::<Event>(CHANNEL_CAPACITY);
    let orchestrator = Arc::clone(&state.orchestrator);
    let span = info_span!("chat", run_id = %Uuid::new_v4());

    let relay_span = span.clone();
    let relay = async move {
        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let run = tokio::spawn(
            async move { orchestrator.run(&message, chunk_tx).await }.instrument(span),
        );

        while let Some(chunk) = chunk_rx.recv().await {
            if frames_tx.send(frame(json!({"chunk": chunk}))).await.is_err() {
                info!("client disconnected, abandoning relay");
                return;
            }
        }

        let closing = match run.await {
            Ok(Ok(())) => json!({"done": true}),
            Ok(Err(err)) => {
                warn!(error = %err, "chat run failed");
                json!({"error": err.to_string()})
            }
            Err(err) => {
                error!(error = %err, "chat run aborted");
                json!({"error": "internal error"})
            }
        };
        let _ = frames_tx.send(frame(closing)).await;
    };
    tokio::spawn(relay.instrument(relay_span));

    let stream = ReceiverStream::new(frames_rx).map(Ok::<Event, Infallible>);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn list_urls(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.collector.entries())
}

async fn clear_urls(State(state): State<AppState>) -> impl IntoResponse {
    let cleared = state.collector.reset().len();
    Json(json!({"cleared": cleared}))
}

async fn metrics_summary(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.summary())
}
