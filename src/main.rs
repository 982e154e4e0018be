use std::env;

use deep_paper::server::{serve, AppState};
use deep_paper::telemetry::init_tracing;
use deep_paper::AppConfig;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "deep-paper.toml";

#[tokio::main]
async fn main() -> deep_paper::Result<()> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("DEEP_PAPER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = AppConfig::load(&path)?;
    init_tracing(&cfg.telemetry)?;
    info!(config = %path, model = %cfg.model.model, "starting deep-paper");

    let state = AppState::from_config(&cfg)?;
    serve(state, &cfg).await
}
