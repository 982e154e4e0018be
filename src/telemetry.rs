use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, TelemetryConfig};
use crate::error::{DeepPaperError, Result};

pub const DEFAULT_FILTER: &str = "deep_paper=info,tower_http=info";

/// Directive used when `RUST_LOG` is not set.
pub fn default_filter(cfg: &TelemetryConfig) -> EnvFilter {
    let directive = cfg
        .filter
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(cfg: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(cfg));
    let builder = fmt().with_env_filter(filter).with_target(true);
    let installed = match cfg.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
    installed.map_err(|err| DeepPaperError::Config(format!("failed to install tracing subscriber: {err}")))
}
