//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins when set; otherwise the
//! configured level is used as the default filter directive.
//!
//! ## Formats
//! - `json`: one JSON object per event, with span context, for log shippers
//! - `text`: human-readable lines for local runs

use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::core::config::LoggingConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn parse(value: &str) -> GatewayResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "" => Ok(LogFormat::Text),
            other => Err(GatewayError::config(format!("unknown log format '{}'", other))),
        }
    }
}

/// Filter built from `RUST_LOG`, falling back to the configured level
pub fn build_filter(config: &LoggingConfig) -> GatewayResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            GatewayError::config(format!("invalid log level '{}': {}", config.level, e))
        }),
    }
}

/// Install the global subscriber; a second call logs a warning and keeps the first
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let filter = build_filter(config)?;
    let format = LogFormat::parse(&config.format)?;

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    if installed.is_err() {
        warn!("Tracing subscriber already initialized, skipping initialization");
        return Ok(());
    }

    info!(level = %config.level, format = ?format, "Structured logging initialized");
    Ok(())
}
