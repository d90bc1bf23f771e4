//! Tracing setup for the batch binary

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Builds the filter: `RUST_LOG` first, then the configured level
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn init_tracing(log_level: &str, format: LogFormat) -> anyhow::Result<()> {
    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer().with_target(true)), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json().with_current_span(true))),
    };

    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(text)
        .with(json)
        .try_init()?;
    Ok(())
}
