//! Logging setup for Conflux
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and a fmt
//! layer in either text or JSON form.

use conflux_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Build the filter, preferring `RUST_LOG` over the configured directive
fn build_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer().json().with_current_span(false);
            registry
                .with(fmt_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))
        }
    }
}
