#![allow(clippy::must_use_candidate)]

mod env;
pub mod health;
mod loader;
pub mod server;
pub mod supervisor;
pub mod telemetry;
pub mod tracking;
pub mod upstream;

use serde::Deserialize;

pub use health::*;
pub use server::*;
pub use supervisor::*;
pub use telemetry::*;
pub use tracking::*;
pub use upstream::*;

/// Top-level Conflux configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream backends to aggregate
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Request tracking store limits
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Service process supervision timings
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
