//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;

use conflux_config::{Config, HealthConfig, HttpBackend, ServerConfig, TrackingConfig};

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with minimal defaults
    pub fn new() -> Self {
        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    health: HealthConfig {
                        enabled: true,
                        ..HealthConfig::default()
                    },
                },
                ..Config::default()
            },
        }
    }

    /// Add an HTTP backend; the fake upstream answers for it by name
    pub fn with_http_backend(mut self, name: &str) -> Self {
        self.config.upstream.http.insert(
            name.to_owned(),
            HttpBackend {
                url: format!("http://{name}.upstream.test/mcp").parse().expect("valid URL"),
                auth_token: None,
            },
        );
        self
    }

    /// Bound the request tracking store
    pub fn with_tracking_capacity(mut self, max_size: usize) -> Self {
        self.config.tracking = TrackingConfig {
            max_size,
            ..TrackingConfig::default()
        };
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config
    }
}
