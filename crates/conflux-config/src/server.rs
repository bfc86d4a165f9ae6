use std::net::SocketAddr;

use serde::Deserialize;

use crate::health::HealthConfig;

/// Listener used when none is configured
pub const DEFAULT_LISTEN_ADDRESS: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 3050);

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub listen_address: Option<SocketAddr>,
    #[serde(default)]
    pub health: HealthConfig,
}

impl ServerConfig {
    /// Configured listen address, falling back to `127.0.0.1:3050`
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address.unwrap_or(DEFAULT_LISTEN_ADDRESS)
    }
}
