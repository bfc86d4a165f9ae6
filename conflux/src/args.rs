use std::path::PathBuf;

use clap::Parser;

/// Conflux MCP aggregator
#[derive(Debug, Parser)]
#[command(name = "conflux", about = "Aggregates MCP servers behind one set of prefixed tools")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "conflux.toml", env = "CONFLUX_CONFIG")]
    pub config: PathBuf,

    /// Override the listen address
    #[arg(long, env = "CONFLUX_LISTEN")]
    pub listen: Option<std::net::SocketAddr>,
}
