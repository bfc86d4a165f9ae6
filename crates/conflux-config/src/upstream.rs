use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Upstream backends keyed by name, one table per transport kind
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Remote streamable HTTP endpoints
    #[serde(default)]
    pub http: IndexMap<String, HttpBackend>,
    /// Subprocesses speaking the tool protocol over stdio
    #[serde(default)]
    pub stdio: IndexMap<String, StdioBackend>,
    /// Subprocesses serving HTTP on a local port
    #[serde(default)]
    pub service: IndexMap<String, ServiceBackend>,
}

/// Configuration of a single backend of any kind
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Http(HttpBackend),
    Stdio(StdioBackend),
    Service(ServiceBackend),
}

impl BackendConfig {
    /// Short kind label (`http`, `stdio`, `service`)
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Http(_) => BackendKind::Http,
            Self::Stdio(_) => BackendKind::Stdio,
            Self::Service(_) => BackendKind::Service,
        }
    }
}

/// Backend transport kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Http,
    Stdio,
    Service,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Stdio => "stdio",
            Self::Service => "service",
        })
    }
}

/// Remote HTTP backend
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpBackend {
    /// Endpoint URL
    pub url: Url,
    /// Bearer token, either literal or `$ENV_NAME`
    #[serde(default)]
    pub auth_token: Option<SecretString>,
}

/// Backend spawned as a child process and spoken to over stdio
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StdioBackend {
    /// Command to execute
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory of the child
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
}

/// Backend spawned as a long-running local HTTP service
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceBackend {
    /// Command to execute
    pub command: String,
    /// Command arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Local port the service listens on
    pub port: u16,
    /// Path polled until the service answers
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    /// Seconds to wait for the service to become healthy
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: u64,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory of the child
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Free-form description shown in listings
    #[serde(default)]
    pub description: Option<String>,
}

impl ServiceBackend {
    /// Service with default health path and startup timeout
    pub fn new(command: impl Into<String>, args: Vec<String>, port: u16) -> Self {
        Self {
            command: command.into(),
            args,
            port,
            health_check_path: default_health_check_path(),
            startup_timeout: default_startup_timeout(),
            env: HashMap::new(),
            working_directory: None,
            description: None,
        }
    }

    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout)
    }

    /// URL polled while the service starts
    pub fn health_url(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.health_check_path)
    }
}

fn default_health_check_path() -> String {
    "/mcp".to_string()
}

const fn default_startup_timeout() -> u64 {
    30
}
