use conflux_core::HttpError;
use http::StatusCode;
use thiserror::Error;

/// Upstream aggregation errors
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Invalid registry operation: duplicate name or port, unknown backend,
    /// or a call to a backend that was never discovered
    #[error("{0}")]
    Config(String),

    /// Listing tools from a backend failed
    #[error("failed to discover tools from {server}: {reason}")]
    ToolDiscovery { server: String, reason: String },

    /// Invoking a tool on a backend failed
    #[error("tool '{tool}' failed on {server}: {reason}")]
    ToolExecution {
        server: String,
        tool: String,
        reason: String,
    },

    /// No proxy is registered under this exposed name
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// Arguments do not match the tool's input schema
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Connection or protocol failure talking to a backend
    #[error("transport error: {0}")]
    Transport(String),
}

impl UpstreamError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn unknown_server(name: &str) -> Self {
        Self::Config(format!("Unknown server: {name}"))
    }
}

impl HttpError for UpstreamError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::InvalidArguments { .. } => StatusCode::BAD_REQUEST,
            Self::ToolNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ToolDiscovery { .. } | Self::ToolExecution { .. } | Self::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Config(_) => "config_error",
            Self::ToolDiscovery { .. } => "tool_discovery_error",
            Self::ToolExecution { .. } => "tool_execution_error",
            Self::ToolNotFound { .. } => "not_found",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Transport(_) => "transport_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Transport(_) => "failed to communicate with upstream server".to_string(),
            other => other.to_string(),
        }
    }
}
