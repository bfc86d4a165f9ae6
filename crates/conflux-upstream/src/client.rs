use std::borrow::Cow;

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService, ServiceExt as _};
use rmcp::transport::TokioChildProcess;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use url::Url;

use crate::error::UpstreamError;
use crate::registry::ResolvedConnection;

/// Tool as advertised by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Raw outcome of a backend tool call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteCallResult {
    pub structured: Option<Value>,
    /// Content blocks in their MCP wire shape
    pub content: Vec<Value>,
    pub is_error: bool,
}

impl RemoteCallResult {
    /// Result made of plain text content blocks
    pub fn text<I, S>(blocks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            content: blocks
                .into_iter()
                .map(|text| serde_json::json!({ "type": "text", "text": text.into() }))
                .collect(),
            ..Self::default()
        }
    }
}

/// Opens sessions to backends
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        backend: &str,
        connection: &ResolvedConnection,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError>;
}

/// One open MCP session with a backend
#[async_trait]
pub trait UpstreamSession: Send {
    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, UpstreamError>;

    async fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> Result<RemoteCallResult, UpstreamError>;

    /// Tear the session down; stdio sessions terminate their child here
    async fn close(self: Box<Self>);
}

/// Connector speaking MCP through rmcp transports
#[derive(Debug, Clone, Default)]
pub struct RmcpConnector {
    http: reqwest::Client,
}

impl RmcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect_stdio(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        working_directory: Option<&std::path::Path>,
    ) -> Result<RunningService<RoleClient, ()>, UpstreamError> {
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args).envs(env);
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| UpstreamError::Transport(format!("failed to spawn process: {e}")))?;

        ().serve(transport)
            .await
            .map_err(|e| UpstreamError::Transport(format!("STDIO handshake failed: {e}")))
    }

    async fn connect_http(
        &self,
        url: &Url,
        auth_token: Option<&SecretString>,
    ) -> Result<RunningService<RoleClient, ()>, UpstreamError> {
        use rmcp::transport::StreamableHttpClientTransport;
        use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;

        let mut transport_config = StreamableHttpClientTransportConfig::with_uri(url.as_str());

        // The transport adds the bearer scheme itself
        if let Some(token) = auth_token {
            transport_config = transport_config.auth_header(token.expose_secret().to_owned());
        }

        let transport = StreamableHttpClientTransport::with_client(self.http.clone(), transport_config);

        ().serve(transport)
            .await
            .map_err(|e| UpstreamError::Transport(format!("StreamableHTTP handshake failed: {e}")))
    }
}

#[async_trait]
impl Connector for RmcpConnector {
    async fn connect(
        &self,
        backend: &str,
        connection: &ResolvedConnection,
    ) -> Result<Box<dyn UpstreamSession>, UpstreamError> {
        let service = match connection {
            ResolvedConnection::Http { url, auth_token } => self.connect_http(url, auth_token.as_ref()).await?,
            ResolvedConnection::Stdio {
                command,
                args,
                env,
                working_directory,
            } => Self::connect_stdio(command, args, env, working_directory.as_deref()).await?,
        };

        tracing::debug!(server = backend, transport = connection.transport(), "opened upstream session");

        Ok(Box::new(RmcpSession {
            service,
            server_name: backend.to_owned(),
        }))
    }
}

struct RmcpSession {
    service: RunningService<RoleClient, ()>,
    server_name: String,
}

#[async_trait]
impl UpstreamSession for RmcpSession {
    async fn list_tools(&mut self) -> Result<Vec<RemoteTool>, UpstreamError> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|e| UpstreamError::Transport(format!("list_tools failed on {}: {e}", self.server_name)))?;

        Ok(tools
            .into_iter()
            .map(|tool| RemoteTool {
                name: tool.name.into_owned(),
                description: tool.description.map(Cow::into_owned),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(&mut self, name: &str, arguments: Map<String, Value>) -> Result<RemoteCallResult, UpstreamError> {
        let result = self
            .service
            .call_tool(CallToolRequestParam {
                name: Cow::Owned(name.to_owned()),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| UpstreamError::Transport(format!("call_tool '{name}' failed on {}: {e}", self.server_name)))?;

        let content = result
            .content
            .iter()
            .filter_map(|block| serde_json::to_value(block).ok())
            .collect();

        Ok(RemoteCallResult {
            structured: result.structured_content,
            content,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn close(self: Box<Self>) {
        let Self { service, server_name } = *self;
        if let Err(e) = service.cancel().await {
            tracing::debug!(server = %server_name, error = %e, "upstream session did not shut down cleanly");
        }
    }
}
