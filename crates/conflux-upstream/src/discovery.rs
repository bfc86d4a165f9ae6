use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::client::{Connector, RemoteTool};
use crate::error::UpstreamError;
use crate::proxy::parse_params;
use crate::registry::{Registry, ResolvedConnection};

/// Description used when a backend omits one
const DEFAULT_DESCRIPTION: &str = "No description";

/// Tool discovered on a backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDescriptor {
    fn from_remote(server: &str, tool: RemoteTool) -> Result<Self, UpstreamError> {
        parse_params(&tool.input_schema).map_err(|reason| UpstreamError::ToolDiscovery {
            server: server.to_owned(),
            reason: format!("tool '{}': {reason}", tool.name),
        })?;

        Ok(Self {
            description: tool
                .description
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
            name: tool.name,
            input_schema: tool.input_schema,
        })
    }
}

/// Outcome of the last successful discovery of a backend
struct Discovered {
    tools: Vec<ToolDescriptor>,
    connection: ResolvedConnection,
}

/// Per-backend tool cache and the connections calls are routed over
///
/// A backend has an active connection only after a successful discovery.
/// Tools and connection are stored together so readers never see one
/// without the other.
pub struct Discovery {
    connector: Arc<dyn Connector>,
    backends: RwLock<HashMap<String, Discovered>>,
}

impl Discovery {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            backends: RwLock::new(HashMap::new()),
        }
    }

    /// List the tools of a backend and cache them
    ///
    /// Nothing is cached unless every step succeeds.
    pub async fn discover(&self, registry: &Registry, name: &str) -> Result<Vec<ToolDescriptor>, UpstreamError> {
        let connection = registry.resolve(name).await.map_err(|e| discovery_error(name, &e))?;

        let mut session = self
            .connector
            .connect(name, &connection)
            .await
            .map_err(|e| discovery_error(name, &e))?;
        let listed = session.list_tools().await;
        session.close().await;

        let tools = listed
            .map_err(|e| discovery_error(name, &e))?
            .into_iter()
            .map(|tool| ToolDescriptor::from_remote(name, tool))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            server = name,
            transport = connection.transport(),
            count = tools.len(),
            "discovered tools"
        );

        self.backends.write().await.insert(
            name.to_owned(),
            Discovered {
                tools: tools.clone(),
                connection,
            },
        );

        Ok(tools)
    }

    /// Connection recorded by the last successful discovery
    pub async fn active_connection(&self, name: &str) -> Option<ResolvedConnection> {
        self.backends.read().await.get(name).map(|d| d.connection.clone())
    }

    pub async fn tools(&self, name: &str) -> Option<Vec<ToolDescriptor>> {
        self.backends.read().await.get(name).map(|d| d.tools.clone())
    }

    pub async fn tool_count(&self, name: &str) -> usize {
        self.backends.read().await.get(name).map_or(0, |d| d.tools.len())
    }

    /// Drop the cache and active connection of a backend
    pub async fn forget(&self, name: &str) {
        self.backends.write().await.remove(name);
    }
}

fn discovery_error(server: &str, cause: &UpstreamError) -> UpstreamError {
    let reason = match cause {
        UpstreamError::ToolDiscovery { reason, .. } => reason.clone(),
        other => other.to_string(),
    };

    UpstreamError::ToolDiscovery {
        server: server.to_owned(),
        reason,
    }
}
