#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod client;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod supervisor;
pub mod token;
pub mod tracking;

#[cfg(test)]
mod testing;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use conflux_config::{BackendConfig, BackendKind, Config};
use conflux_core::CallContext;
use serde::Serialize;
use serde_json::{Map, Value};

pub use client::{Connector, RmcpConnector};
pub use error::UpstreamError;
pub use router::upstream_router;

use discovery::Discovery;
use dispatch::CallRouter;
use proxy::{ToolProxy, ToolRegistry, ToolSummary};
use registry::Registry;
use supervisor::{ProcessStatus, StartOutcome, Supervisor};
use tracking::TrackingStore;

/// Outcome of a refresh pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    /// Startup result of every service that was not yet running
    pub services: HashMap<String, StartOutcome>,
    /// Tool count per successfully discovered backend
    pub discovered: BTreeMap<String, usize>,
    /// Discovery error per failed backend
    pub failed: BTreeMap<String, String>,
}

/// Registry entry with its runtime state
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub summary: String,
    pub has_auth: bool,
    /// Whether a discovery succeeded and calls can be routed
    pub connected: bool,
    pub tool_count: usize,
    /// Process state, for service backends only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessStatus>,
}

/// Shared upstream aggregation state
///
/// Owns the backend registry, the service supervisor, the discovery cache,
/// the registered tool proxies and the request tracking store.
pub struct UpstreamState {
    registry: Registry,
    supervisor: Arc<Supervisor>,
    discovery: Arc<Discovery>,
    tools: ToolRegistry,
    tracking: Arc<TrackingStore>,
    router: Arc<CallRouter>,
}

impl UpstreamState {
    /// Build the state from configuration, talking MCP through rmcp
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        Self::with_connector(config, Arc::new(RmcpConnector::new()))
    }

    /// Build the state with a custom transport
    pub fn with_connector(config: &Config, connector: Arc<dyn Connector>) -> Result<Self, UpstreamError> {
        let registry = Registry::from_config(&config.upstream)?;
        let discovery = Arc::new(Discovery::new(Arc::clone(&connector)));
        let tracking = Arc::new(TrackingStore::new(&config.tracking));
        let router = Arc::new(CallRouter::new(
            Arc::clone(&discovery),
            Arc::clone(&tracking),
            connector,
        ));

        Ok(Self {
            registry,
            supervisor: Arc::new(Supervisor::new(config.supervisor.clone())),
            discovery,
            tools: ToolRegistry::new(),
            tracking,
            router,
        })
    }

    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn tracking(&self) -> &TrackingStore {
        &self.tracking
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Register a backend, then refresh so its tools become callable
    pub async fn add_server(&self, name: &str, config: BackendConfig) -> Result<RefreshReport, UpstreamError> {
        self.registry.add(name, config).await?;
        Ok(self.refresh().await)
    }

    /// Remove a backend with its process, cache and proxies
    ///
    /// Removing an unknown name is a no-op and returns `false`.
    pub async fn remove_server(&self, name: &str) -> bool {
        let removed = self.registry.remove(name).await;

        if removed == Some(BackendKind::Service) {
            self.supervisor.stop(name).await;
        }
        self.discovery.forget(name).await;
        let proxies = self.tools.remove_backend(name).await;

        if removed.is_some() {
            tracing::info!(server = name, proxies, "removed server and its tools");
        }
        removed.is_some()
    }

    /// Start pending services, then discover every backend
    ///
    /// A failing backend is logged and reported without affecting the rest.
    pub async fn refresh(&self) -> RefreshReport {
        let services = self.supervisor.start_all(self.registry.service_backends().await).await;

        let names = self.registry.names().await;
        let results =
            futures_util::future::join_all(names.iter().map(|name| self.discover_backend(name))).await;

        let mut report = RefreshReport {
            services,
            ..RefreshReport::default()
        };

        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(count) => {
                    report.discovered.insert(name, count);
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to discover tools, skipping");
                    report.failed.insert(name, e.to_string());
                }
            }
        }

        let tool_total = self.tools.len().await;
        tracing::info!(
            discovered = report.discovered.len(),
            failed = report.failed.len(),
            tools = tool_total,
            "refreshed upstream tools"
        );

        report
    }

    async fn discover_backend(&self, name: &str) -> Result<usize, UpstreamError> {
        let tools = self.discovery.discover(&self.registry, name).await?;

        let proxies = tools
            .iter()
            .map(|tool| ToolProxy::build(name, tool, Arc::clone(&self.router)))
            .collect::<Result<Vec<_>, _>>()?;

        let count = proxies.len();
        self.tools.replace_backend(name, proxies).await;

        // A removal that raced this discovery has already cleared the
        // backend's proxies, so clear what was registered after it
        if !self.registry.contains(name).await {
            self.tools.remove_backend(name).await;
            self.discovery.forget(name).await;
            return Err(UpstreamError::unknown_server(name));
        }

        Ok(count)
    }

    pub async fn list_servers(&self) -> Vec<ServerInfo> {
        let mut servers = Vec::new();

        for backend in self.registry.list_all().await {
            let process = if backend.kind == BackendKind::Service {
                Some(self.supervisor.status(&backend.name).await)
            } else {
                None
            };

            servers.push(ServerInfo {
                connected: self.discovery.active_connection(&backend.name).await.is_some(),
                tool_count: self.discovery.tool_count(&backend.name).await,
                process,
                name: backend.name,
                kind: backend.kind,
                summary: backend.summary,
                has_auth: backend.has_auth,
            });
        }

        servers
    }

    pub async fn list_tools(&self, server: Option<&str>) -> Vec<ToolSummary> {
        self.tools
            .list(server)
            .await
            .iter()
            .map(|proxy| proxy.summary())
            .collect()
    }

    /// Call a registered tool, keeping the typed result
    pub async fn call_tool(
        &self,
        exposed_name: &str,
        arguments: Map<String, Value>,
        context: &CallContext,
    ) -> Result<Option<Value>, UpstreamError> {
        self.proxy(exposed_name).await?.call(arguments, context).await
    }

    /// Call a registered tool and render the outcome as text
    ///
    /// Only an unknown tool name is an error; call failures are rendered.
    pub async fn invoke_tool(
        &self,
        exposed_name: &str,
        arguments: Map<String, Value>,
        context: &CallContext,
    ) -> Result<String, UpstreamError> {
        Ok(self.proxy(exposed_name).await?.invoke(arguments, context).await)
    }

    /// Stop every service process
    pub async fn shutdown(&self) {
        tracing::info!("stopping upstream services");
        self.supervisor.stop_all().await;
    }

    async fn proxy(&self, exposed_name: &str) -> Result<Arc<ToolProxy>, UpstreamError> {
        self.tools
            .get(exposed_name)
            .await
            .ok_or_else(|| UpstreamError::ToolNotFound {
                tool: exposed_name.to_owned(),
            })
    }
}
