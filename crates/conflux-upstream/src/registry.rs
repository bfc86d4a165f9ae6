use std::collections::HashMap;
use std::path::PathBuf;

use conflux_config::{BackendConfig, BackendKind, HttpBackend, ServiceBackend, StdioBackend, UpstreamConfig};
use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::RwLock;
use url::Url;

use crate::error::UpstreamError;
use crate::token::resolve_token;

/// Connection parameters derived from a backend configuration
///
/// Rebuilt on every discovery pass and never persisted.
#[derive(Debug, Clone)]
pub enum ResolvedConnection {
    /// Streamable HTTP endpoint with optional bearer token
    Http {
        url: Url,
        auth_token: Option<SecretString>,
    },
    /// Child process speaking over stdio
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_directory: Option<PathBuf>,
    },
}

impl ResolvedConnection {
    /// Transport label used in logs
    pub const fn transport(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Stdio { .. } => "stdio",
        }
    }
}

/// One row of the registry listing
#[derive(Debug, Clone, Serialize)]
pub struct BackendSummary {
    pub name: String,
    pub kind: BackendKind,
    /// URL for HTTP backends, command line otherwise
    pub summary: String,
    /// Whether an auth token is configured
    pub has_auth: bool,
}

#[derive(Debug, Default)]
struct Backends {
    http: IndexMap<String, HttpBackend>,
    stdio: IndexMap<String, StdioBackend>,
    service: IndexMap<String, ServiceBackend>,
}

impl Backends {
    fn contains(&self, name: &str) -> bool {
        self.http.contains_key(name) || self.stdio.contains_key(name) || self.service.contains_key(name)
    }

    /// Check the uniqueness invariants and insert; nothing changes on error
    fn insert(&mut self, name: &str, config: BackendConfig) -> Result<(), UpstreamError> {
        if name.trim().is_empty() {
            return Err(UpstreamError::config("Server name must not be empty"));
        }
        if self.contains(name) {
            return Err(UpstreamError::config(format!("Server '{name}' already exists")));
        }

        match config {
            BackendConfig::Http(http) => {
                self.http.insert(name.to_owned(), http);
            }
            BackendConfig::Stdio(stdio) => {
                self.stdio.insert(name.to_owned(), stdio);
            }
            BackendConfig::Service(service) => {
                if let Some((owner, _)) = self.service.iter().find(|(_, s)| s.port == service.port) {
                    return Err(UpstreamError::config(format!(
                        "Port {} is already used by service '{owner}'",
                        service.port
                    )));
                }
                self.service.insert(name.to_owned(), service);
            }
        }

        Ok(())
    }

    fn remove(&mut self, name: &str) -> Option<BackendKind> {
        if self.http.shift_remove(name).is_some() {
            Some(BackendKind::Http)
        } else if self.stdio.shift_remove(name).is_some() {
            Some(BackendKind::Stdio)
        } else if self.service.shift_remove(name).is_some() {
            Some(BackendKind::Service)
        } else {
            None
        }
    }
}

/// Named backend configurations, one map per transport kind
#[derive(Debug, Default)]
pub struct Registry {
    backends: RwLock<Backends>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry holding every backend of the configuration
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let mut backends = Backends::default();

        for (name, http) in &config.http {
            backends.insert(name, BackendConfig::Http(http.clone()))?;
        }
        for (name, stdio) in &config.stdio {
            backends.insert(name, BackendConfig::Stdio(stdio.clone()))?;
        }
        for (name, service) in &config.service {
            backends.insert(name, BackendConfig::Service(service.clone()))?;
        }

        Ok(Self {
            backends: RwLock::new(backends),
        })
    }

    /// Register a backend of any kind
    pub async fn add(&self, name: &str, config: BackendConfig) -> Result<(), UpstreamError> {
        let kind = config.kind();
        self.backends.write().await.insert(name, config)?;
        tracing::info!(server = name, %kind, "added upstream server");
        Ok(())
    }

    pub async fn add_http(&self, name: &str, url: Url, auth_token: Option<String>) -> Result<(), UpstreamError> {
        let config = HttpBackend {
            url,
            auth_token: auth_token.map(SecretString::from),
        };
        self.add(name, BackendConfig::Http(config)).await
    }

    pub async fn add_stdio(
        &self,
        name: &str,
        command: impl Into<String>,
        args: Vec<String>,
        env: Option<HashMap<String, String>>,
        working_directory: Option<PathBuf>,
    ) -> Result<(), UpstreamError> {
        let config = StdioBackend {
            command: command.into(),
            args,
            env: env.unwrap_or_default(),
            working_directory,
        };
        self.add(name, BackendConfig::Stdio(config)).await
    }

    pub async fn add_service(&self, name: &str, config: ServiceBackend) -> Result<(), UpstreamError> {
        self.add(name, BackendConfig::Service(config)).await
    }

    /// Remove a backend; unknown names are a no-op
    pub async fn remove(&self, name: &str) -> Option<BackendKind> {
        let removed = self.backends.write().await.remove(name);
        if removed.is_some() {
            tracing::info!(server = name, "removed upstream server");
        }
        removed
    }

    /// Build the runtime connection for a backend
    pub async fn resolve(&self, name: &str) -> Result<ResolvedConnection, UpstreamError> {
        let backends = self.backends.read().await;

        if let Some(http) = backends.http.get(name) {
            let auth_token = resolve_token(http.auth_token.as_ref().map(|t| t.expose_secret()));
            return Ok(ResolvedConnection::Http {
                url: http.url.clone(),
                auth_token,
            });
        }

        if let Some(service) = backends.service.get(name) {
            let url = Url::parse(&format!("http://localhost:{}/mcp", service.port))
                .map_err(|e| UpstreamError::config(format!("invalid service url for {name}: {e}")))?;
            return Ok(ResolvedConnection::Http { url, auth_token: None });
        }

        if let Some(stdio) = backends.stdio.get(name) {
            return Ok(ResolvedConnection::Stdio {
                command: stdio.command.clone(),
                args: stdio.args.clone(),
                env: stdio.env.clone(),
                working_directory: stdio.working_directory.clone(),
            });
        }

        Err(UpstreamError::unknown_server(name))
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.backends.read().await.contains(name)
    }

    pub async fn kind_of(&self, name: &str) -> Option<BackendKind> {
        let backends = self.backends.read().await;
        if backends.http.contains_key(name) {
            Some(BackendKind::Http)
        } else if backends.stdio.contains_key(name) {
            Some(BackendKind::Stdio)
        } else if backends.service.contains_key(name) {
            Some(BackendKind::Service)
        } else {
            None
        }
    }

    /// All backend names: HTTP first, then stdio, then services
    pub async fn names(&self) -> Vec<String> {
        let backends = self.backends.read().await;
        backends
            .http
            .keys()
            .chain(backends.stdio.keys())
            .chain(backends.service.keys())
            .cloned()
            .collect()
    }

    /// Snapshot of the service backends, in registration order
    pub async fn service_backends(&self) -> Vec<(String, ServiceBackend)> {
        let backends = self.backends.read().await;
        backends
            .service
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }

    pub async fn list_all(&self) -> Vec<BackendSummary> {
        let backends = self.backends.read().await;
        let mut rows = Vec::with_capacity(backends.http.len() + backends.stdio.len() + backends.service.len());

        for (name, http) in &backends.http {
            rows.push(BackendSummary {
                name: name.clone(),
                kind: BackendKind::Http,
                summary: http.url.to_string(),
                has_auth: http.auth_token.is_some(),
            });
        }
        for (name, stdio) in &backends.stdio {
            rows.push(BackendSummary {
                name: name.clone(),
                kind: BackendKind::Stdio,
                summary: command_line(&stdio.command, &stdio.args),
                has_auth: false,
            });
        }
        for (name, service) in &backends.service {
            rows.push(BackendSummary {
                name: name.clone(),
                kind: BackendKind::Service,
                summary: format!("{} (port {})", command_line(&service.command, &service.args), service.port),
                has_auth: false,
            });
        }

        rows
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}
