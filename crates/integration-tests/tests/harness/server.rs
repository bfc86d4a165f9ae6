//! Test server wrapper that starts Conflux on a random port

use std::net::SocketAddr;
use std::sync::Arc;

use conflux_config::Config;
use conflux_server::Server;
use conflux_upstream::{Connector, UpstreamState};
use tokio_util::sync::CancellationToken;

/// A running test server instance
pub struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    client: reqwest::Client,
    upstream: Arc<UpstreamState>,
}

impl TestServer {
    /// Start a test server whose backends are served by `connector`
    ///
    /// Binds to port 0 for automatic port assignment
    pub async fn start(config: Config, connector: Arc<dyn Connector>) -> anyhow::Result<Self> {
        let server = Server::with_connector(config, connector).await?;
        let upstream = server.upstream();
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        // Bind the listener here so we know the actual port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            axum::serve(listener, server.into_router())
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        let client = reqwest::Client::new();

        Ok(Self {
            addr,
            shutdown,
            client,
            upstream,
        })
    }

    /// Base URL of the running test server
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Get a reference to the HTTP client
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Upstream state behind the routes
    pub fn upstream(&self) -> &UpstreamState {
        &self.upstream
    }

    /// POST a JSON body and decode the JSON answer with its status
    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> (u16, serde_json::Value) {
        let resp = self.client.post(self.url(path)).json(body).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    /// GET a path and decode the JSON answer with its status
    pub async fn get_json(&self, path: &str) -> (u16, serde_json::Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
