mod health;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use conflux_config::Config;
use conflux_upstream::{Connector, UpstreamState};
use tower_http::trace::TraceLayer;

/// Assembled server with all routes and middleware
pub struct Server {
    router: Router,
    listen_address: SocketAddr,
    upstream: Arc<UpstreamState>,
}

impl Server {
    /// Build the server from configuration
    ///
    /// Registers the configured backends, starts service backends and
    /// discovers tools before returning. Backends that fail to start or to
    /// answer are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend configuration is inconsistent
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let upstream = UpstreamState::new(&config)?;
        Ok(Self::assemble(&config, upstream).await)
    }

    /// Build the server with a custom upstream transport
    ///
    /// # Errors
    ///
    /// Returns an error if the backend configuration is inconsistent
    pub async fn with_connector(config: Config, connector: Arc<dyn Connector>) -> anyhow::Result<Self> {
        let upstream = UpstreamState::with_connector(&config, connector)?;
        Ok(Self::assemble(&config, upstream).await)
    }

    async fn assemble(config: &Config, upstream: UpstreamState) -> Self {
        let upstream = Arc::new(upstream);
        upstream.refresh().await;

        let mut app = Router::new();

        // Health check
        if config.server.health.enabled {
            app = app.route(&config.server.health.path, axum::routing::get(health::health_handler));
        }

        // Tool and management routes
        app = app.merge(conflux_upstream::upstream_router(Arc::clone(&upstream)));

        // Tracing
        app = app.layer(TraceLayer::new_for_http());

        Self {
            router: app,
            listen_address: config.server.listen_address(),
            upstream,
        }
    }

    /// Get the configured listen address
    #[must_use]
    pub const fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Shared upstream state behind the routes
    #[must_use]
    pub fn upstream(&self) -> Arc<UpstreamState> {
        Arc::clone(&self.upstream)
    }

    /// Consume the server and return the inner router
    ///
    /// Useful for testing when the caller manages the listener
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Start serving requests
    ///
    /// Blocks until the cancellation token is triggered, then stops every
    /// service backend.
    ///
    /// # Errors
    ///
    /// Returns an error if binding the TCP listener or serving fails
    pub async fn serve(self, shutdown: tokio_util::sync::CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen_address).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "server listening");

        let served = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("graceful shutdown initiated");
            })
            .await;

        self.upstream.shutdown().await;
        served?;

        Ok(())
    }
}
