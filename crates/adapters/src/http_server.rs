//! HTTP server hosting the handler runtime.

use anyhow::{Context, Result};
use axum::Router;
use devshim_runtime::{HandlerRegistry, ShimConfig};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::api_router::api_router;

/// Port the development server listens on by default
pub const DEFAULT_PORT: u16 = 5328;

/// Configuration for the development HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    pub listen_addr: SocketAddr,
    /// Handler locator and context settings
    pub shim: ShimConfig,
    /// `message` field of the `/api` listing
    pub api_title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            shim: ShimConfig::default(),
            api_title: "Dev API".to_string(),
        }
    }
}

/// Development HTTP server serving `/api` handlers.
pub struct HttpServer {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
}

impl HttpServer {
    /// Creates a server whose handlers all come from the handler directory.
    pub fn new(config: ServerConfig) -> Self {
        let registry = HandlerRegistry::new(config.shim.clone());
        Self::with_registry(config, registry)
    }

    /// Creates a server around a registry that may carry compiled handlers.
    pub fn with_registry(config: ServerConfig, registry: HandlerRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    /// Access the configuration associated with this server.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The router this server serves
    pub fn router(&self) -> Router {
        api_router(self.registry.clone(), self.config.api_title.clone())
    }

    /// Serve until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.listen_addr))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        self.registry.scan();
        info!(addr = %local_addr, dir = %self.config.shim.handler_dir.display(), "Serving handlers");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped");
        Ok(())
    }
}
