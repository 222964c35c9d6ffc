//! Serve command implementation
//!
//! This module implements the `devshim serve` command, which hosts the
//! handler directory behind the development HTTP server.

use anyhow::{Context, Result};
use devshim_adapters::{HttpServer, ServerConfig};
use devshim_runtime::ShimConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Arguments for the serve command
pub struct ServeArgs {
    /// Port to listen on
    pub port: u16,
    /// Address to bind
    pub host: String,
    /// Handler directory
    pub dir: PathBuf,
    /// Entry point name excluded from resolution
    pub entry_point: String,
    /// Whether handler log messages are emitted
    pub handler_logs: bool,
}

/// Execute the serve command
pub async fn execute_serve_command(args: ServeArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("devshim=debug,info")),
        )
        .init();

    let listen_addr = parse_listen_addr(&args.host, args.port)?;

    if !args.dir.is_dir() {
        warn!(dir = %args.dir.display(), "Handler directory does not exist yet");
    }

    let shim = ShimConfig {
        handler_dir: args.dir,
        entry_point: args.entry_point,
        quiet_handler_logs: !args.handler_logs,
        ..ShimConfig::default()
    };
    let config = ServerConfig {
        listen_addr,
        shim,
        ..ServerConfig::default()
    };

    println!("🚀 Devshim development server");
    println!("   Server: http://{}", listen_addr);
    println!("   API:    http://{}/api", listen_addr);
    println!();

    HttpServer::new(config)
        .run_until(wait_for_shutdown())
        .await
        .context("Development server failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Build the bind address from host and port
pub fn parse_listen_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("Invalid host '{}'. Expected an IP address (e.g., 127.0.0.1)", host))?;
    Ok(SocketAddr::new(ip, port))
}

/// Wait for shutdown signal (Ctrl+C)
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
