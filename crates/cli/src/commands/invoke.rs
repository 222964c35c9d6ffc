//! Invoke command implementation
//!
//! This module implements `devshim invoke`, which runs a single request
//! through a handler in-process and prints the reconstructed response.

use anyhow::{Context, Result};
use devshim_runtime::{dispatch, HandlerRegistry, InboundRequest, ShimConfig};
use std::path::PathBuf;

/// Arguments for the invoke command
pub struct InvokeArgs {
    /// Handler name
    pub name: String,
    /// Request verb
    pub method: String,
    /// Request path, `/api/<name>` when absent
    pub path: Option<String>,
    /// Request body
    pub body: Option<String>,
    /// Raw `KEY:VALUE` header arguments
    pub headers: Vec<String>,
    /// Handler directory
    pub dir: PathBuf,
}

/// Execute the invoke command
pub async fn execute_invoke_command(args: InvokeArgs) -> Result<()> {
    let path = args
        .path
        .clone()
        .unwrap_or_else(|| format!("/api/{}", args.name));

    let mut request = InboundRequest::new(args.method.to_uppercase(), path)
        .with_body(args.body.unwrap_or_default().into_bytes());
    for raw in &args.headers {
        let (key, value) = parse_header_arg(raw)?;
        request = request.with_header(key, value);
    }

    println!("🧪 {} {}", request.method, request.path);

    let registry = HandlerRegistry::new(ShimConfig::with_handler_dir(&args.dir));
    let name = args.name;
    let response = tokio::task::spawn_blocking(move || dispatch(&registry, &name, request))
        .await
        .context("Dispatch task failed")?;

    println!("📤 Status: {}", response.status());
    println!("   Content-Type: {}", response.content_type());
    match serde_json::from_slice::<serde_json::Value>(response.body()) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", String::from_utf8_lossy(response.body())),
    }

    Ok(())
}

/// Parse a `KEY:VALUE` header argument
pub fn parse_header_arg(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once(':')
        .with_context(|| format!("Invalid header '{}'. Expected KEY:VALUE", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Invalid header '{}'. Header name is empty", raw);
    }
    Ok((key.to_string(), value.trim().to_string()))
}
