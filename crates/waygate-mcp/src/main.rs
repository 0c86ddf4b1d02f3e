//! waygate-mcpd - Server Binary
//!
//! Loads configuration, initializes tracing, and serves until interrupted.

// Layer 1: Standard library imports
use std::path::PathBuf;

// Layer 2: Third-party crate imports
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Layer 3: Internal module imports
use waygate_mcp::config::WaygateConfig;
use waygate_mcp::server::McpServer;

#[derive(Debug, Parser)]
#[command(name = "waygate-mcpd", version, about = "Multi-tenant hosted MCP server")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    listen: String,

    /// Canonical public base URL (overrides the config file)
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            WaygateConfig::from_yaml(&raw)?
        }
        None => WaygateConfig::default(),
    };
    if let Some(base_url) = args.base_url.or_else(|| std::env::var("WAYGATE_BASE_URL").ok()) {
        config.base_url = Some(base_url);
    }
    let listen = std::env::var("WAYGATE_LISTEN").unwrap_or(args.listen);

    let server = std::sync::Arc::new(McpServer::builder(config).build());
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(%listen, "starting waygate-mcpd");

    let interrupt_target = std::sync::Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; shutting down");
            interrupt_target.shutdown();
        }
    });

    if let Err(e) = server.serve(listener).await {
        error!(error = %e, "server terminated");
        return Err(e.into());
    }
    Ok(())
}
