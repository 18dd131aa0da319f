use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mcp_server::{build_dispatcher, HttpToolBackend, McpServer, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcp-server")]
#[command(about = "Expose a backend's operations as MCP tools over HTTP, SSE and WebSocket")]
#[command(version)]
pub struct Cli {
    /// Configuration file (.json, .yaml, .yml or .toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(short, long)]
    bind: Option<String>,

    /// Operation catalog as a JSON file
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Base URL tool calls are POSTed to
    #[arg(long)]
    invoke_url: Option<String>,

    /// Do not require mcp-session-id on stateless requests
    #[arg(long, default_value_t = false)]
    no_sessions: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn load_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(catalog) = &self.catalog {
            config.backend.catalog_file = Some(catalog.clone());
            config.backend.catalog_url = None;
        }
        if let Some(invoke_url) = &self.invoke_url {
            config.backend.invoke_url = Some(invoke_url.clone());
        }
        if self.no_sessions {
            config.sessions.enabled = false;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.load_config()?;
    let backend = Arc::new(HttpToolBackend::from_config(&config.backend)?);
    let server = McpServer::new(config.clone(), build_dispatcher(&config, backend));

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
            shutdown.cancel();
        }
    });

    server.serve(listener).await?;
    Ok(())
}
