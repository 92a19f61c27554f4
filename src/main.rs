//! hostbridged - serve an object graph to bridge clients over a Unix socket.
//!
//! ```text
//! hostbridged [--socket PATH] [GRAPH.json]
//! ```
//!
//! The graph is loaded from a JSON document (see `hostbridge::host::json`);
//! without one the daemon serves an empty graph. The socket path defaults
//! to `HOSTBRIDGE_SOCKET` or the per-user runtime directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hostbridge::host::{json, server, Graph, Host};
use hostbridge::BridgeConfig;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Socket to listen on
    #[arg(short, long, env = "HOSTBRIDGE_SOCKET")]
    socket: Option<PathBuf>,

    /// JSON document describing the object graph to serve
    graph: Option<PathBuf>,
}

fn load_graph(path: Option<&PathBuf>) -> Result<Graph> {
    let Some(path) = path else {
        tracing::warn!("No graph document given; serving an empty graph");
        return Ok(Graph::new());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    json::graph_from_str(&text).with_context(|| format!("Failed to load {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "hostbridge=info,hostbridged=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();

    let config = BridgeConfig::from_env()?;
    let socket = cli.socket.unwrap_or(config.socket_path);
    let graph = load_graph(cli.graph.as_ref())?;

    tracing::info!(
        "Starting hostbridged v{} with roots [{}]",
        env!("CARGO_PKG_VERSION"),
        graph.root_names().collect::<Vec<_>>().join(", ")
    );

    let host = Host::new(graph).shared();
    server::serve_path(&socket, host, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await
}
