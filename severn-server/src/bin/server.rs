//! Single-node Severn server: one keyspace, one WAL, no replication.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use severn_core::sweeper::{spawn_sweeper, SWEEP_INTERVAL};
use severn_core::Store;
use severn_server::{LocalBackend, TcpServer};

#[derive(Debug, Parser)]
#[command(name = "severn-server")]
#[command(about = "Single-node Severn key-value server")]
struct Args {
    /// Address to listen on for client connections.
    #[arg(long, default_value = "localhost:8080")]
    addr: String,

    /// Path to the write-ahead log file.
    #[arg(long, default_value = "kvs.log")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let store = Arc::new(
        Store::open(&args.log)
            .await
            .with_context(|| format!("failed to open store at {}", args.log))?,
    );
    let _sweeper = spawn_sweeper(store.clone(), SWEEP_INTERVAL);

    let backend = Arc::new(LocalBackend::new(store, args.addr.clone()));
    let server = TcpServer::bind(&args.addr, backend)
        .await
        .with_context(|| format!("failed to listen on {}", args.addr))?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await;

    Ok(())
}
