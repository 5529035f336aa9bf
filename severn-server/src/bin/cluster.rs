//! Clustered Severn server: a Raft replica plus the client-facing TCP
//! listener and the administrative HTTP endpoint.
//!
//! Exactly one node is launched with `--bootstrap` to form the cluster;
//! every other node points `--join` at an existing node's admin address.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use severn_core::sweeper::{spawn_sweeper, SWEEP_INTERVAL};
use severn_raft::api::{self, ApiState};
use severn_raft::join::join_cluster;
use severn_raft::node::{RaftNode, RaftNodeConfig};
use severn_server::{RaftBackend, TcpServer};

#[derive(Debug, Parser)]
#[command(name = "severn-cluster")]
#[command(about = "Clustered Severn key-value server")]
struct Args {
    /// Unique node identifier.
    #[arg(long)]
    id: String,

    /// Raft transport address.
    #[arg(long, default_value = "localhost:7000")]
    raft: String,

    /// Client-facing TCP address.
    #[arg(long, default_value = "localhost:8080")]
    tcp: String,

    /// Administrative HTTP address.
    #[arg(long, default_value = "localhost:8081")]
    api: String,

    /// Directory for per-node data (WAL, raft log, snapshots).
    #[arg(long, default_value = "raft-data")]
    dir: PathBuf,

    /// Bootstrap the cluster with this node.
    #[arg(long)]
    bootstrap: bool,

    /// Admin address of an existing node to join.
    #[arg(long)]
    join: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let data_dir = args.dir.join(&args.id);

    let raft_addr = tokio::net::lookup_host(&args.raft)
        .await
        .with_context(|| format!("failed to resolve --raft address {}", args.raft))?
        .next()
        .with_context(|| format!("--raft address {} resolves to nothing", args.raft))?;

    let node = RaftNode::start(RaftNodeConfig {
        node_id: args.id.clone(),
        data_dir,
        raft_addr,
        client_addr: args.tcp.clone(),
    })
    .await
    .context("failed to start raft node")?;

    let api_listener = TcpListener::bind(&args.api)
        .await
        .with_context(|| format!("failed to listen on admin address {}", args.api))?;
    let api_state = ApiState {
        engine: node.engine.clone(),
        node_id: args.id.clone(),
        addr: node.raft_addr().to_string(),
    };
    let api_handle = tokio::spawn(api::serve(api_listener, api_state));

    if args.bootstrap {
        node.bootstrap().await.context("failed to bootstrap cluster")?;
    }

    if let Some(join_addr) = &args.join {
        if join_addr != &args.api {
            info!(%join_addr, "joining cluster");
            join_cluster(join_addr, &args.id, node.raft_addr())
                .await
                .context("failed to join cluster")?;
        }
    }

    let _sweeper = spawn_sweeper(node.store.clone(), SWEEP_INTERVAL);

    let backend = Arc::new(RaftBackend::new(node.engine.clone()));
    let server = TcpServer::bind(&args.tcp, backend)
        .await
        .with_context(|| format!("failed to listen on {}", args.tcp))?;

    info!(
        id = %args.id,
        raft = %node.raft_addr(),
        tcp = %args.tcp,
        api = %args.api,
        "cluster node started"
    );

    // Serve until interrupted, then unwind in dependency order: accept
    // loop, admin endpoint, consensus instance; the stores close with the
    // process.
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to install ctrl-c handler");
            }
        })
        .await;

    api_handle.abort();
    node.shutdown().await.context("raft shutdown failed")?;

    Ok(())
}
