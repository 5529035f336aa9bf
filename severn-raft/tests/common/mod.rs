//! Shared helpers for `severn-raft` integration tests.
//!
//! [`start_node`] spins up an ephemeral single-node cluster in a temp
//! directory, bootstraps it, and waits for leader election. Each test
//! gets its own isolated node on a unique port.

use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use severn_raft::node::{RaftNode, RaftNodeConfig};
use tempfile::TempDir;

/// Global port counter so parallel tests don't collide.
static PORT: AtomicU16 = AtomicU16::new(18650);

pub fn next_port() -> u16 {
    PORT.fetch_add(1, Ordering::Relaxed)
}

/// Start a node over `dir` on a fixed raft port. Does not bootstrap.
pub async fn start_node_at(dir: &Path, name: &str, raft_port: u16, client_addr: &str) -> RaftNode {
    RaftNode::start(RaftNodeConfig {
        node_id: name.to_string(),
        data_dir: dir.to_path_buf(),
        raft_addr: format!("127.0.0.1:{}", raft_port).parse().unwrap(),
        client_addr: client_addr.to_string(),
    })
    .await
    .expect("start raft node")
}

/// Spin up a bootstrapped single-node cluster and return the node plus its
/// temp dir. The `TempDir` must outlive the test; dropping it removes the
/// on-disk raft state.
pub async fn start_node() -> (RaftNode, TempDir) {
    let tmp = TempDir::new().expect("create temp dir");
    let port = next_port();
    let client_addr = format!("127.0.0.1:{}", next_port());

    let node = start_node_at(tmp.path(), "test-node", port, &client_addr).await;
    node.bootstrap().await.expect("bootstrap cluster");
    wait_for_leader(&node).await;

    (node, tmp)
}

/// Block until this node considers itself leader (or panic after 10 s).
pub async fn wait_for_leader(node: &RaftNode) {
    wait_until(|| {
        let engine = node.engine.clone();
        async move { engine.is_leader() }
    })
    .await
    .expect("node did not become leader in time");
}

/// Poll `cond` every 50 ms for up to 10 s.
pub async fn wait_until<F, Fut>(mut cond: F) -> Result<(), ()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Err(())
}
