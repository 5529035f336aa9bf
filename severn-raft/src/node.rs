//! Raft node lifecycle — create, start, bootstrap and stop a cluster node.
//!
//! This module is the entry point for the clustered server binary. It
//! wires the keyspace, the log stores, the state machine and the network
//! into a running `Raft` instance, spawns the transport listener and the
//! address-announcement task, and hands back the replication engine.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{InitializeError, RaftError};
use openraft::{BasicNode, Config, Raft, SnapshotPolicy};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use severn_core::{KvError, Result, Store};

use crate::commands::Command;
use crate::engine::ReplicatedStore;
use crate::log_store::RedbLogStore;
use crate::network::{forward_command, TcpNetworkFactory};
use crate::state_machine::KvStateMachine;
use crate::transport;
use crate::typ::TypeConfig;

/// Derive the stable `u64` consensus id from an operator-facing node name.
/// Both the join handler and the joining node compute this, so the two
/// sides of a join always agree.
pub fn node_id_from_name(name: &str) -> u64 {
    crc32fast::hash(name.as_bytes()) as u64
}

/// Configuration for starting a node.
pub struct RaftNodeConfig {
    /// Operator-facing node identifier, unique within the cluster.
    pub node_id: String,
    /// Directory for the WAL, the redb stores and the snapshot file.
    pub data_dir: PathBuf,
    /// Address this node listens on for inter-node Raft traffic.
    pub raft_addr: SocketAddr,
    /// The client-facing TCP address this node advertises for redirects.
    pub client_addr: String,
}

/// A running node with its background tasks.
pub struct RaftNode {
    /// The replication engine backed by this node.
    pub engine: Arc<ReplicatedStore>,
    /// The local keyspace, shared with the engine; hand this to the
    /// sweeper.
    pub store: Arc<Store>,
    /// Raft handle for admin operations.
    pub raft: Raft<TypeConfig>,
    pub id: u64,
    pub name: String,
    raft_addr: String,
    transport_handle: tokio::task::JoinHandle<()>,
    announce_handle: tokio::task::JoinHandle<()>,
}

impl RaftNode {
    /// Create and start a node. Does **not** form a cluster: call
    /// [`RaftNode::bootstrap`] on the first node, join every other one
    /// through an existing node's admin endpoint.
    pub async fn start(cfg: RaftNodeConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.data_dir).await?;
        let id = node_id_from_name(&cfg.node_id);

        let store = Arc::new(Store::open(cfg.data_dir.join("kvs.log")).await?);

        let raft_config = Config {
            snapshot_policy: SnapshotPolicy::LogsSinceLast(1000),
            max_in_snapshot_log_to_keep: 100,
            ..Config::default()
        };
        let raft_config = Arc::new(
            raft_config
                .validate()
                .map_err(|e| KvError::Config(e.to_string()))?,
        );

        let sm = KvStateMachine::new(store.clone(), cfg.data_dir.join("snapshots")).await?;
        let meta = sm.shared_meta();

        let log_store = RedbLogStore::new(
            cfg.data_dir.join("raft-log.db"),
            cfg.data_dir.join("raft-stable.db"),
        )
        .map_err(|e| KvError::Consensus(e.to_string()))?;

        let raft = Raft::new(id, raft_config, TcpNetworkFactory, log_store, sm)
            .await
            .map_err(|e| KvError::Consensus(e.to_string()))?;

        let listener = TcpListener::bind(cfg.raft_addr).await?;
        let raft_addr = listener.local_addr()?.to_string();
        let transport_handle = tokio::spawn(transport::serve(listener, raft.clone()));

        let engine = Arc::new(ReplicatedStore::new(
            raft.clone(),
            store.clone(),
            meta,
            id,
        ));

        let announce_handle = tokio::spawn(announce_loop(
            raft.clone(),
            id,
            Command::RegisterNode {
                node_id: id,
                name: cfg.node_id.clone(),
                raft_addr: raft_addr.clone(),
                client_addr: cfg.client_addr.clone(),
            },
        ));

        info!(node_id = %cfg.node_id, id, %raft_addr, "raft node started");

        Ok(Self {
            engine,
            store,
            raft,
            id,
            name: cfg.node_id,
            raft_addr,
            transport_handle,
            announce_handle,
        })
    }

    /// The transport address this node actually bound.
    pub fn raft_addr(&self) -> &str {
        &self.raft_addr
    }

    /// Form a single-node cluster with this node as its only voter. Safe
    /// to call again on restart; an already-initialized node is left
    /// untouched.
    pub async fn bootstrap(&self) -> Result<()> {
        let mut members = BTreeMap::new();
        members.insert(
            self.id,
            BasicNode {
                addr: self.raft_addr.clone(),
            },
        );

        match self.raft.initialize(members).await {
            Ok(()) => {
                info!(name = %self.name, "cluster bootstrapped (single node)");
                Ok(())
            }
            Err(RaftError::APIError(InitializeError::NotAllowed(_))) => {
                debug!("cluster already initialized");
                Ok(())
            }
            Err(e) => Err(KvError::Consensus(e.to_string())),
        }
    }

    /// Stop background tasks and shut the consensus instance down,
    /// draining in-flight commits.
    pub async fn shutdown(&self) -> Result<()> {
        self.announce_handle.abort();
        self.transport_handle.abort();
        self.raft
            .shutdown()
            .await
            .map_err(|e| KvError::Consensus(e.to_string()))?;
        Ok(())
    }
}

/// Announce this node's addresses through the replicated registry.
///
/// Retries until a leader accepts the command: the leader writes it
/// directly, a follower forwards it over the transport's `client_write`
/// RPC. Runs once per process start so address changes propagate after a
/// restart.
async fn announce_loop(raft: Raft<TypeConfig>, self_id: u64, cmd: Command) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;

        let metrics = raft.metrics().borrow().clone();
        let Some(leader) = metrics.current_leader else {
            continue;
        };

        if leader == self_id {
            match raft.client_write(cmd.clone()).await {
                Ok(_) => {
                    debug!("announced own addresses");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "failed to announce addresses, retrying");
                    continue;
                }
            }
        }

        let Some(leader_node) = metrics
            .membership_config
            .membership()
            .get_node(&leader)
            .cloned()
        else {
            continue;
        };

        match forward_command(&leader_node.addr, &cmd).await {
            Ok(_) => {
                debug!(leader_addr = %leader_node.addr, "announced own addresses via leader");
                return;
            }
            Err(e) => {
                debug!(error = %e, "address announcement not accepted yet, retrying");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_stable_and_distinct() {
        assert_eq!(node_id_from_name("node1"), node_id_from_name("node1"));
        assert_ne!(node_id_from_name("node1"), node_id_from_name("node2"));
    }
}
