//! The replication engine facade.
//!
//! Lookups go straight to the local keyspace and may be stale on a
//! follower; mutations are leader-only and travel through the consensus
//! log with a bounded commit wait. A mutation on a non-leader fails with
//! [`KvError::NotLeader`], which the request router turns into a redirect
//! carrying the leader's client-facing address.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use openraft::error::{ClientWriteError, RaftError};
use openraft::{BasicNode, Raft};
use tracing::{debug, info};

use severn_core::{KvError, Result, Store, Value};

use crate::commands::{Command, CommandResponse};
use crate::state_machine::SharedMeta;
use crate::typ::TypeConfig;

/// How long a submitted write may wait for commit before the client is
/// told to retry. Expiry means "unknown", not "not committed".
pub const COMMIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Raft-backed key-value store.
pub struct ReplicatedStore {
    raft: Raft<TypeConfig>,
    store: Arc<Store>,
    meta: SharedMeta,
    node_id: u64,
}

impl ReplicatedStore {
    pub fn new(raft: Raft<TypeConfig>, store: Arc<Store>, meta: SharedMeta, node_id: u64) -> Self {
        Self {
            raft,
            store,
            meta,
            node_id,
        }
    }

    /// Local lookup; may lag the leader on a follower that has not yet
    /// applied the latest committed entries.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).await
    }

    /// Local remaining-TTL lookup, same staleness caveat as [`get`].
    ///
    /// [`get`]: ReplicatedStore::get
    pub async fn ttl(&self, key: &str) -> Option<chrono::Duration> {
        self.store.ttl(key).await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.propose(Command::Set {
            key: key.to_string(),
            data: value.data,
            expires_at: value.expires_at,
        })
        .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.propose(Command::Delete {
            key: key.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Propose a command and wait for commit, bounded by [`COMMIT_TIMEOUT`].
    async fn propose(&self, cmd: Command) -> Result<CommandResponse> {
        if !self.is_leader() {
            return Err(KvError::NotLeader);
        }

        match tokio::time::timeout(COMMIT_TIMEOUT, self.raft.client_write(cmd)).await {
            Err(_) => Err(KvError::CommitTimeout(COMMIT_TIMEOUT.as_millis() as u64)),
            Ok(Ok(resp)) => Ok(resp.data),
            Ok(Err(RaftError::APIError(ClientWriteError::ForwardToLeader(_)))) => {
                // Lost leadership between the check and the submit.
                Err(KvError::NotLeader)
            }
            Ok(Err(e)) => Err(KvError::Consensus(e.to_string())),
        }
    }

    /// Add a node as a voter. Leader-only; a node already present under
    /// the same id or address is treated as joined.
    pub async fn join(&self, node_id: &str, addr: &str) -> Result<()> {
        if !self.is_leader() {
            return Err(KvError::NotLeader);
        }

        let id = crate::node::node_id_from_name(node_id);
        let metrics = self.raft.metrics().borrow().clone();
        let membership = metrics.membership_config.membership().clone();

        for (existing_id, node) in membership.nodes() {
            if *existing_id == id || node.addr == addr {
                debug!(node_id, addr, "join request for existing member");
                return Ok(());
            }
        }

        self.raft
            .add_learner(
                id,
                BasicNode {
                    addr: addr.to_string(),
                },
                true,
            )
            .await
            .map_err(|e| KvError::Consensus(e.to_string()))?;

        let mut voters: BTreeSet<u64> = membership.voter_ids().collect();
        voters.insert(id);
        self.raft
            .change_membership(voters, false)
            .await
            .map_err(|e| KvError::Consensus(e.to_string()))?;

        info!(node_id, addr, "node joined as voter");
        Ok(())
    }

    /// Hand off leadership by demoting this node from the voter set. A
    /// follower calling this is a no-op.
    pub async fn leave(&self) -> Result<()> {
        if !self.is_leader() {
            return Ok(());
        }

        let metrics = self.raft.metrics().borrow().clone();
        let voters: BTreeSet<u64> = metrics
            .membership_config
            .membership()
            .voter_ids()
            .filter(|id| *id != self.node_id)
            .collect();

        if voters.is_empty() {
            // Sole member; there is nobody to hand leadership to.
            return Ok(());
        }

        self.raft
            .change_membership(voters, false)
            .await
            .map_err(|e| KvError::Consensus(e.to_string()))?;
        info!("stepped down from the voter set");
        Ok(())
    }

    /// Force the consensus layer to produce a snapshot now. Leader-only.
    pub async fn take_snapshot(&self) -> Result<()> {
        if !self.is_leader() {
            return Err(KvError::NotLeader);
        }
        self.raft
            .trigger()
            .snapshot()
            .await
            .map_err(|e| KvError::Consensus(e.to_string()))
    }

    pub fn is_leader(&self) -> bool {
        let metrics = self.raft.metrics().borrow().clone();
        metrics.current_leader == Some(self.node_id)
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// The current leader's client-facing address, resolved through the
    /// replicated node registry; falls back to the leader's transport
    /// address until it has announced itself, and to an empty string while
    /// no leader is known.
    pub async fn leader_addr(&self) -> String {
        let metrics = self.raft.metrics().borrow().clone();
        let Some(leader) = metrics.current_leader else {
            return String::new();
        };

        if let Some(info) = self.meta.read().await.nodes.get(&leader) {
            return info.client_addr.clone();
        }

        metrics
            .membership_config
            .membership()
            .get_node(&leader)
            .map(|node| node.addr.clone())
            .unwrap_or_default()
    }
}
