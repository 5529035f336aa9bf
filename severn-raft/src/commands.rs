//! Raft log commands and responses.
//!
//! These are the application-level payloads that flow through consensus.
//! Every mutation is encoded as a `Command`, proposed to the Raft leader,
//! replicated to a quorum, and then applied to the keyspace on each
//! replica. Exactly one keyspace mutation per committed entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A command proposed through consensus and applied by the state machine.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum Command {
    /// Install `{data, expires_at}` under `key`.
    Set {
        key: String,
        data: String,
        expires_at: DateTime<Utc>,
    },

    /// Remove `key`.
    Delete { key: String },

    /// Announce a node's addresses. Replicated so every replica can
    /// translate the leader's node id into a client-facing address when
    /// building redirect responses.
    RegisterNode {
        node_id: u64,
        name: String,
        raft_addr: String,
        client_addr: String,
    },
}

/// Response returned after applying a command. Consumed only by the
/// original submitter on the leader; followers discard it.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum CommandResponse {
    Ok,
}

/// Addresses a node advertises to the cluster.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub raft_addr: String,
    pub client_addr: String,
}
