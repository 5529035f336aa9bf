//! `severn-raft` — Raft replication for the Severn key-value store.
//!
//! Wraps the `severn-core` keyspace in a consensus log: mutations travel
//! through the Raft leader and are applied by the state machine on every
//! replica, while lookups stay local. Uses `openraft` for consensus and
//! `redb` for persistent log/vote storage. Inter-node RPC rides the same
//! newline-delimited JSON framing as the client protocol.

pub mod api;
pub mod commands;
pub mod engine;
pub mod join;
pub mod log_store;
pub mod network;
pub mod node;
pub mod state_machine;
pub mod transport;
pub mod typ;

pub use openraft::{BasicNode, Raft};
