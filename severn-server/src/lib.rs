//! `severn-server` — the request-handling layer of the Severn key-value
//! store. Accepts framed commands over TCP and dispatches them to either
//! the local keyspace (single-node mode) or the replication engine
//! (clustered mode), translating "not the leader" outcomes into redirect
//! responses that carry the current leader's address.

pub mod backend;
pub mod router;
pub mod server;

pub use backend::{Backend, LocalBackend, RaftBackend};
pub use server::TcpServer;
