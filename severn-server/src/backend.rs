//! The dispatch seam between the request router and storage.
//!
//! `LocalBackend` serves a standalone node straight from the keyspace;
//! `RaftBackend` routes mutations through the replication engine. The
//! router only sees this trait.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use severn_core::{KvError, Store, Value};
use severn_raft::engine::ReplicatedStore;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn set(&self, key: &str, value: Value) -> Result<(), KvError>;
    async fn delete(&self, key: &str) -> Result<(), KvError>;
    async fn ttl(&self, key: &str) -> Option<chrono::Duration>;
    fn is_leader(&self) -> bool;
    async fn leader_addr(&self) -> String;
}

/// Single-node backend: every operation is local and this node is always
/// "the leader". WAL append failures are logged and the operation is still
/// reported as success, trading durability for a simple fast path.
pub struct LocalBackend {
    store: Arc<Store>,
    addr: String,
}

impl LocalBackend {
    pub fn new(store: Arc<Store>, addr: impl Into<String>) -> Self {
        Self {
            store,
            addr: addr.into(),
        }
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), KvError> {
        if let Err(e) = self.store.set(key, value).await {
            warn!(key, error = %e, "write-ahead log append failed");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        if let Err(e) = self.store.delete(key).await {
            warn!(key, error = %e, "write-ahead log append failed");
        }
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Option<chrono::Duration> {
        self.store.ttl(key).await
    }

    fn is_leader(&self) -> bool {
        true
    }

    async fn leader_addr(&self) -> String {
        self.addr.clone()
    }
}

/// Clustered backend: reads stay local, mutations go through consensus and
/// may come back with `NotLeader`, which the router turns into a redirect.
pub struct RaftBackend {
    engine: Arc<ReplicatedStore>,
}

impl RaftBackend {
    pub fn new(engine: Arc<ReplicatedStore>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Backend for RaftBackend {
    async fn get(&self, key: &str) -> Option<Value> {
        self.engine.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), KvError> {
        self.engine.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.engine.delete(key).await
    }

    async fn ttl(&self, key: &str) -> Option<chrono::Duration> {
        self.engine.ttl(key).await
    }

    fn is_leader(&self) -> bool {
        self.engine.is_leader()
    }

    async fn leader_addr(&self) -> String {
        self.engine.leader_addr().await
    }
}
