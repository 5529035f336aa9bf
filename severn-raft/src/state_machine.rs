//! Raft state machine — applies committed log entries to the keyspace.
//!
//! The state machine wraps the WAL-backed [`Store`], so every replicated
//! mutation also lands in the replica's local write-ahead log. Snapshot
//! capture serializes the full keyspace as one JSON object; restore clears
//! the keyspace and re-installs each pair through the normal `set` path.
//! The latest snapshot is also persisted under `snapshots/` so applied
//! state and membership survive a restart even after log purges.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;

use openraft::storage::{RaftSnapshotBuilder, RaftStateMachine, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, OptionalSend, SnapshotMeta, StorageError,
    StoredMembership,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use severn_core::{KvError, Store, Value};

use crate::commands::{Command, CommandResponse, NodeInfo};
use crate::typ::TypeConfig;

type NodeId = u64;
type Node = BasicNode;

const SNAPSHOT_FILE: &str = "state.snap";

/// Full state machine snapshot, serialized as JSON.
///
/// `kv` is the `{key → {data, expires_at}}` mapping; the rest is the
/// consensus bookkeeping needed to resume from the snapshot.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SnapshotPayload {
    pub last_applied_log: Option<LogId<NodeId>>,
    pub last_membership: StoredMembership<NodeId, Node>,
    pub kv: HashMap<String, Value>,
    pub nodes: BTreeMap<NodeId, NodeInfo>,
}

/// Consensus-side bookkeeping, shared with the replication engine so it
/// can resolve the leader's client-facing address.
pub struct SmMeta {
    pub last_applied_log: Option<LogId<NodeId>>,
    pub last_membership: StoredMembership<NodeId, Node>,
    pub nodes: BTreeMap<NodeId, NodeInfo>,
}

pub type SharedMeta = Arc<RwLock<SmMeta>>;

/// The replicated state machine. Holds the keyspace behind an `Arc` so the
/// request router and the sweeper read the same data Raft writes to.
#[derive(Clone)]
pub struct KvStateMachine {
    store: Arc<Store>,
    meta: SharedMeta,
    snapshot_dir: PathBuf,
}

impl KvStateMachine {
    /// Build the state machine over an already-opened store, recovering
    /// consensus metadata from the last persisted snapshot if one exists.
    /// The keyspace itself is recovered by WAL replay, which covers at
    /// least everything any local snapshot does.
    pub async fn new(store: Arc<Store>, snapshot_dir: PathBuf) -> Result<Self, KvError> {
        tokio::fs::create_dir_all(&snapshot_dir).await?;

        let mut meta = SmMeta {
            last_applied_log: None,
            last_membership: StoredMembership::default(),
            nodes: BTreeMap::new(),
        };

        let snap_path = snapshot_dir.join(SNAPSHOT_FILE);
        match tokio::fs::read(&snap_path).await {
            Ok(raw) => match serde_json::from_slice::<SnapshotPayload>(&raw) {
                Ok(snap) => {
                    info!(
                        last_applied = ?snap.last_applied_log,
                        "recovered consensus state from snapshot file"
                    );
                    meta.last_applied_log = snap.last_applied_log;
                    meta.last_membership = snap.last_membership;
                    meta.nodes = snap.nodes;
                }
                Err(e) => warn!(error = %e, "ignoring unreadable snapshot file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            store,
            meta: Arc::new(RwLock::new(meta)),
            snapshot_dir,
        })
    }

    /// Cloneable handle to the consensus bookkeeping. Grab this **before**
    /// handing the state machine to `Raft::new`.
    pub fn shared_meta(&self) -> SharedMeta {
        self.meta.clone()
    }

    /// Serialize the current keyspace plus consensus metadata.
    async fn capture(&self) -> SnapshotPayload {
        let mut kv = HashMap::new();
        self.store
            .range(|k, v| {
                kv.insert(k.to_string(), v.clone());
                true
            })
            .await;

        let meta = self.meta.read().await;
        SnapshotPayload {
            last_applied_log: meta.last_applied_log,
            last_membership: meta.last_membership.clone(),
            kv,
            nodes: meta.nodes.clone(),
        }
    }

    async fn persist_snapshot(&self, data: &[u8]) {
        let path = self.snapshot_dir.join(SNAPSHOT_FILE);
        if let Err(e) = tokio::fs::write(&path, data).await {
            warn!(path = %path.display(), error = %e, "failed to persist snapshot file");
        }
    }
}

/// Apply one command to the keyspace / node registry. A storage failure is
/// logged and swallowed: the state machine never halts on a committed
/// entry, and the in-memory mutation has already been applied.
async fn apply_command(store: &Store, meta: &mut SmMeta, cmd: Command) -> CommandResponse {
    match cmd {
        Command::Set {
            key,
            data,
            expires_at,
        } => {
            if let Err(e) = store.set(&key, Value { data, expires_at }).await {
                warn!(key = %key, error = %e, "write-ahead log append failed during apply");
            }
        }
        Command::Delete { key } => {
            if let Err(e) = store.delete(&key).await {
                warn!(key = %key, error = %e, "write-ahead log append failed during apply");
            }
        }
        Command::RegisterNode {
            node_id,
            name,
            raft_addr,
            client_addr,
        } => {
            debug!(node_id, %name, %client_addr, "registered node addresses");
            meta.nodes.insert(
                node_id,
                NodeInfo {
                    name,
                    raft_addr,
                    client_addr,
                },
            );
        }
    }
    CommandResponse::Ok
}

impl RaftStateMachine<TypeConfig> for KvStateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, Node>), StorageError<NodeId>> {
        let meta = self.meta.read().await;
        Ok((meta.last_applied_log, meta.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<CommandResponse>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
    {
        let mut meta = self.meta.write().await;
        let mut responses = Vec::new();

        for entry in entries {
            meta.last_applied_log = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => {
                    responses.push(CommandResponse::Ok);
                }
                EntryPayload::Normal(cmd) => {
                    let resp = apply_command(&self.store, &mut meta, cmd).await;
                    debug!(log_id = ?entry.log_id, "applied command");
                    responses.push(resp);
                }
                EntryPayload::Membership(mem) => {
                    meta.last_membership = StoredMembership::new(Some(entry.log_id), mem);
                    responses.push(CommandResponse::Ok);
                }
            }
        }

        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        // A builder is just another handle onto the same shared state.
        self.clone()
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        _meta: &SnapshotMeta<NodeId, Node>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let raw = snapshot.into_inner();
        let snap: SnapshotPayload = serde_json::from_slice(&raw).map_err(|e| {
            StorageError::from_io_error(
                openraft::ErrorSubject::Snapshot(None),
                openraft::ErrorVerb::Read,
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;

        // The snapshot is the new authoritative state: drop everything
        // without logging, then re-install through the normal set path so
        // the local WAL stays authoritative for this process.
        self.store.clear().await;
        for (key, value) in &snap.kv {
            if let Err(e) = self.store.set(key, value.clone()).await {
                warn!(key = %key, error = %e, "write-ahead log append failed during restore");
            }
        }

        {
            let mut meta = self.meta.write().await;
            meta.last_applied_log = snap.last_applied_log;
            meta.last_membership = snap.last_membership.clone();
            meta.nodes = snap.nodes.clone();
        }

        self.persist_snapshot(&raw).await;
        info!(entries = snap.kv.len(), "installed snapshot");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let snap = self.capture().await;
        let Some(last) = snap.last_applied_log else {
            return Ok(None);
        };

        let data = serde_json::to_vec(&snap).map_err(|e| {
            StorageError::from_io_error(
                openraft::ErrorSubject::Snapshot(None),
                openraft::ErrorVerb::Write,
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )
        })?;

        Ok(Some(Snapshot {
            meta: SnapshotMeta {
                last_log_id: Some(last),
                last_membership: snap.last_membership,
                snapshot_id: format!("snap-{}-{}", last.leader_id, last.index),
            },
            snapshot: Box::new(Cursor::new(data)),
        }))
    }
}

impl RaftSnapshotBuilder<TypeConfig> for KvStateMachine {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let snap = self.capture().await;
        let data = serde_json::to_vec(&snap).map_err(|e| {
            StorageError::from_io_error(
                openraft::ErrorSubject::Snapshot(None),
                openraft::ErrorVerb::Write,
                std::io::Error::new(std::io::ErrorKind::Other, e),
            )
        })?;

        self.persist_snapshot(&data).await;

        let last = snap.last_applied_log.unwrap_or_default();
        Ok(Snapshot {
            meta: SnapshotMeta {
                last_log_id: snap.last_applied_log,
                last_membership: snap.last_membership,
                snapshot_id: format!("snap-{}-{}", last.leader_id, last.index),
            },
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    async fn machine(dir: &TempDir) -> (KvStateMachine, Arc<Store>) {
        let store = Arc::new(
            Store::open(dir.path().join("kvs.log"))
                .await
                .expect("open store"),
        );
        let sm = KvStateMachine::new(store.clone(), dir.path().join("snapshots"))
            .await
            .expect("state machine");
        (sm, store)
    }

    fn test_meta() -> SnapshotMeta<NodeId, Node> {
        SnapshotMeta {
            last_log_id: None,
            last_membership: StoredMembership::default(),
            snapshot_id: "test".to_string(),
        }
    }

    fn set(key: &str, data: &str) -> Command {
        Command::Set {
            key: key.into(),
            data: data.into(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    async fn run(sm: &KvStateMachine, store: &Store, cmds: Vec<Command>) {
        let mut meta = sm.meta.write().await;
        for cmd in cmds {
            apply_command(store, &mut meta, cmd).await;
        }
    }

    /// The same command sequence drives two independent state machines to
    /// the same keyspace contents.
    #[tokio::test]
    async fn apply_is_deterministic() {
        let cmds = || {
            vec![
                set("a", "1"),
                set("b", "2"),
                Command::Delete { key: "a".into() },
                set("b", "3"),
            ]
        };

        let dir_one = TempDir::new().unwrap();
        let (sm_one, store_one) = machine(&dir_one).await;
        run(&sm_one, &store_one, cmds()).await;

        let dir_two = TempDir::new().unwrap();
        let (sm_two, store_two) = machine(&dir_two).await;
        run(&sm_two, &store_two, cmds()).await;

        let export = |store: Arc<Store>| async move {
            let mut out = std::collections::BTreeMap::new();
            store
                .range(|k, v| {
                    out.insert(k.to_string(), v.clone());
                    true
                })
                .await;
            out
        };

        assert_eq!(export(store_one).await, export(store_two).await);
    }

    /// Capture → restore onto an empty keyspace reproduces the exact
    /// mapping that was captured.
    #[tokio::test]
    async fn snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let (sm, store) = machine(&dir).await;
        run(&sm, &store, vec![set("a", "1"), set("b", "two words")]).await;

        let payload = sm.capture().await;
        let encoded = serde_json::to_vec(&payload).unwrap();

        let other_dir = TempDir::new().unwrap();
        let (mut other, other_store) = machine(&other_dir).await;
        other
            .install_snapshot(&test_meta(), Box::new(Cursor::new(encoded)))
            .await
            .unwrap();

        assert_eq!(other_store.get("a").await.unwrap().data, "1");
        assert_eq!(other_store.get("b").await.unwrap().data, "two words");
        assert_eq!(other_store.len().await, 2);
    }

    /// Restore replaces existing contents rather than merging into them.
    #[tokio::test]
    async fn restore_clears_previous_state() {
        let dir = TempDir::new().unwrap();
        let (sm, store) = machine(&dir).await;
        run(&sm, &store, vec![set("keep", "1")]).await;
        let encoded = serde_json::to_vec(&sm.capture().await).unwrap();

        let other_dir = TempDir::new().unwrap();
        let (mut other, other_store) = machine(&other_dir).await;
        run(&other, &other_store, vec![set("stale", "gone")]).await;

        other
            .install_snapshot(&test_meta(), Box::new(Cursor::new(encoded)))
            .await
            .unwrap();

        assert!(other_store.get("stale").await.is_none());
        assert_eq!(other_store.get("keep").await.unwrap().data, "1");
    }

    /// Node registrations ride the log like any other command and are
    /// included in snapshots.
    #[tokio::test]
    async fn register_node_lands_in_registry_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let (sm, store) = machine(&dir).await;
        run(
            &sm,
            &store,
            vec![Command::RegisterNode {
                node_id: 7,
                name: "n1".into(),
                raft_addr: "127.0.0.1:7000".into(),
                client_addr: "127.0.0.1:8080".into(),
            }],
        )
        .await;

        let meta = sm.meta.read().await;
        assert_eq!(meta.nodes[&7].client_addr, "127.0.0.1:8080");
        drop(meta);

        let payload = sm.capture().await;
        assert_eq!(payload.nodes[&7].name, "n1");
    }
}
