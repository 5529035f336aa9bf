//! Persistent Raft log storage backed by `redb`.
//!
//! Two databases under the node's data directory: `raft-log.db` holds the
//! log entries keyed by index, `raft-stable.db` holds vote, committed and
//! purge metadata. Both must survive restart for Raft correctness.

use std::fmt::Debug;
use std::ops::RangeBounds;
use std::path::Path;
use std::sync::Arc;

use openraft::storage::{LogFlushed, LogState, RaftLogReader, RaftLogStorage};
use openraft::{Entry, LogId, OptionalSend, StorageError, Vote};
use redb::{Database, ReadableTable, TableDefinition};
use tokio::sync::Mutex;
use tracing::debug;

use crate::typ::TypeConfig;

type NodeId = u64;

const LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_log");
const STABLE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("raft_stable");

const VOTE_KEY: &str = "vote";
const PURGED_KEY: &str = "last_purged";
const COMMITTED_KEY: &str = "committed";

/// Persistent Raft log store.
pub struct RedbLogStore {
    log: Arc<Database>,
    stable: Arc<Database>,
    /// Cache of the last purged log id for fast `get_log_state` answers.
    last_purged: Mutex<Option<LogId<NodeId>>>,
}

impl RedbLogStore {
    /// Open or create both databases.
    pub fn new(
        log_path: impl AsRef<Path>,
        stable_path: impl AsRef<Path>,
    ) -> Result<Self, StorageError<NodeId>> {
        let log = Database::create(log_path).map_err(|e| to_storage_err(e, "open log db"))?;
        let stable =
            Database::create(stable_path).map_err(|e| to_storage_err(e, "open stable db"))?;

        let txn = log
            .begin_write()
            .map_err(|e| to_storage_err(e, "begin write txn"))?;
        txn.open_table(LOG_TABLE)
            .map(|_| ())
            .map_err(|e| to_storage_err(e, "create log table"))?;
        txn.commit().map_err(|e| to_storage_err(e, "commit init"))?;

        let txn = stable
            .begin_write()
            .map_err(|e| to_storage_err(e, "begin write txn"))?;
        txn.open_table(STABLE_TABLE)
            .map(|_| ())
            .map_err(|e| to_storage_err(e, "create stable table"))?;
        txn.commit().map_err(|e| to_storage_err(e, "commit init"))?;

        let last_purged = read_stable::<LogId<NodeId>>(&stable, PURGED_KEY)?;

        Ok(Self {
            log: Arc::new(log),
            stable: Arc::new(stable),
            last_purged: Mutex::new(last_purged),
        })
    }

    fn read_stable<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StorageError<NodeId>> {
        read_stable(&self.stable, key)
    }

    fn write_stable<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError<NodeId>> {
        let bytes =
            bincode::serialize(value).map_err(|e| to_storage_err(e, "serialize stable value"))?;
        let txn = self
            .stable
            .begin_write()
            .map_err(|e| to_storage_err(e, "begin write txn"))?;
        {
            let mut table = txn
                .open_table(STABLE_TABLE)
                .map_err(|e| to_storage_err(e, "open stable table"))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| to_storage_err(e, "insert stable value"))?;
        }
        txn.commit().map_err(|e| to_storage_err(e, "commit stable"))?;
        Ok(())
    }
}

impl RaftLogReader<TypeConfig> for RedbLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let txn = self
            .log
            .begin_read()
            .map_err(|e| to_storage_err(e, "begin read txn"))?;
        let table = txn
            .open_table(LOG_TABLE)
            .map_err(|e| to_storage_err(e, "open log table"))?;

        let mut entries = Vec::new();
        let iter = table
            .range(range)
            .map_err(|e| to_storage_err(e, "range query"))?;
        for item in iter {
            let (_key, val) = item.map_err(|e| to_storage_err(e, "iterate log"))?;
            let entry: Entry<TypeConfig> = serde_json::from_slice(val.value())
                .map_err(|e| to_storage_err(e, "deserialize entry"))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl RaftLogStorage<TypeConfig> for RedbLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let last_purged = *self.last_purged.lock().await;

        let txn = self
            .log
            .begin_read()
            .map_err(|e| to_storage_err(e, "begin read txn"))?;
        let table = txn
            .open_table(LOG_TABLE)
            .map_err(|e| to_storage_err(e, "open log table"))?;

        let last_log_id = match table.last() {
            Ok(Some((_key, val))) => {
                let entry: Entry<TypeConfig> = serde_json::from_slice(val.value())
                    .map_err(|e| to_storage_err(e, "deserialize last entry"))?;
                Some(entry.log_id)
            }
            _ => last_purged,
        };

        Ok(LogState {
            last_purged_log_id: last_purged,
            last_log_id,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        Self {
            log: self.log.clone(),
            stable: self.stable.clone(),
            last_purged: Mutex::new(*self.last_purged.lock().await),
        }
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.write_stable(VOTE_KEY, vote)?;
        debug!(?vote, "vote saved");
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        self.read_stable(VOTE_KEY)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + OptionalSend,
        I::IntoIter: OptionalSend,
    {
        let txn = self
            .log
            .begin_write()
            .map_err(|e| to_storage_err(e, "begin write txn"))?;
        {
            let mut table = txn
                .open_table(LOG_TABLE)
                .map_err(|e| to_storage_err(e, "open log table"))?;
            for entry in entries {
                let bytes =
                    serde_json::to_vec(&entry).map_err(|e| to_storage_err(e, "serialize entry"))?;
                table
                    .insert(entry.log_id.index, bytes.as_slice())
                    .map_err(|e| to_storage_err(e, "insert entry"))?;
            }
        }
        txn.commit().map_err(|e| to_storage_err(e, "commit append"))?;

        // Entries are on disk after the commit; acknowledge the flush.
        callback.log_io_completed(Ok(()));

        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        remove_range(&self.log, log_id.index, u64::MAX)?;
        debug!(?log_id, "log truncated");
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        remove_range(&self.log, 0, log_id.index.saturating_add(1))?;
        self.write_stable(PURGED_KEY, &log_id)?;
        *self.last_purged.lock().await = Some(log_id);
        debug!(?log_id, "log purged");
        Ok(())
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        if let Some(c) = &committed {
            self.write_stable(COMMITTED_KEY, c)?;
        }
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        self.read_stable(COMMITTED_KEY)
    }
}

fn read_stable<T: serde::de::DeserializeOwned>(
    db: &Database,
    key: &str,
) -> Result<Option<T>, StorageError<NodeId>> {
    let txn = db
        .begin_read()
        .map_err(|e| to_storage_err(e, "begin read txn"))?;
    let table = txn
        .open_table(STABLE_TABLE)
        .map_err(|e| to_storage_err(e, "open stable table"))?;
    match table.get(key) {
        Ok(Some(val)) => {
            let v = bincode::deserialize(val.value())
                .map_err(|e| to_storage_err(e, "deserialize stable value"))?;
            Ok(Some(v))
        }
        Ok(None) => Ok(None),
        Err(e) => Err(to_storage_err(e, "read stable value")),
    }
}

/// Delete every entry with index in `[from, to)`.
fn remove_range(db: &Database, from: u64, to: u64) -> Result<(), StorageError<NodeId>> {
    let txn = db
        .begin_write()
        .map_err(|e| to_storage_err(e, "begin write txn"))?;
    {
        let mut table = txn
            .open_table(LOG_TABLE)
            .map_err(|e| to_storage_err(e, "open log table"))?;

        let keys: Vec<u64> = table
            .range(from..to)
            .map_err(|e| to_storage_err(e, "range for removal"))?
            .map(|item| item.map(|(k, _)| k.value()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| to_storage_err(e, "collect removal keys"))?;

        for key in keys {
            table
                .remove(key)
                .map_err(|e| to_storage_err(e, "remove entry"))?;
        }
    }
    txn.commit().map_err(|e| to_storage_err(e, "commit removal"))?;
    Ok(())
}

/// Convert any error into a StorageError for openraft.
fn to_storage_err(e: impl std::error::Error + 'static, context: &str) -> StorageError<NodeId> {
    StorageError::from_io_error(
        openraft::ErrorSubject::Store,
        openraft::ErrorVerb::Write,
        std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e)),
    )
}
