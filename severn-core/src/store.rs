//! The in-memory keyspace.
//!
//! A thread-safe `{key → Value}` map with per-entry expiry. Every mutation
//! is recorded in the write-ahead log before (or, for sweeper evictions,
//! synchronously with) the in-memory update, so a restart replays back to
//! the pre-crash state. Lookups treat an entry whose expiry has passed as
//! absent even before the sweeper has evicted it.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use crate::errors::Result;
use crate::wal::Wal;

/// A stored value: payload bytes plus the absolute instant it expires.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Value {
    pub data: String,
    pub expires_at: DateTime<Utc>,
}

impl Value {
    /// Build a value expiring `expires_in` from now. Saturates at the far
    /// end of the representable range so absurd TTLs do not wrap.
    pub fn new(data: impl Into<String>, expires_in: Duration) -> Self {
        let expires_at = Utc::now()
            .checked_add_signed(expires_in)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            data: data.into(),
            expires_at,
        }
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

struct Inner {
    data: HashMap<String, Value>,
    wal: Wal,
}

/// The keyspace. Multiple concurrent readers or one writer; the WAL handle
/// lives under the write side of the same lock so appends never interleave
/// within a line.
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    /// Open the store, replaying the write-ahead log at `path` into memory.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let (wal, data) = Wal::open(path).await?;
        Ok(Self {
            inner: RwLock::new(Inner { data, wal }),
        })
    }

    /// Unconditional overwrite. The WAL record is appended first; if the
    /// append fails the in-memory update is still applied and the error is
    /// returned so the caller can decide how loudly to complain.
    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write().await;
        let io = inner.wal.append_set(key, &value).await;
        inner.data.insert(key.to_string(), value);
        io.map_err(Into::into)
    }

    /// Look up `key`. Absent when missing or already expired; expired
    /// entries are left in place for the sweeper.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        let value = inner.data.get(key)?;
        if value.expired(Utc::now()) {
            return None;
        }
        Some(value.clone())
    }

    /// Remove `key`. Idempotent: deleting an absent key is a no-op that
    /// still appends the WAL record, keeping replay deterministic.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let io = inner.wal.append_delete(key).await;
        inner.data.remove(key);
        io.map_err(Into::into)
    }

    /// Remaining time to live for `key`, under the same absence rules as
    /// [`Store::get`].
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.read().await;
        let value = inner.data.get(key)?;
        let now = Utc::now();
        if value.expired(now) {
            return None;
        }
        Some(value.expires_at - now)
    }

    /// Snapshot-consistent enumeration under the read lock. `f` returns
    /// `false` to stop early. Callers must not block inside `f`.
    pub async fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &Value) -> bool,
    {
        let inner = self.inner.read().await;
        for (k, v) in &inner.data {
            if !f(k, v) {
                break;
            }
        }
    }

    /// Drop every entry without writing WAL records. Used only by snapshot
    /// restore, where the incoming snapshot is the new authoritative state.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.data.clear();
    }

    /// Evict every expired entry, appending a WAL DELETE for each so the
    /// eviction survives restart. Victims are collected under the read lock
    /// and re-checked under the write lock.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let victims: Vec<String> = {
            let inner = self.inner.read().await;
            inner
                .data
                .iter()
                .filter(|(_, v)| v.expired(now))
                .map(|(k, _)| k.clone())
                .collect()
        };

        if victims.is_empty() {
            return 0;
        }

        let mut evicted = 0;
        let mut inner = self.inner.write().await;
        for key in victims {
            let still_expired = inner.data.get(&key).is_some_and(|v| v.expired(now));
            if !still_expired {
                continue;
            }
            inner.data.remove(&key);
            if let Err(e) = inner.wal.append_delete(&key).await {
                warn!(key = %key, error = %e, "failed to record eviction in write-ahead log");
            }
            evicted += 1;
        }
        evicted
    }

    /// Number of entries physically present, expired ones included.
    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }
}
