//! Background task that evicts expired entries from the keyspace.
//!
//! Runs on every node independently. Expiry is deterministic in terms of
//! the replicated `expires_at` instant, so replicas converge without the
//! sweep itself being coordinated; lookups already treat expired entries
//! as absent, which bounds any divergence to physical occupancy.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::store::Store;

/// Default interval between sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Spawn the sweeper loop. Each tick removes every expired entry and
/// appends a WAL DELETE record for it so the eviction survives restart.
pub fn spawn_sweeper(store: Arc<Store>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a freshly replayed
        // store is not swept before the server has even bound its socket.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let evicted = store.sweep().await;
            if evicted > 0 {
                debug!(evicted, "swept expired entries");
            }
        }
    })
}
