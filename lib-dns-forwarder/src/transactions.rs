//! The transaction table: which client asked which in-flight query.
//!
//! Keyed by the 16-bit header ID alone.  Two clients using the same ID
//! at the same time will collide, and the later query wins; that is a
//! known limit of correlating on the ID over a single upstream socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const LOCK_POISON_MESSAGE: &str =
    "[INTERNAL ERROR] transaction table lock poisoned, cannot recover from this - aborting";

/// A single in-flight transaction: who asked, and when.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TransactionEntry {
    pub client: SocketAddr,
    pub created_at: Instant,
}

/// The map from transaction ID to the client that sent the query,
/// wrapped so it can be shared between tasks.
///
/// Invoking `clone` gives a new handle which refers to the same
/// underlying table.  Readers may proceed concurrently; writers get
/// the table to themselves.
#[derive(Debug, Clone, Default)]
pub struct SharedTransactionTable {
    table: Arc<RwLock<HashMap<u16, TransactionEntry>>>,
}

impl SharedTransactionTable {
    /// Make a new, empty, shared table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction.  An existing entry with the same ID is
    /// overwritten.
    pub fn store(&self, id: u16, entry: TransactionEntry) {
        self.table
            .write()
            .expect(LOCK_POISON_MESSAGE)
            .insert(id, entry);
    }

    /// Look up a transaction without removing it.
    pub fn load(&self, id: u16) -> Option<TransactionEntry> {
        self.table
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .get(&id)
            .copied()
    }

    /// Claim a transaction: look it up and remove it in one step, so
    /// two workers handling the same reply cannot both relay it.
    pub fn remove(&self, id: u16) -> Option<TransactionEntry> {
        self.table
            .write()
            .expect(LOCK_POISON_MESSAGE)
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.table.read().expect(LOCK_POISON_MESSAGE).len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().expect(LOCK_POISON_MESSAGE).is_empty()
    }

    /// Remove every entry at least `ttl` old, returning how many went.
    ///
    /// Candidates are gathered under the read lock and then removed
    /// one write lock at a time, so readers are never shut out for a
    /// whole sweep.  An entry replaced between the two steps has a
    /// fresh timestamp and is left alone.
    pub fn remove_expired(&self, ttl: Duration) -> usize {
        let now = Instant::now();

        let expired: Vec<u16> = self
            .table
            .read()
            .expect(LOCK_POISON_MESSAGE)
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.created_at) >= ttl)
            .map(|(id, _)| *id)
            .collect();

        let mut removed = 0;
        for id in expired {
            let mut table = self.table.write().expect(LOCK_POISON_MESSAGE);
            if let Some(entry) = table.get(&id) {
                if now.duration_since(entry.created_at) >= ttl {
                    table.remove(&id);
                    removed += 1;
                }
            }
        }
        removed
    }
}

/// Periodically drop transactions whose reply never came.
///
/// A query whose upstream goes quiet would otherwise leave its entry
/// behind forever.  Runs until the token is cancelled.
pub async fn evict_expired_task(
    table: SharedTransactionTable,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => return,
            () = sleep(interval) => {}
        }

        let removed = table.remove_expired(ttl);
        if removed > 0 {
            tracing::info!(removed, "evicted expired transactions");
        }
    }
}
