//! In-memory record cache backed by periodic membership snapshots.
//!
//! The table is only ever replaced whole: a refresh builds the next table
//! outside the lock and swaps the pointer under a short write lock, so a
//! lookup sees either the previous complete table or the new one.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

use crate::metrics;
use crate::records::{Record, RecordTable};

/// Thread-safe record cache.
#[derive(Debug, Clone, Default)]
pub struct RecordCache {
    inner: Arc<RwLock<RecordCacheInner>>,
}

#[derive(Debug, Default)]
struct RecordCacheInner {
    /// Current FQDN -> record table.
    table: Arc<RecordTable>,

    /// Number of completed refreshes (also used as SOA-style serial).
    generation: u64,

    /// Wall-clock time of the last swap.
    last_refresh: Option<SystemTime>,
}

impl RecordCache {
    /// Create an empty cache. Nothing resolves until the first `replace`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup the record for a fully-qualified name (trailing dot).
    pub fn lookup(&self, fqdn: &str) -> Option<Record> {
        let inner = self.inner.read();
        inner.table.get(fqdn).copied()
    }

    /// Swap in a freshly built table.
    pub fn replace(&self, table: RecordTable) {
        let table = Arc::new(table);
        let records = table.len();
        {
            let mut inner = self.inner.write();
            inner.table = table;
            inner.generation = inner.generation.wrapping_add(1);
            inner.last_refresh = Some(SystemTime::now());
        }
        metrics::record_table_size(records);
        debug!(records, "replaced record table");
    }

    /// Current table, shared without copying.
    pub fn snapshot(&self) -> Arc<RecordTable> {
        self.inner.read().table.clone()
    }

    /// True once at least one table has been installed.
    pub fn is_ready(&self) -> bool {
        self.inner.read().generation > 0
    }

    /// Number of completed refreshes.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Time of the last successful refresh.
    pub fn last_refresh(&self) -> Option<SystemTime> {
        self.inner.read().last_refresh
    }

    /// Number of names currently served.
    pub fn len(&self) -> usize {
        self.inner.read().table.len()
    }

    /// True when no names are served.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
