//! Per-pool prepared-statement bookkeeping.
//!
//! Statement objects live per physical connection (the driver caches
//! those); this layer keeps one recency-ordered key set per schema pool.
//! Multi-tenant workloads interpolate schema-qualified identifiers into
//! their SQL, so every tenant produces a distinct key population - the
//! cap bounds each pool's set independently, and the counters feed the
//! pool manager's metrics snapshot.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use deadpool_postgres::{Object, Transaction};
use indexmap::IndexSet;
use serde::Serialize;
use tokio_postgres::Statement;
use tracing::debug;

use crate::error::PgResult;

/// Counters over one pool's statement cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatementCacheStats {
    /// Distinct statements currently tracked.
    pub cached: usize,
    /// Calls that reused a tracked statement.
    pub hits: u64,
    /// Calls that tracked a new statement.
    pub misses: u64,
    /// Keys dropped because the cache was full.
    pub evictions: u64,
}

/// Recency-ordered statement key set for one schema's pool.
pub struct StatementCache {
    max_size: usize,
    /// Insertion order doubles as recency order: front is coldest.
    keys: Mutex<IndexSet<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl StatementCache {
    /// Create a cache bounded to `max_size` distinct statements.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            keys: Mutex::new(IndexSet::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Prepare `sql` on a pooled client, tracking the key.
    pub async fn prepare(&self, client: &Object, sql: &str) -> PgResult<Statement> {
        self.touch(sql);
        let stmt = client.prepare_cached(sql).await?;
        Ok(stmt)
    }

    /// Prepare `sql` inside a transaction, tracking the key.
    pub async fn prepare_in_txn(
        &self,
        txn: &Transaction<'_>,
        sql: &str,
    ) -> PgResult<Statement> {
        self.touch(sql);
        let stmt = txn.prepare_cached(sql).await?;
        Ok(stmt)
    }

    /// Record a use of `sql`, evicting the coldest key when full.
    fn touch(&self, sql: &str) {
        let mut keys = self.keys.lock().unwrap();
        if let Some(index) = keys.get_index_of(sql) {
            // Move to the back so recently used keys survive eviction.
            let last = keys.len() - 1;
            keys.move_index(index, last);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if keys.len() >= self.max_size && keys.shift_remove_index(0).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(sql = %sql, "statement cache full, evicted coldest key");
        }
        keys.insert(sql.to_string());
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> StatementCacheStats {
        StatementCacheStats {
            cached: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop every tracked key. Counters are kept.
    pub fn clear(&self) {
        self.keys.lock().unwrap().clear();
        debug!("statement cache cleared");
    }

    /// Number of tracked statement keys.
    pub fn len(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of tracked keys.
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl std::fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("max_size", &self.max_size)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_creation() {
        let cache = StatementCache::new(100);
        assert_eq!(cache.max_size(), 100);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_hits_and_misses() {
        let cache = StatementCache::new(100);
        cache.touch("SELECT 1");
        cache.touch("SELECT 1");
        cache.touch("SELECT 2");

        let stats = cache.stats();
        assert_eq!(stats.cached, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.evictions, 0);
    }

    #[test]
    fn test_eviction_drops_coldest_key() {
        let cache = StatementCache::new(2);
        cache.touch("SELECT 1");
        cache.touch("SELECT 2");
        // Reuse "SELECT 1" so "SELECT 2" becomes the coldest key.
        cache.touch("SELECT 1");
        cache.touch("SELECT 3");

        let keys = cache.keys.lock().unwrap();
        assert!(keys.contains("SELECT 1"));
        assert!(!keys.contains("SELECT 2"));
        assert!(keys.contains("SELECT 3"));
        drop(keys);

        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_clear_keeps_counters() {
        let cache = StatementCache::new(10);
        cache.touch("SELECT 1");
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().misses, 1);
    }
}
