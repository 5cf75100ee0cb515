use serde::{Deserialize, Serialize};

/// Snapshot of spatial index occupancy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Entities currently indexed
    pub entities: usize,
    /// Quadtree leaves, or occupied geohash buckets
    pub cells: usize,
    /// Deepest quadtree level reached, or the geohash storage precision
    pub max_depth: usize,
    /// Delete tombstones retained for out-of-order protection
    pub tombstones: usize,
}

/// Query result cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because their TTL had elapsed
    pub expired: u64,
    /// Entries dropped to respect the capacity bound
    pub evicted: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of lookups served from cache, rounded to three places.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        (self.hits as f64 / total as f64 * 1000.0).round() / 1000.0
    }
}

/// Counters kept by the query coordinator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryStats {
    pub searches: u64,
    /// Index range queries actually executed (cache misses that led a flight)
    pub index_queries: u64,
    /// Requests that joined another request's in-flight computation
    pub coalesced: u64,
    pub timeouts: u64,
}

/// Outcome counters kept by the index synchronizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub applied: u64,
    pub stale: u64,
    pub duplicate: u64,
    pub not_found: u64,
    pub rejected: u64,
}

impl SyncStats {
    pub fn total(&self) -> u64 {
        self.applied + self.stale + self.duplicate + self.not_found + self.rejected
    }
}

/// Everything a running service reports, in one serializable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub index: IndexStats,
    pub cache: CacheStats,
    pub query: QueryStats,
    pub sync: SyncStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.hits = 2;
        stats.misses = 1;
        assert_eq!(stats.hit_rate(), 0.667);
    }

    #[test]
    fn test_sync_total() {
        let stats = SyncStats {
            applied: 3,
            stale: 1,
            duplicate: 1,
            not_found: 0,
            rejected: 2,
        };
        assert_eq!(stats.total(), 7);
    }
}
