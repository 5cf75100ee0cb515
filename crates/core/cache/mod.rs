//! TTL cache of materialized search results.
//!
//! Entries are stored in a sharded concurrent map, so unrelated keys never
//! contend on one lock. A value is an immutable `Arc<[CachedHit]>` swapped
//! in whole, so a reader sees either the old list or the new one.
//!
//! An entry holds every entity near its key's canonical center together with
//! its position, not a finished answer: each request re-ranks it from its own
//! center, so the rounding in [`CacheKey`] never leaks into results.
//!
//! Expiry is lazy: an expired entry is never returned and is dropped when it
//! is next read or by [`QueryCache::purge_expired`].

pub mod flight;
pub mod key;

pub use flight::{Flight, FlightGuard, Join, SingleFlight, WaitOutcome};
pub use key::CacheKey;

use dashmap::DashMap;
use proxima_types::entity::{EntityId, SearchHit};
use proxima_types::geo::GeoPoint;
use proxima_types::stats::CacheStats;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One cached entity: where it was when the entry was computed, and its
/// distance from the center the entry was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedHit {
    pub id: EntityId,
    pub point: GeoPoint,
    pub distance_m: f64,
}

impl CachedHit {
    pub fn new(id: impl Into<EntityId>, point: GeoPoint, distance_m: f64) -> Self {
        Self {
            id: id.into(),
            point,
            distance_m,
        }
    }

    pub fn into_hit(self) -> SearchHit {
        SearchHit {
            id: self.id,
            distance_m: self.distance_m,
        }
    }
}

/// Shared, immutable candidate list ordered by distance.
pub type CachedHits = Arc<[CachedHit]>;

#[derive(Debug, Clone)]
struct CacheEntry {
    hits: CachedHits,
    expires_at: Instant,
}

/// Query result cache with per-entry TTL and an optional entry bound.
#[derive(Debug)]
pub struct QueryCache {
    entries: DashMap<CacheKey, CacheEntry>,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl QueryCache {
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Returns the live entry for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<CachedHits> {
        let now = Instant::now();
        let stale = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.hits));
            }
            Some(_) => true,
            None => false,
        };
        // The read guard is released before touching the shard again.
        if stale
            && self
                .entries
                .remove_if(key, |_, entry| entry.expires_at <= now)
                .is_some()
        {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Like [`get`](Self::get) but leaves the statistics untouched.
    pub fn peek(&self, key: &CacheKey) -> Option<CachedHits> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| Arc::clone(&entry.hits))
    }

    /// Stores `hits` under `key` for `ttl`, replacing any previous value.
    pub fn set(&self, key: CacheKey, hits: CachedHits, ttl: Duration) {
        if let Some(max) = self.max_entries
            && self.entries.len() >= max
            && !self.entries.contains_key(&key)
        {
            self.make_room(max);
        }
        self.entries.insert(
            key,
            CacheEntry {
                hits,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Drops expired entries first; if still full, drops the entry closest
    /// to expiry.
    fn make_room(&self, max: usize) {
        self.purge_expired();
        while self.entries.len() >= max {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().expires_at)
                .map(|entry| entry.key().clone());
            let Some(victim) = victim else {
                break;
            };
            if self.entries.remove(&victim).is_some() {
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Removes `key`. Returns true if an entry was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drops every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        self.expired.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(None)
    }
}
