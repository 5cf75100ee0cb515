//! In-memory backing store.

use super::BackingStore;
use crate::error::{ProximityError, Result};
use parking_lot::RwLock;
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::{EntityId, EntityRecord};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory system of record, for tests, demos and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<FxHashMap<EntityId, EntityRecord>>,
    offline: AtomicBool,
    scans: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EntityRecord>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Stores `record`, returning the record it replaced.
    pub fn put(&self, record: EntityRecord) -> Option<EntityRecord> {
        self.records.write().insert(record.id.clone(), record)
    }

    pub fn delete(&self, id: &EntityId) -> Option<EntityRecord> {
        self.records.write().remove(id)
    }

    pub fn get(&self, id: &EntityId) -> Option<EntityRecord> {
        self.records.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// While offline every scan fails as unavailable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Number of region scans served so far.
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }
}

impl BackingStore for MemoryStore {
    fn fetch_entities_by_region(&self, bbox: &BoundingBox) -> Result<Vec<EntityRecord>> {
        if self.offline.load(Ordering::Acquire) {
            return Err(ProximityError::IndexUnavailable(
                "backing store is offline".to_string(),
            ));
        }
        self.scans.fetch_add(1, Ordering::Relaxed);
        let mut records: Vec<EntityRecord> = self
            .records
            .read()
            .values()
            .filter(|r| bbox.contains(&r.point()))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_scan() {
        let store = MemoryStore::with_records([
            EntityRecord::new("sf", 37.7764, -122.4172, "cafe", 1),
            EntityRecord::new("nyc", 40.7128, -74.0060, "cafe", 1),
        ]);
        let west = store
            .fetch_entities_by_region(&BoundingBox::new(30.0, -130.0, 45.0, -110.0))
            .unwrap();
        assert_eq!(west.len(), 1);
        assert_eq!(west[0].id.as_str(), "sf");
        assert_eq!(store.fetch_all().unwrap().len(), 2);
        assert_eq!(store.scan_count(), 2);
    }

    #[test]
    fn test_offline_scan_is_retryable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.fetch_all().unwrap_err();
        assert!(err.is_retryable());
        store.set_offline(false);
        assert!(store.fetch_all().unwrap().is_empty());
    }

    #[test]
    fn test_put_delete() {
        let store = MemoryStore::new();
        assert!(store.put(EntityRecord::new("a", 0.0, 0.0, "", 1)).is_none());
        let old = store.put(EntityRecord::new("a", 1.0, 1.0, "", 2)).unwrap();
        assert_eq!(old.version, 1);
        assert!(store.delete(&EntityId::new("a")).is_some());
        assert!(store.is_empty());
    }
}
