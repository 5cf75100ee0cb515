//! Backing store abstraction.
//!
//! The persistent store is the long-term system of record and lives outside
//! this crate. The index only needs one thing from it: a scan of the
//! entities inside a region, used for the start-up load and for rebuilds.

use crate::error::Result;
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::EntityRecord;

mod memory;

pub use memory::MemoryStore;

/// Read access to the system of record.
pub trait BackingStore: Send + Sync {
    /// Every entity whose position lies inside `bbox` (inclusive).
    ///
    /// A store that cannot serve the scan should fail with
    /// [`ProximityError::IndexUnavailable`](crate::error::ProximityError::IndexUnavailable)
    /// so callers know to retry.
    fn fetch_entities_by_region(&self, bbox: &BoundingBox) -> Result<Vec<EntityRecord>>;

    /// Full scan, used to (re)build the index.
    fn fetch_all(&self) -> Result<Vec<EntityRecord>> {
        self.fetch_entities_by_region(&BoundingBox::world())
    }
}
