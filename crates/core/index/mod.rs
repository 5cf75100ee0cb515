//! The spatial index: authoritative in-memory store of entity positions.
//!
//! [`SpatialIndex`] owns a pluggable [`SpatialBackend`] (quadtree or geohash)
//! together with the id → record map the candidate filter reads exact
//! coordinates from. Both sit behind a single readers-writer lock, so reads
//! never block each other and a write is one short critical section.

pub mod geohash;
pub mod quadtree;

pub use geohash::GeohashIndex;
pub use quadtree::QuadTree;

use crate::compute::spatial::SearchCircle;
use crate::compute::validation::{validate_bbox, validate_point, validate_radius, validate_record};
use crate::config::{BackendKind, Config};
use crate::deadline::Deadline;
use crate::error::{ProximityError, Result};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::{EntityId, EntityRecord};
use proxima_types::geo::GeoPoint;
use proxima_types::stats::IndexStats;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;

/// Region structure that maps points to candidate ids.
///
/// Backends only know ids and positions. Uniqueness, categories and versions
/// are enforced by [`SpatialIndex`] before a backend is touched.
pub trait SpatialBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn insert(&mut self, id: EntityId, point: GeoPoint) -> Result<()>;

    /// Removes `id`, which was inserted at `point`. Returns false if absent.
    fn remove(&mut self, id: &EntityId, point: &GeoPoint) -> bool;

    /// Appends every id whose cell intersects the circle. May include ids
    /// outside the circle but never omits one inside it.
    fn query_circle(&self, circle: &SearchCircle, out: &mut Vec<EntityId>);

    /// Appends every id whose point lies inside `bbox` (inclusive).
    fn query_bbox(&self, bbox: &BoundingBox, out: &mut Vec<EntityId>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Leaf cells (quadtree) or occupied buckets (geohash).
    fn cell_count(&self) -> usize;

    /// Deepest quadtree level, or the geohash storage precision.
    fn max_depth(&self) -> usize;

    fn clear(&mut self);
}

/// Builds the backend selected in `config`.
pub fn new_backend(config: &Config) -> Box<dyn SpatialBackend> {
    match config.backend {
        BackendKind::Quadtree => Box::new(QuadTree::new(
            config.quadtree_capacity,
            config.quadtree_max_depth,
        )),
        BackendKind::Geohash => Box::new(GeohashIndex::new(config.geohash_precision)),
    }
}

/// A version-guarded mutation, as produced by the index synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexChange {
    /// Create or move an entity. A `None` category keeps the current one.
    Upsert {
        id: EntityId,
        point: GeoPoint,
        category: Option<String>,
        version: u64,
    },
    Delete {
        id: EntityId,
        version: u64,
    },
}

impl IndexChange {
    pub fn upsert(record: &EntityRecord) -> Self {
        Self::Upsert {
            id: record.id.clone(),
            point: record.point(),
            category: Some(record.category.clone()),
            version: record.version,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Upsert { version, .. } | Self::Delete { version, .. } => *version,
        }
    }
}

/// Result of applying one change. None of these are errors: under
/// at-least-once delivery stale and repeated events are expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    Applied,
    /// Older than what is indexed (or than the entity's tombstone).
    Stale,
    /// Same version as what is indexed.
    Duplicate,
    /// Delete of an entity that is not indexed. A tombstone is still kept.
    NotFound,
    /// Failed validation; produced by the synchronizer.
    Rejected,
}

/// Availability of the index for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Constructed but not yet populated from the backing store.
    Loading,
    Ready,
    /// Shut down. Terminal.
    Closed,
}

impl IndexState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Loading,
            1 => Self::Ready,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    version: u64,
    deleted_at: Instant,
}

impl Tombstone {
    fn new(version: u64) -> Self {
        Self {
            version,
            deleted_at: Instant::now(),
        }
    }
}

/// Mutation recorded while a rebuild is scanning, replayed onto the new state.
#[derive(Debug, Clone)]
enum Journaled {
    Put(EntityRecord),
    Delete(EntityId),
    Versioned(IndexChange),
}

struct IndexData {
    backend: Box<dyn SpatialBackend>,
    entities: FxHashMap<EntityId, EntityRecord>,
    tombstones: FxHashMap<EntityId, Tombstone>,
}

impl IndexData {
    fn new(backend: Box<dyn SpatialBackend>) -> Self {
        Self {
            backend,
            entities: FxHashMap::default(),
            tombstones: FxHashMap::default(),
        }
    }

    /// Remove-then-insert. Callers validate the record first.
    fn put(&mut self, record: EntityRecord) -> Result<Option<EntityRecord>> {
        if let Some(old) = self.entities.get(&record.id) {
            self.backend.remove(&old.id, &old.point());
        }
        self.backend.insert(record.id.clone(), record.point())?;
        Ok(self.entities.insert(record.id.clone(), record))
    }

    fn delete(&mut self, id: &EntityId) -> Option<EntityRecord> {
        let old = self.entities.remove(id)?;
        self.backend.remove(&old.id, &old.point());
        Some(old)
    }

    fn apply(&mut self, change: &IndexChange) -> Result<ApplyOutcome> {
        match change {
            IndexChange::Upsert {
                id,
                point,
                category,
                version,
            } => {
                let current_category = match self.entities.get(id) {
                    Some(current) if *version < current.version => return Ok(ApplyOutcome::Stale),
                    Some(current) if *version == current.version => {
                        return Ok(ApplyOutcome::Duplicate);
                    }
                    Some(current) => Some(current.category.clone()),
                    None => {
                        if self.tombstones.get(id).is_some_and(|t| *version <= t.version) {
                            return Ok(ApplyOutcome::Stale);
                        }
                        None
                    }
                };
                let record = EntityRecord {
                    id: id.clone(),
                    latitude: point.lat(),
                    longitude: point.lon(),
                    category: category.clone().or(current_category).unwrap_or_default(),
                    version: *version,
                };
                self.tombstones.remove(id);
                self.put(record)?;
                Ok(ApplyOutcome::Applied)
            }
            IndexChange::Delete { id, version } => {
                if let Some(current) = self.entities.get(id) {
                    // A delete may carry the version of the last update.
                    if *version < current.version {
                        return Ok(ApplyOutcome::Stale);
                    }
                    self.delete(id);
                    self.tombstones.insert(id.clone(), Tombstone::new(*version));
                    return Ok(ApplyOutcome::Applied);
                }
                match self.tombstones.get(id) {
                    Some(t) if t.version == *version => Ok(ApplyOutcome::Duplicate),
                    Some(t) if t.version > *version => Ok(ApplyOutcome::Stale),
                    _ => {
                        self.tombstones.insert(id.clone(), Tombstone::new(*version));
                        Ok(ApplyOutcome::NotFound)
                    }
                }
            }
        }
    }

    fn replay(&mut self, entry: &Journaled) -> Result<()> {
        match entry {
            Journaled::Put(record) => {
                self.tombstones.remove(&record.id);
                self.put(record.clone())?;
            }
            Journaled::Delete(id) => {
                self.delete(id);
            }
            Journaled::Versioned(change) => {
                self.apply(change)?;
            }
        }
        Ok(())
    }
}

/// Read access to a consistent snapshot of the index.
///
/// Holds the read lock for its lifetime, so the candidate filter sees the
/// same entity store the backend answered from.
pub struct IndexReader<'a> {
    data: RwLockReadGuard<'a, IndexData>,
}

impl IndexReader<'_> {
    /// Candidate ids for a circle query, optionally narrowed to a category.
    ///
    /// An over-approximation: may include ids outside the circle, never
    /// omits one inside it.
    pub fn range_query(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        category: Option<&str>,
    ) -> Result<Vec<EntityId>> {
        validate_point(center)?;
        validate_radius(radius_m)?;

        let mut candidates = Vec::new();
        self.data
            .backend
            .query_circle(&SearchCircle::new(*center, radius_m), &mut candidates);
        if category.is_some() {
            candidates.retain(|id| {
                self.data
                    .entities
                    .get(id)
                    .is_some_and(|r| r.matches_category(category))
            });
        }
        Ok(candidates)
    }

    /// Ids whose point lies inside `bbox`, optionally narrowed to a category.
    pub fn range_query_bbox(
        &self,
        bbox: &BoundingBox,
        category: Option<&str>,
    ) -> Result<Vec<EntityId>> {
        validate_bbox(bbox)?;

        let mut candidates = Vec::new();
        self.data.backend.query_bbox(bbox, &mut candidates);
        if category.is_some() {
            candidates.retain(|id| {
                self.data
                    .entities
                    .get(id)
                    .is_some_and(|r| r.matches_category(category))
            });
        }
        Ok(candidates)
    }

    pub fn get(&self, id: &EntityId) -> Option<&EntityRecord> {
        self.data.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.data.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.entities.is_empty()
    }
}

/// Clears the rebuild flag and the journal however a rebuild ends.
struct RebuildGuard<'a> {
    index: &'a SpatialIndex,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        let mut journal = self.index.journal.lock();
        *journal = None;
        self.index.rebuilding.store(false, Ordering::Release);
    }
}

/// Shared spatial index service.
///
/// Constructed explicitly and passed around by `Arc`; see
/// [`ProximityBuilder`](crate::builder::ProximityBuilder) for the usual
/// start-up path.
pub struct SpatialIndex {
    inner: RwLock<IndexData>,
    state: AtomicU8,
    journal: Mutex<Option<Vec<Journaled>>>,
    rebuilding: AtomicBool,
    config: Config,
}

impl SpatialIndex {
    /// An empty index that is immediately ready for queries.
    pub fn new(config: &Config) -> Self {
        Self::with_state(config, IndexState::Ready)
    }

    /// An empty index that rejects queries until the first
    /// [`rebuild`](Self::rebuild) completes.
    pub fn loading(config: &Config) -> Self {
        Self::with_state(config, IndexState::Loading)
    }

    fn with_state(config: &Config, state: IndexState) -> Self {
        Self {
            inner: RwLock::new(IndexData::new(new_backend(config))),
            state: AtomicU8::new(state as u8),
            journal: Mutex::new(None),
            rebuilding: AtomicBool::new(false),
            config: config.clone(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.config.backend
    }

    pub fn state(&self) -> IndexState {
        IndexState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_available(&self) -> bool {
        self.state() == IndexState::Ready
    }

    fn check_available(&self) -> Result<()> {
        match self.state() {
            IndexState::Ready => Ok(()),
            IndexState::Loading => Err(ProximityError::IndexUnavailable(
                "index is still loading".to_string(),
            )),
            IndexState::Closed => Err(ProximityError::IndexUnavailable(
                "index is closed".to_string(),
            )),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.state() == IndexState::Closed {
            return Err(ProximityError::IndexUnavailable(
                "index is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Records a mutation for replay if a rebuild is in progress. Called with
    /// the write lock held, which orders it against the rebuild swap.
    ///
    /// The flag only changes while the journal mutex is held, so a writer
    /// that sees it set always finds the journal open.
    fn record_for_replay(&self, entry: impl FnOnce() -> Journaled) {
        if !self.rebuilding.load(Ordering::Acquire) {
            return;
        }
        if let Some(journal) = self.journal.lock().as_mut() {
            journal.push(entry());
        }
    }

    /// Acquires a read snapshot, waiting for the lock no longer than the
    /// deadline allows.
    pub fn read(&self, deadline: &Deadline) -> Result<IndexReader<'_>> {
        self.check_available()?;
        let data = match deadline.at() {
            Some(at) => self
                .inner
                .try_read_until(at)
                .ok_or_else(|| deadline.timeout_error("index_lock"))?,
            None => self.inner.read(),
        };
        Ok(IndexReader { data })
    }

    /// See [`IndexReader::range_query`].
    pub fn range_query(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        category: Option<&str>,
    ) -> Result<Vec<EntityId>> {
        self.read(&Deadline::none())?
            .range_query(center, radius_m, category)
    }

    /// See [`IndexReader::range_query_bbox`].
    pub fn range_query_bbox(
        &self,
        bbox: &BoundingBox,
        category: Option<&str>,
    ) -> Result<Vec<EntityId>> {
        self.read(&Deadline::none())?
            .range_query_bbox(bbox, category)
    }

    pub fn get(&self, id: &EntityId) -> Option<EntityRecord> {
        self.inner.read().entities.get(id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.inner.read().entities.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a new entity.
    ///
    /// Fails with [`ProximityError::DuplicateEntity`] if the id is already
    /// indexed; use [`upsert`](Self::upsert) to move an existing entity.
    pub fn insert(&self, record: EntityRecord) -> Result<()> {
        validate_record(&record)?;
        self.check_writable()?;

        let mut data = self.inner.write();
        if data.entities.contains_key(&record.id) {
            return Err(ProximityError::DuplicateEntity(record.id));
        }
        data.tombstones.remove(&record.id);
        data.put(record.clone())?;
        self.record_for_replay(|| Journaled::Put(record));
        Ok(())
    }

    /// Removes an entity, returning its last record.
    pub fn remove(&self, id: &EntityId) -> Result<EntityRecord> {
        self.check_writable()?;

        let mut data = self.inner.write();
        let old = data
            .delete(id)
            .ok_or_else(|| ProximityError::NotFound(id.clone()))?;
        self.record_for_replay(|| Journaled::Delete(id.clone()));
        Ok(old)
    }

    /// Inserts or replaces an entity regardless of version. Returns the
    /// replaced record, if any.
    pub fn upsert(&self, record: EntityRecord) -> Result<Option<EntityRecord>> {
        validate_record(&record)?;
        self.check_writable()?;

        let mut data = self.inner.write();
        data.tombstones.remove(&record.id);
        let old = data.put(record.clone())?;
        self.record_for_replay(|| Journaled::Put(record));
        Ok(old)
    }

    /// Applies a change only if it is newer than what the index holds.
    ///
    /// The version comparison and the mutation happen under one write lock,
    /// so concurrent appliers cannot interleave between check and write.
    /// Deletes leave a tombstone so that an older create or update arriving
    /// afterwards cannot bring the entity back.
    pub fn apply_versioned(&self, change: IndexChange) -> Result<ApplyOutcome> {
        if change.id().as_str().is_empty() {
            return Err(ProximityError::InvalidQuery(
                "Entity id must not be empty".to_string(),
            ));
        }
        if let IndexChange::Upsert { point, .. } = &change {
            validate_point(point)?;
        }
        self.check_writable()?;

        let mut data = self.inner.write();
        let outcome = data.apply(&change)?;
        if matches!(outcome, ApplyOutcome::Applied | ApplyOutcome::NotFound) {
            self.record_for_replay(|| Journaled::Versioned(change));
        }
        Ok(outcome)
    }

    /// Drops tombstones older than the configured retention. Returns how
    /// many were dropped.
    pub fn purge_tombstones(&self) -> usize {
        let retention = self.config.tombstone_retention();
        let mut data = self.inner.write();
        let before = data.tombstones.len();
        data.tombstones
            .retain(|_, t| t.deleted_at.elapsed() < retention);
        before - data.tombstones.len()
    }

    /// Replaces the index contents with `records`.
    pub fn rebuild(&self, records: Vec<EntityRecord>) -> Result<usize> {
        self.rebuild_with(|| Ok(records))
    }

    /// Rebuilds from a fresh scan without blocking readers.
    ///
    /// Mutations applied while `scan` runs and the new state is built are
    /// journaled and replayed onto the new state before it is swapped in.
    /// Tombstones carry over, so a scan that still contains a deleted entity
    /// does not revive it. Only the replay and the swap hold the write lock.
    pub fn rebuild_with<F>(&self, scan: F) -> Result<usize>
    where
        F: FnOnce() -> Result<Vec<EntityRecord>>,
    {
        self.check_writable()?;
        {
            let mut journal = self.journal.lock();
            if self
                .rebuilding
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(ProximityError::IndexUnavailable(
                    "rebuild already in progress".to_string(),
                ));
            }
            *journal = Some(Vec::new());
        }
        let _guard = RebuildGuard { index: self };

        let records = scan()?;
        let scanned = records.len();
        let mut fresh = IndexData::new(new_backend(&self.config));
        let mut skipped = 0usize;
        for record in records {
            if let Err(e) = validate_record(&record) {
                log::warn!("skipping invalid record during rebuild: {}", e);
                skipped += 1;
                continue;
            }
            let newer = fresh
                .entities
                .get(&record.id)
                .is_none_or(|current| record.version > current.version);
            if newer {
                fresh.put(record)?;
            }
        }

        let mut data = self.inner.write();
        self.check_writable()?;

        for (id, tombstone) in &data.tombstones {
            let superseded = fresh
                .entities
                .get(id)
                .is_some_and(|r| r.version <= tombstone.version);
            if superseded {
                fresh.delete(id);
            }
            fresh.tombstones.insert(id.clone(), *tombstone);
        }

        let journal = self.journal.lock().take().unwrap_or_default();
        for entry in &journal {
            fresh.replay(entry)?;
        }

        *data = fresh;
        let total = data.entities.len();
        drop(data);

        let _ = self.state.compare_exchange(
            IndexState::Loading as u8,
            IndexState::Ready as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        log::info!(
            "rebuilt {:?} index: {} entities from {} scanned ({} skipped, {} journaled changes replayed)",
            self.config.backend,
            total,
            scanned,
            skipped,
            journal.len()
        );
        Ok(total)
    }

    /// Shuts the index down and frees its contents. Queries and writes fail
    /// with [`ProximityError::IndexUnavailable`] from here on.
    pub fn close(&self) {
        self.state.store(IndexState::Closed as u8, Ordering::Release);
        let mut data = self.inner.write();
        data.backend.clear();
        data.entities.clear();
        data.tombstones.clear();
        log::info!("spatial index closed");
    }

    pub fn stats(&self) -> IndexStats {
        let data = self.inner.read();
        IndexStats {
            entities: data.entities.len(),
            cells: data.backend.cell_count(),
            max_depth: data.backend.max_depth(),
            tombstones: data.tombstones.len(),
        }
    }
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("backend", &self.config.backend)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
