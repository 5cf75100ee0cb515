//! The assembled proximity service.

use crate::cache::QueryCache;
use crate::config::Config;
use crate::error::{ProximityError, Result};
use crate::index::SpatialIndex;
use crate::query::{QueryCoordinator, SearchRequest, SearchResponse};
use crate::storage::BackingStore;
use crate::sync::{IndexSynchronizer, MutationEvent, SyncHandle};
use crossbeam_channel::Receiver;
use geo::Polygon;
use proxima_types::stats::ServiceStats;
use std::fmt;
use std::sync::Arc;

/// Index, cache, coordinator and synchronizer sharing one configuration.
///
/// Built once at process start with
/// [`ProximityBuilder`](crate::builder::ProximityBuilder) and torn down with
/// [`shutdown`](Self::shutdown). The parts are reference counted, so
/// handing them to other threads does not tie their lifetime to this value.
pub struct ProximityService {
    config: Config,
    index: Arc<SpatialIndex>,
    cache: Arc<QueryCache>,
    coordinator: Arc<QueryCoordinator>,
    synchronizer: IndexSynchronizer,
    store: Option<Arc<dyn BackingStore>>,
}

impl ProximityService {
    pub(crate) fn new(
        config: Config,
        index: Arc<SpatialIndex>,
        cache: Arc<QueryCache>,
        coordinator: Arc<QueryCoordinator>,
        synchronizer: IndexSynchronizer,
        store: Option<Arc<dyn BackingStore>>,
    ) -> Self {
        Self {
            config,
            index,
            cache,
            coordinator,
            synchronizer,
            store,
        }
    }

    /// See [`QueryCoordinator::search`].
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.coordinator.search(request)
    }

    /// See [`QueryCoordinator::search_polygon`].
    pub fn search_polygon(
        &self,
        polygon: &Polygon<f64>,
        category: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<SearchResponse> {
        self.coordinator
            .search_polygon(polygon, category, limit, offset)
    }

    /// Starts consuming a change feed with the configured number of workers.
    pub fn start_sync(&self, feed: Receiver<MutationEvent>) -> Result<SyncHandle> {
        self.synchronizer.run(feed)
    }

    /// Re-scans the backing store and swaps the result in without blocking
    /// readers. Cached results are dropped afterwards.
    pub fn rebuild(&self) -> Result<usize> {
        let store = self.store.as_ref().ok_or_else(|| {
            ProximityError::InvalidConfig("rebuild needs a backing store".to_string())
        })?;
        let total = self.index.rebuild_with(|| store.fetch_all())?;
        self.cache.clear();
        log::info!("rebuild complete, cache cleared ({} entities)", total);
        Ok(total)
    }

    /// Drops expired cache entries and tombstones past their retention.
    /// Returns `(cache entries, tombstones)` removed.
    pub fn purge_expired(&self) -> (usize, usize) {
        let entries = self.cache.purge_expired();
        let tombstones = self.index.purge_tombstones();
        if entries > 0 || tombstones > 0 {
            log::debug!(
                "purged {} expired cache entries and {} tombstones",
                entries,
                tombstones
            );
        }
        (entries, tombstones)
    }

    /// Closes the index and empties the cache. Searches fail with
    /// [`ProximityError::IndexUnavailable`] afterwards.
    pub fn shutdown(&self) {
        self.index.close();
        self.cache.clear();
        log::info!("proximity service shut down");
    }

    pub fn synchronizer(&self) -> &IndexSynchronizer {
        &self.synchronizer
    }

    pub fn index(&self) -> &Arc<SpatialIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<QueryCoordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            index: self.index.stats(),
            cache: self.cache.stats(),
            query: self.coordinator.stats(),
            sync: self.synchronizer.stats(),
        }
    }
}

impl fmt::Debug for ProximityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProximityService")
            .field("index", &self.index)
            .field("cache_entries", &self.cache.len())
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
