//! Service builder.
//!
//! Start-up goes through [`ProximityBuilder`]: validate the configuration,
//! load the index from a full scan of the backing store, then wire the
//! cache, coordinator and synchronizer around it.

use crate::cache::QueryCache;
use crate::config::Config;
use crate::error::{ProximityError, Result};
use crate::index::SpatialIndex;
use crate::query::QueryCoordinator;
use crate::service::ProximityService;
use crate::storage::BackingStore;
use crate::sync::IndexSynchronizer;
use proxima_types::entity::EntityRecord;
use std::sync::Arc;

/// Builder for a ready-to-query [`ProximityService`].
pub struct ProximityBuilder {
    config: Config,
    store: Option<Arc<dyn BackingStore>>,
    entities: Vec<EntityRecord>,
}

impl ProximityBuilder {
    /// A builder with default configuration and no backing store.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            store: None,
            entities: Vec::new(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// The system of record scanned at start-up and on
    /// [`ProximityService::rebuild`].
    pub fn backing_store(mut self, store: Arc<dyn BackingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Extra records loaded alongside the store scan. Where both carry the
    /// same id the higher version wins.
    pub fn with_entities(mut self, entities: impl IntoIterator<Item = EntityRecord>) -> Self {
        self.entities.extend(entities);
        self
    }

    /// Validates the configuration, performs the start-up scan and returns
    /// the service. A failed scan is returned as is (usually retryable).
    pub fn build(self) -> Result<ProximityService> {
        self.config
            .validate()
            .map_err(ProximityError::InvalidConfig)?;

        let config = self.config;
        let index = Arc::new(SpatialIndex::loading(&config));
        let store = self.store;
        let entities = self.entities;
        index.rebuild_with(|| {
            let mut records = match &store {
                Some(store) => store.fetch_all()?,
                None => Vec::new(),
            };
            records.extend(entities);
            Ok(records)
        })?;

        let cache = Arc::new(QueryCache::new(config.cache_max_entries));
        let coordinator = Arc::new(QueryCoordinator::new(
            Arc::clone(&index),
            Arc::clone(&cache),
            config.clone(),
        ));
        let synchronizer = IndexSynchronizer::new(Arc::clone(&index), config.sync_workers);

        log::info!(
            "proximity service ready: {:?} backend, {} entities, cache {}",
            config.backend,
            index.len(),
            if config.cache_enabled { "on" } else { "off" }
        );
        Ok(ProximityService::new(
            config,
            index,
            cache,
            coordinator,
            synchronizer,
            store,
        ))
    }
}

impl Default for ProximityBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use crate::index::IndexState;
    use crate::storage::MemoryStore;
    use proxima_types::entity::EntityId;

    #[test]
    fn test_builder_default() {
        let service = ProximityBuilder::new().build().unwrap();
        assert_eq!(service.index().state(), IndexState::Ready);
        assert!(service.index().is_empty());
    }

    #[test]
    fn test_builder_loads_store_and_entities() {
        let store = Arc::new(MemoryStore::with_records([
            EntityRecord::new("a", 10.0, 10.0, "cafe", 1),
            EntityRecord::new("b", 11.0, 11.0, "bar", 1),
        ]));
        let service = ProximityBuilder::new()
            .config(Config::default().with_backend(BackendKind::Geohash))
            .backing_store(store.clone())
            .with_entities([EntityRecord::new("a", 12.0, 12.0, "cafe", 2)])
            .build()
            .unwrap();

        assert_eq!(service.index().len(), 2);
        assert_eq!(service.index().backend_kind(), BackendKind::Geohash);
        assert_eq!(
            service.index().get(&EntityId::new("a")).unwrap().latitude,
            12.0
        );
        assert_eq!(store.scan_count(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.geohash_precision = 0;
        let err = ProximityBuilder::new().config(config).build().unwrap_err();
        assert!(matches!(err, ProximityError::InvalidConfig(_)));
    }

    #[test]
    fn test_offline_store_fails_startup() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let err = ProximityBuilder::new()
            .backing_store(store)
            .build()
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
