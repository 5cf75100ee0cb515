//! In-memory geospatial proximity search with a swappable spatial index,
//! a TTL query cache and change-feed synchronization.
//!
//! ## Features
//! - **Spatial indexing**: adaptive quadtree or fixed-precision geohash
//!   buckets behind one [`SpatialBackend`] trait, antimeridian and pole aware
//! - **Exact ranking**: index candidates are over-approximate; every result
//!   is filtered by haversine distance and ordered by `(distance, id)`
//! - **Query cache**: normalized keys, lazy TTL expiry and single-flight
//!   protection against cache stampedes
//! - **Deadlines**: every request carries a timeout checked at each stage
//! - **Synchronization**: version-guarded, at-least-once change feed
//!   application with delete tombstones and non-blocking rebuilds
//!
//! ```rust
//! use proxima::prelude::*;
//!
//! let service = ProximityBuilder::new()
//!     .with_entities([
//!         EntityRecord::new("blue-bottle", 37.7764, -122.4172, "cafe", 1),
//!         EntityRecord::new("sightglass", 37.7751, -122.4087, "cafe", 1),
//!         EntityRecord::new("point-reyes", 37.9000, -122.9000, "park", 1),
//!     ])
//!     .build()?;
//!
//! let response = service.search(&SearchRequest::new(37.7749, -122.4194, 2_000.0))?;
//! let ids: Vec<&str> = response.results.iter().map(|hit| hit.id.as_str()).collect();
//! assert_eq!(ids, ["blue-bottle", "sightglass"]);
//!
//! // Change-feed events go straight to the index.
//! service
//!     .synchronizer()
//!     .apply(&MutationEvent::deleted("sightglass", 2));
//! assert!(service.index().get(&EntityId::new("sightglass")).is_none());
//! # Ok::<(), proxima::ProximityError>(())
//! ```

pub mod builder;
pub mod cache;
pub mod compute;
pub mod config;
pub mod deadline;
pub mod error;
pub mod index;
pub mod query;
pub mod retry;
pub mod service;
pub mod storage;
pub mod sync;

pub use builder::ProximityBuilder;
pub use error::{ProximityError, Result};
pub use service::ProximityService;

pub use cache::{CacheKey, QueryCache};
pub use config::{BackendKind, Config};
pub use deadline::Deadline;
pub use index::{ApplyOutcome, IndexChange, IndexState, SpatialBackend, SpatialIndex};
pub use query::{QueryCoordinator, SearchRequest, SearchResponse};
pub use retry::RetryPolicy;
pub use storage::{BackingStore, MemoryStore};
pub use sync::{EventKind, IndexSynchronizer, MutationEvent, SyncHandle};

pub use compute::spatial::haversine_distance;
pub use compute::validation;

pub use proxima_types::bbox::BoundingBox;
pub use proxima_types::entity::{EntityId, EntityRecord, SearchHit};
pub use proxima_types::geo::GeoPoint;
pub use proxima_types::stats::{CacheStats, IndexStats, QueryStats, ServiceStats, SyncStats};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{ProximityBuilder, ProximityError, ProximityService, Result};

    pub use crate::{BoundingBox, EntityId, EntityRecord, GeoPoint, SearchHit};

    pub use crate::{MutationEvent, SearchRequest, SearchResponse};

    pub use crate::{BackendKind, BackingStore, Config, MemoryStore, RetryPolicy};

    pub use geo::Polygon;

    pub use std::time::Duration;
}
