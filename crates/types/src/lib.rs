//! # proxima-types
//!
//! Core data types for the Proxima proximity search engine.
//!
//! - **Geographic types**: `GeoPoint`, `BoundingBox`
//! - **Entity types**: `EntityId`, `EntityRecord`, `SearchHit`
//! - **Statistics**: `IndexStats`, `CacheStats`, `QueryStats`, `SyncStats`, `ServiceStats`
//!
//! All types are serializable with Serde and built on top of the `geo` crate's
//! geometric primitives.
//!
//! ## Examples
//!
//! ```rust
//! use proxima_types::bbox::BoundingBox;
//! use proxima_types::entity::EntityRecord;
//!
//! let record = EntityRecord::new("cafe-1", 37.7764, -122.4172, "cafe", 1);
//! let sf = BoundingBox::new(37.70, -122.52, 37.83, -122.35);
//! assert!(sf.contains(&record.point()));
//! ```

pub mod bbox;
pub mod entity;
pub mod geo;
pub mod stats;
