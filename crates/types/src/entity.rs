//! Located entities and their identifiers.

use crate::geo::GeoPoint;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Opaque, stable entity identifier.
///
/// Backed by `Arc<str>` so candidate lists and cached results can hold ids
/// without copying the underlying string. Ordering is lexicographic and is
/// used as the deterministic tie-break between equidistant results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Arc<str>);

impl EntityId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

/// One locatable item as known to the system of record.
///
/// # Examples
///
/// ```
/// use proxima_types::entity::EntityRecord;
///
/// let cafe = EntityRecord::new("cafe-17", 37.7764, -122.4172, "cafe", 3);
/// assert_eq!(cafe.id.as_str(), "cafe-17");
/// assert_eq!(cafe.point().lat(), 37.7764);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub latitude: f64,
    pub longitude: f64,
    /// Short tag used for optional filtering.
    #[serde(default)]
    pub category: String,
    /// Monotonically increasing per entity; larger wins.
    pub version: u64,
}

impl EntityRecord {
    pub fn new(
        id: impl Into<EntityId>,
        latitude: f64,
        longitude: f64,
        category: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            category: category.into(),
            version,
        }
    }

    #[inline]
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Case-sensitive category match; `None` matches everything.
    #[inline]
    pub fn matches_category(&self, filter: Option<&str>) -> bool {
        filter.is_none_or(|category| self.category == category)
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: EntityId,
    /// Great-circle distance from the query center in meters.
    pub distance_m: f64,
}

impl SearchHit {
    pub fn new(id: impl Into<EntityId>, distance_m: f64) -> Self {
        Self {
            id: id.into(),
            distance_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_serializes_as_string() {
        let id = EntityId::new("place:42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"place:42\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_entity_id_ordering() {
        let mut ids = vec![EntityId::new("b"), EntityId::new("a"), EntityId::new("c")];
        ids.sort();
        let names: Vec<&str> = ids.iter().map(EntityId::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_category_match() {
        let record = EntityRecord::new("r1", 0.0, 0.0, "restaurant", 1);
        assert!(record.matches_category(None));
        assert!(record.matches_category(Some("restaurant")));
        assert!(!record.matches_category(Some("cafe")));
    }

    #[test]
    fn test_record_defaults_category() {
        let json = r#"{"id":"x","latitude":1.0,"longitude":2.0,"version":7}"#;
        let record: EntityRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.category, "");
        assert_eq!(record.version, 7);
    }

    #[test]
    fn test_search_hit_json() {
        let hit = SearchHit::new("cafe-1", 12.5);
        let json = serde_json::to_string(&hit).unwrap();
        assert_eq!(json, r#"{"id":"cafe-1","distance_m":12.5}"#);
    }
}
