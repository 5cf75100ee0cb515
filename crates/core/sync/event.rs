//! Entity lifecycle events from the system of record's change feed.

use crate::error::{ProximityError, Result};
use crate::index::IndexChange;
use proxima_types::entity::{EntityId, EntityRecord};
use proxima_types::geo::GeoPoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// One change-feed record.
///
/// # Examples
///
/// ```
/// use proxima::sync::{EventKind, MutationEvent};
///
/// let line = r#"{"event_type":"updated","entity_id":"cafe-1","latitude":37.7764,"longitude":-122.4172,"version":4}"#;
/// let event = MutationEvent::from_json(line).unwrap();
/// assert_eq!(event.event_type, EventKind::Updated);
/// assert_eq!(event.version, 4);
/// assert!(event.category.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub event_type: EventKind,
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub version: u64,
}

impl MutationEvent {
    pub fn created(record: &EntityRecord) -> Self {
        Self::located(EventKind::Created, record)
    }

    pub fn updated(record: &EntityRecord) -> Self {
        Self::located(EventKind::Updated, record)
    }

    pub fn deleted(entity_id: impl Into<EntityId>, version: u64) -> Self {
        Self {
            event_type: EventKind::Deleted,
            entity_id: entity_id.into(),
            latitude: None,
            longitude: None,
            category: None,
            version,
        }
    }

    fn located(event_type: EventKind, record: &EntityRecord) -> Self {
        Self {
            event_type,
            entity_id: record.id.clone(),
            latitude: Some(record.latitude),
            longitude: Some(record.longitude),
            category: Some(record.category.clone()),
            version: record.version,
        }
    }

    /// Parses one JSON line of the feed.
    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The version-guarded index change this event asks for.
    ///
    /// Creates and updates are both upserts; which one arrives first is
    /// decided by version, not by kind. Both require coordinates.
    pub fn to_change(&self) -> Result<IndexChange> {
        match self.event_type {
            EventKind::Created | EventKind::Updated => {
                let (Some(latitude), Some(longitude)) = (self.latitude, self.longitude) else {
                    return Err(ProximityError::InvalidQuery(format!(
                        "{:?} event for {} is missing coordinates",
                        self.event_type, self.entity_id
                    )));
                };
                Ok(IndexChange::Upsert {
                    id: self.entity_id.clone(),
                    point: GeoPoint::new(latitude, longitude),
                    category: self.category.clone(),
                    version: self.version,
                })
            }
            EventKind::Deleted => Ok(IndexChange::Delete {
                id: self.entity_id.clone(),
                version: self.version,
            }),
        }
    }
}
