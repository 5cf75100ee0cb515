//! Error types for proximity search.

use proxima_types::entity::EntityId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProximityError>;

/// Every failure the core can report.
///
/// The type is `Clone` because one single-flight result is handed to every
/// request that joined the flight.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProximityError {
    /// Bad caller input. Not retryable.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The entity is not indexed. Used internally for idempotent removes.
    #[error("entity not found: {0}")]
    NotFound(EntityId),

    /// Insert of an id that is already indexed.
    #[error("entity already indexed: {0}")]
    DuplicateEntity(EntityId),

    /// The index cannot serve queries right now (loading, closed, or the
    /// backing store scan failed). Retryable with backoff.
    #[error("spatial index unavailable: {0}")]
    IndexUnavailable(String),

    /// The request deadline elapsed in the named stage. Retryable.
    #[error("query timed out during {stage} after {elapsed:?}")]
    Timeout {
        stage: &'static str,
        elapsed: Duration,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProximityError {
    /// Transient errors a caller may retry with exponential backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IndexUnavailable(_) | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for ProximityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProximityError::IndexUnavailable("loading".into()).is_retryable());
        assert!(
            ProximityError::Timeout {
                stage: "filter",
                elapsed: Duration::from_millis(5),
            }
            .is_retryable()
        );
        assert!(!ProximityError::InvalidQuery("radius".into()).is_retryable());
        assert!(!ProximityError::NotFound(EntityId::new("a")).is_retryable());
        assert!(!ProximityError::DuplicateEntity(EntityId::new("a")).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ProximityError::DuplicateEntity(EntityId::new("cafe-1"));
        assert_eq!(err.to_string(), "entity already indexed: cafe-1");
    }
}
