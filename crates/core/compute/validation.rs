//! Validation for coordinates, radii and query shapes.
//!
//! Every check reports `ProximityError::InvalidQuery`; validation failures are
//! surfaced to the caller immediately and never retried.

use crate::error::{ProximityError, Result};
use geo::Polygon;
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::EntityRecord;
use proxima_types::geo::GeoPoint;

/// Validates a point has finite latitude in [-90, 90] and longitude in [-180, 180].
///
/// # Examples
///
/// ```
/// use proxima::compute::validation::validate_point;
/// use proxima_types::geo::GeoPoint;
///
/// assert!(validate_point(&GeoPoint::new(37.7749, -122.4194)).is_ok());
/// assert!(validate_point(&GeoPoint::new(95.0, 0.0)).is_err());
/// assert!(validate_point(&GeoPoint::new(0.0, 200.0)).is_err());
/// ```
pub fn validate_point(point: &GeoPoint) -> Result<()> {
    let (lat, lon) = (point.lat(), point.lon());

    if !lat.is_finite() {
        return Err(ProximityError::InvalidQuery(format!(
            "Latitude must be finite, got: {}",
            lat
        )));
    }

    if !lon.is_finite() {
        return Err(ProximityError::InvalidQuery(format!(
            "Longitude must be finite, got: {}",
            lon
        )));
    }

    if !(-90.0..=90.0).contains(&lat) {
        return Err(ProximityError::InvalidQuery(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            lat
        )));
    }

    if !(-180.0..=180.0).contains(&lon) {
        return Err(ProximityError::InvalidQuery(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            lon
        )));
    }

    Ok(())
}

/// Validates a radius is finite and strictly positive.
///
/// This is the index-level check; the request boundary additionally
/// enforces the configured `[min_radius_m, max_radius_m]` window through
/// [`validate_radius_bounds`].
pub fn validate_radius(radius_m: f64) -> Result<()> {
    if !radius_m.is_finite() {
        return Err(ProximityError::InvalidQuery(format!(
            "Radius must be finite, got: {}",
            radius_m
        )));
    }
    if radius_m <= 0.0 {
        return Err(ProximityError::InvalidQuery(format!(
            "Radius must be positive, got: {}",
            radius_m
        )));
    }
    Ok(())
}

/// Validates a radius against the window accepted at the query boundary.
///
/// # Examples
///
/// ```
/// use proxima::compute::validation::validate_radius_bounds;
///
/// assert!(validate_radius_bounds(2_000.0, 100.0, 50_000.0).is_ok());
/// assert!(validate_radius_bounds(99.0, 100.0, 50_000.0).is_err());
/// assert!(validate_radius_bounds(50_001.0, 100.0, 50_000.0).is_err());
/// ```
pub fn validate_radius_bounds(radius_m: f64, min_m: f64, max_m: f64) -> Result<()> {
    validate_radius(radius_m)?;
    if !(min_m..=max_m).contains(&radius_m) {
        return Err(ProximityError::InvalidQuery(format!(
            "Radius {} m outside accepted range [{}, {}]",
            radius_m, min_m, max_m
        )));
    }
    Ok(())
}

/// Validates a bounding box: valid corners and min <= max on both axes.
pub fn validate_bbox(bbox: &BoundingBox) -> Result<()> {
    validate_point(&GeoPoint::new(bbox.min_lat, bbox.min_lon))?;
    validate_point(&GeoPoint::new(bbox.max_lat, bbox.max_lon))?;

    if bbox.min_lat > bbox.max_lat {
        return Err(ProximityError::InvalidQuery(format!(
            "min_lat ({}) must be <= max_lat ({})",
            bbox.min_lat, bbox.max_lat
        )));
    }
    if bbox.min_lon > bbox.max_lon {
        return Err(ProximityError::InvalidQuery(format!(
            "min_lon ({}) must be <= max_lon ({})",
            bbox.min_lon, bbox.max_lon
        )));
    }
    Ok(())
}

/// Validates all polygon coordinates (exterior and interior rings) and
/// requires a non-degenerate exterior ring.
pub fn validate_polygon(polygon: &Polygon<f64>) -> Result<()> {
    if polygon.exterior().0.len() < 4 {
        return Err(ProximityError::InvalidQuery(
            "Polygon exterior ring needs at least three distinct vertices".to_string(),
        ));
    }

    for (idx, coord) in polygon.exterior().coords().enumerate() {
        validate_point(&GeoPoint::new(coord.y, coord.x)).map_err(|e| {
            ProximityError::InvalidQuery(format!("Exterior ring point at index {}: {}", idx, e))
        })?;
    }

    for (ring_idx, interior) in polygon.interiors().iter().enumerate() {
        for (idx, coord) in interior.coords().enumerate() {
            validate_point(&GeoPoint::new(coord.y, coord.x)).map_err(|e| {
                ProximityError::InvalidQuery(format!(
                    "Interior ring {} point at index {}: {}",
                    ring_idx, idx, e
                ))
            })?;
        }
    }

    Ok(())
}

/// Validates an entity before it is indexed.
pub fn validate_record(record: &EntityRecord) -> Result<()> {
    if record.id.as_str().is_empty() {
        return Err(ProximityError::InvalidQuery(
            "Entity id must not be empty".to_string(),
        ));
    }
    validate_point(&record.point())
        .map_err(|e| ProximityError::InvalidQuery(format!("Entity {}: {}", record.id, e)))
}
