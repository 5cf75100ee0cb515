use crate::geo::GeoPoint;
use serde::{Deserialize, Serialize};

/// A latitude/longitude aligned rectangle in degrees.
///
/// Boxes never wrap the antimeridian; callers that need a wrapping region
/// split it into two boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a bounding box from its corners.
    ///
    /// # Examples
    ///
    /// ```
    /// use proxima_types::bbox::BoundingBox;
    /// use proxima_types::geo::GeoPoint;
    ///
    /// let downtown = BoundingBox::new(37.76, -122.43, 37.80, -122.39);
    /// assert!(downtown.contains(&GeoPoint::new(37.7749, -122.4194)));
    /// ```
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// The whole globe.
    pub fn world() -> Self {
        Self::new(-90.0, -180.0, 90.0, 180.0)
    }

    /// Create from a `geo::Rect` (x = longitude, y = latitude).
    pub fn from_rect(rect: geo::Rect<f64>) -> Self {
        Self::new(rect.min().y, rect.min().x, rect.max().y, rect.max().x)
    }

    /// Center point of the box.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Inclusive containment test.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat() >= self.min_lat
            && point.lat() <= self.max_lat
            && point.lon() >= self.min_lon
            && point.lon() <= self.max_lon
    }

    /// Check if this bounding box intersects with another (edges touching count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_lon < other.min_lon
            || self.min_lon > other.max_lon
            || self.max_lat < other.min_lat
            || self.min_lat > other.max_lat)
    }

    /// Clamp the box to the valid WGS84 domain.
    pub fn clamped(&self) -> Self {
        Self::new(
            self.min_lat.max(-90.0),
            self.min_lon.max(-180.0),
            self.max_lat.min(90.0),
            self.max_lon.min(180.0),
        )
    }
}
