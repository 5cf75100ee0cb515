//! Geographic point wrapping the `geo` crate's primitive.
//!
//! Coordinates follow the `geo` convention internally (x = longitude,
//! y = latitude) but the constructor takes latitude first, matching how
//! proximity queries are phrased.

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate in decimal degrees.
///
/// # Examples
///
/// ```
/// use proxima_types::geo::GeoPoint;
///
/// let sf = GeoPoint::new(37.7749, -122.4194);
/// assert_eq!(sf.lat(), 37.7749);
/// assert_eq!(sf.lon(), -122.4194);
/// assert_eq!(sf.inner().x(), -122.4194);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    inner: geo::Point<f64>,
}

impl GeoPoint {
    /// Create a point from latitude and longitude in degrees.
    #[inline]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            inner: geo::Point::new(longitude, latitude),
        }
    }

    /// Latitude in degrees.
    #[inline]
    pub fn lat(&self) -> f64 {
        self.inner.y()
    }

    /// Longitude in degrees.
    #[inline]
    pub fn lon(&self) -> f64 {
        self.inner.x()
    }

    /// Access the inner `geo::Point`.
    #[inline]
    pub fn inner(&self) -> &geo::Point<f64> {
        &self.inner
    }

    /// Convert into the inner `geo::Point`.
    #[inline]
    pub fn into_inner(self) -> geo::Point<f64> {
        self.inner
    }

    /// True when both coordinates are finite and inside the WGS84 domain.
    pub fn is_within_domain(&self) -> bool {
        let (lat, lon) = (self.lat(), self.lon());
        lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon)
    }
}

impl From<geo::Point<f64>> for GeoPoint {
    fn from(inner: geo::Point<f64>) -> Self {
        Self { inner }
    }
}

impl From<GeoPoint> for geo::Point<f64> {
    fn from(point: GeoPoint) -> Self {
        point.inner
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat(), self.lon())
    }
}
