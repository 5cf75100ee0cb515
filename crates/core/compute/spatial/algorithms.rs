//! Great-circle distance on a spherical Earth.

use geo::{Distance, Haversine};
use proxima_types::geo::GeoPoint;

/// Mean Earth radius in meters (IUGG), the sphere `geo::Haversine` measures on.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters spanned by one degree of latitude.
pub const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Signed longitude difference `to - from` in degrees, wrapped to `[-180, 180]`.
#[inline]
pub fn signed_longitude_delta(from: f64, to: f64) -> f64 {
    let delta = (to - from + 180.0).rem_euclid(360.0) - 180.0;
    if delta == -180.0 && to > from { 180.0 } else { delta }
}

/// Haversine distance in meters between two points given in degrees.
///
/// Longitude enters only through `sin²(Δλ/2)` scaled by the cosines of both
/// latitudes, so crossing the antimeridian needs no special case and the
/// east-west contribution vanishes toward the poles.
///
/// # Examples
///
/// ```
/// use proxima::compute::spatial::haversine_distance;
/// use proxima_types::geo::GeoPoint;
///
/// let sf = GeoPoint::new(37.7749, -122.4194);
/// let la = GeoPoint::new(34.0522, -118.2437);
/// let d = haversine_distance(&sf, &la);
/// assert!((d - 559_000.0).abs() < 2_000.0);
/// ```
#[inline]
pub fn haversine_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    Haversine.distance(*a.inner(), *b.inner())
}

/// Angular distance in radians corresponding to `meters` along the surface.
#[inline]
pub fn meters_to_radians(meters: f64) -> f64 {
    meters / EARTH_RADIUS_M
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tolerance: f64) {
        assert!((a - b).abs() <= tolerance, "{a} vs {b} (tolerance {tolerance})");
    }

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(37.7749, -122.4194);
        assert_eq!(haversine_distance(&p, &p), 0.0);
    }

    #[test]
    fn test_known_distances() {
        let nyc = GeoPoint::new(40.7128, -74.0060);
        let london = GeoPoint::new(51.5074, -0.1278);
        assert_close(haversine_distance(&nyc, &london), 5_570_000.0, 10_000.0);

        // One degree of latitude along a meridian.
        let a = GeoPoint::new(10.0, 20.0);
        let b = GeoPoint::new(11.0, 20.0);
        assert_close(haversine_distance(&a, &b), METERS_PER_DEGREE, 1e-6);
    }

    #[test]
    fn test_symmetry() {
        let a = GeoPoint::new(12.5, 44.1);
        let b = GeoPoint::new(-3.25, 51.0);
        assert_eq!(haversine_distance(&a, &b), haversine_distance(&b, &a));
    }

    #[test]
    fn test_antimeridian() {
        let east = GeoPoint::new(0.0, 179.99);
        let west = GeoPoint::new(0.0, -179.95);
        // 0.06 degrees of longitude at the equator
        assert_close(haversine_distance(&east, &west), 0.06 * METERS_PER_DEGREE, 0.01);
    }

    #[test]
    fn test_near_pole() {
        // Opposite meridians a few meters from the north pole.
        let a = GeoPoint::new(89.9999, 0.0);
        let b = GeoPoint::new(89.9999, 180.0);
        assert_close(haversine_distance(&a, &b), 0.0002 * METERS_PER_DEGREE, 0.01);

        // At the pole itself longitude is irrelevant.
        let pole_a = GeoPoint::new(90.0, -45.0);
        let pole_b = GeoPoint::new(90.0, 120.0);
        assert!(haversine_distance(&pole_a, &pole_b) < 1e-6);
    }

    #[test]
    fn test_antipodal_does_not_nan() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(0.0, 180.0);
        let d = haversine_distance(&a, &b);
        assert_close(d, std::f64::consts::PI * EARTH_RADIUS_M, 1e-3);
    }

    #[test]
    fn test_longitude_deltas() {
        assert_eq!(signed_longitude_delta(170.0, -170.0), 20.0);
        assert_eq!(signed_longitude_delta(-170.0, 170.0), -20.0);
        assert_eq!(signed_longitude_delta(10.0, 5.0), -5.0);
    }
}
