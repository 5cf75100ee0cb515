//! Search circles and their relation to latitude/longitude rectangles.
//!
//! Index backends prune with two primitives from this module: the exact
//! bounding rectangles of a spherical cap, and the minimum great-circle
//! distance from a point to a rectangle. Both err on the side of inclusion.

use super::algorithms::{
    EARTH_RADIUS_M, haversine_distance, meters_to_radians, signed_longitude_delta,
};
use proxima_types::bbox::BoundingBox;
use proxima_types::geo::GeoPoint;
use smallvec::SmallVec;

/// Padding applied to every containment decision so floating-point noise can
/// only ever add candidates, never drop them.
const SLACK_M: f64 = 0.5;
const SLACK_DEG: f64 = 1e-9;

/// A query circle on the sphere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchCircle {
    pub center: GeoPoint,
    pub radius_m: f64,
}

impl SearchCircle {
    pub fn new(center: GeoPoint, radius_m: f64) -> Self {
        Self { center, radius_m }
    }

    /// Angular radius in degrees.
    #[inline]
    pub fn radius_deg(&self) -> f64 {
        meters_to_radians(self.radius_m).to_degrees()
    }

    /// True when the circle contains (or touches) a pole, in which case it
    /// spans every longitude.
    pub fn reaches_pole(&self) -> bool {
        self.max_longitude_extent().is_none()
    }

    /// Half-width in degrees of longitude of the circle's bounding rectangle,
    /// or `None` when the circle covers a pole.
    ///
    /// For a cap of angular radius r centred at latitude φ the extreme
    /// meridians sit at `asin(sin r / cos φ)` from the centre.
    pub fn max_longitude_extent(&self) -> Option<f64> {
        let r = meters_to_radians(self.radius_m);
        let lat = self.center.lat();
        let r_deg = r.to_degrees();
        if lat + r_deg >= 90.0 || lat - r_deg <= -90.0 {
            return None;
        }
        let ratio = r.sin() / lat.to_radians().cos();
        if ratio.is_nan() || ratio >= 1.0 {
            return None;
        }
        Some(ratio.asin().to_degrees())
    }

    /// Bounding rectangles of the circle, split at the antimeridian.
    ///
    /// Returns one rectangle in the common case, two when the circle crosses
    /// ±180°, and a full-longitude band when it covers a pole.
    pub fn bounding_boxes(&self) -> SmallVec<[BoundingBox; 2]> {
        let r_deg = self.radius_deg();
        let lat = self.center.lat();
        let lon = self.center.lon();
        let min_lat = (lat - r_deg - SLACK_DEG).max(-90.0);
        let max_lat = (lat + r_deg + SLACK_DEG).min(90.0);

        let mut boxes = SmallVec::new();
        let Some(extent) = self.max_longitude_extent() else {
            boxes.push(BoundingBox::new(min_lat, -180.0, max_lat, 180.0));
            return boxes;
        };

        let min_lon = lon - extent - SLACK_DEG;
        let max_lon = lon + extent + SLACK_DEG;
        if min_lon < -180.0 {
            boxes.push(BoundingBox::new(min_lat, min_lon + 360.0, max_lat, 180.0));
            boxes.push(BoundingBox::new(min_lat, -180.0, max_lat, max_lon));
        } else if max_lon > 180.0 {
            boxes.push(BoundingBox::new(min_lat, min_lon, max_lat, 180.0));
            boxes.push(BoundingBox::new(min_lat, -180.0, max_lat, max_lon - 360.0));
        } else {
            boxes.push(BoundingBox::new(min_lat, min_lon, max_lat, max_lon));
        }
        boxes
    }

    /// Rectangle–circle intersection on the sphere.
    #[inline]
    pub fn intersects_box(&self, bbox: &BoundingBox) -> bool {
        min_distance_to_box(&self.center, bbox) <= self.radius_m + SLACK_M
    }

    /// Exact point containment (inclusive).
    #[inline]
    pub fn contains(&self, point: &GeoPoint) -> bool {
        haversine_distance(&self.center, point) <= self.radius_m
    }
}

/// Minimum great-circle distance in meters from `point` to any point of a
/// non-wrapping latitude/longitude rectangle. Zero when the point is inside.
///
/// If the point's meridian crosses the rectangle the nearest point lies
/// straight north or south. Otherwise it lies on one of the two bounding
/// meridians: either the foot of the perpendicular great circle, when that
/// foot falls inside the edge, or an edge endpoint.
pub fn min_distance_to_box(point: &GeoPoint, bbox: &BoundingBox) -> f64 {
    let lat = point.lat();
    let lon = point.lon();

    if lon >= bbox.min_lon && lon <= bbox.max_lon {
        let d_lat = if lat < bbox.min_lat {
            bbox.min_lat - lat
        } else if lat > bbox.max_lat {
            lat - bbox.max_lat
        } else {
            0.0
        };
        return d_lat.to_radians() * EARTH_RADIUS_M;
    }

    distance_to_meridian_edge(point, bbox.min_lon, bbox.min_lat, bbox.max_lat).min(
        distance_to_meridian_edge(point, bbox.max_lon, bbox.min_lat, bbox.max_lat),
    )
}

fn distance_to_meridian_edge(point: &GeoPoint, edge_lon: f64, min_lat: f64, max_lat: f64) -> f64 {
    let phi = point.lat().to_radians();
    let d_lambda = signed_longitude_delta(point.lon(), edge_lon).to_radians();

    if d_lambda.cos() > 0.0 {
        let foot_lat = phi.sin().atan2(phi.cos() * d_lambda.cos()).to_degrees();
        if foot_lat >= min_lat && foot_lat <= max_lat {
            let cross = (phi.cos() * d_lambda.sin()).abs().min(1.0);
            return cross.asin() * EARTH_RADIUS_M;
        }
    }

    let low = GeoPoint::new(min_lat, edge_lon);
    let high = GeoPoint::new(max_lat, edge_lon);
    haversine_distance(point, &low).min(haversine_distance(point, &high))
}
