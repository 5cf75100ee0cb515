use crate::compute::spatial::METERS_PER_DEGREE;
use proxima_types::geo::GeoPoint;
use std::fmt;

/// Normalized cache key for a circle query.
///
/// Latitude and longitude are rounded to `precision` decimal places, so
/// queries a few meters apart share one entry. An entry is always computed
/// for the rounded [`center`](Self::center) out to
/// [`cover_radius_m`](Self::cover_radius_m), which makes it a pure function
/// of its key no matter which nearby request populated it, and a superset of
/// the answer for every request that maps to the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lat_q: i64,
    lon_q: i64,
    precision: u32,
    radius_bits: u64,
    category: Option<String>,
}

impl CacheKey {
    /// # Examples
    ///
    /// ```
    /// use proxima::cache::CacheKey;
    /// use proxima_types::geo::GeoPoint;
    ///
    /// let a = CacheKey::normalize(&GeoPoint::new(37.77491, -122.41942), 2_000.0, None, 3);
    /// let b = CacheKey::normalize(&GeoPoint::new(37.77488, -122.41936), 2_000.0, None, 3);
    /// assert_eq!(a, b);
    /// assert_eq!(a.center(), GeoPoint::new(37.775, -122.419));
    /// ```
    pub fn normalize(
        center: &GeoPoint,
        radius_m: f64,
        category: Option<&str>,
        precision: u32,
    ) -> Self {
        let scale = 10f64.powi(precision as i32);
        let lat_q = (center.lat() * scale).round() as i64;
        let mut lon_q = (center.lon() * scale).round() as i64;
        // -180 and 180 are the same meridian.
        let antimeridian = (180.0 * scale) as i64;
        if lon_q == -antimeridian {
            lon_q = antimeridian;
        }
        Self {
            lat_q,
            lon_q,
            precision,
            radius_bits: radius_m.to_bits(),
            category: category.map(str::to_owned),
        }
    }

    /// The rounded query center this key stands for.
    pub fn center(&self) -> GeoPoint {
        let scale = 10f64.powi(self.precision as i32);
        GeoPoint::new(self.lat_q as f64 / scale, self.lon_q as f64 / scale)
    }

    pub fn radius_m(&self) -> f64 {
        f64::from_bits(self.radius_bits)
    }

    /// Upper bound on the distance from any center that normalizes to this
    /// key to [`center`](Self::center).
    ///
    /// Rounding moves each axis by at most half a unit. Walking the latitude
    /// offset along a meridian and then the longitude offset along a parallel
    /// is never shorter than the great circle, and a parallel is longest at
    /// the equator.
    pub fn rounding_slack_m(&self) -> f64 {
        let half_unit = 0.5 / 10f64.powi(self.precision as i32);
        2.0 * half_unit * METERS_PER_DEGREE
    }

    /// Radius an entry is computed with. By the triangle inequality every
    /// entity within `radius_m` of a request mapping to this key lies within
    /// this radius of the canonical center.
    pub fn cover_radius_m(&self) -> f64 {
        self.radius_m() + self.rounding_slack_m()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let center = self.center();
        write!(
            f,
            "{:.*},{:.*}@{}m",
            self.precision as usize,
            center.lat(),
            self.precision as usize,
            center.lon(),
            self.radius_m()
        )?;
        if let Some(category) = &self.category {
            write!(f, "[{}]", category)?;
        }
        Ok(())
    }
}
