//! Geohash-bucketed index.
//!
//! Points are bucketed by their geohash at the storage precision in an
//! ordered map, so every coarser cell is a contiguous key range: a query cell
//! of precision `p` is answered by scanning the keys that start with it.

use super::SpatialBackend;
use crate::compute::spatial::SearchCircle;
use crate::config::BackendKind;
use crate::error::{ProximityError, Result};
use geohash::{Coord, decode_bbox, encode, neighbors};
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::EntityId;
use proxima_types::geo::GeoPoint;
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on cells visited by the covering fallback.
const MAX_COVER_CELLS: usize = 512;

/// Margin added to the circle extent when choosing a query precision.
const EXTENT_SLACK_DEG: f64 = 1e-7;

/// Size of a geohash cell in degrees as `(height, width)`.
///
/// Each character carries five bits, alternating longitude first, so
/// longitude gets `ceil(5p / 2)` bits and latitude `floor(5p / 2)`.
pub fn cell_size(precision: usize) -> (f64, f64) {
    let bits = 5 * precision as i32;
    let lon_bits = (bits + 1) / 2;
    let lat_bits = bits / 2;
    (180.0 / 2f64.powi(lat_bits), 360.0 / 2f64.powi(lon_bits))
}

fn hash(lat: f64, lon: f64, precision: usize) -> Result<String> {
    encode(Coord { x: lon, y: lat }, precision).map_err(|e| {
        ProximityError::InvalidQuery(format!("cannot geohash ({lat}, {lon}): {e}"))
    })
}

/// Geohash bucket map.
#[derive(Debug)]
pub struct GeohashIndex {
    precision: usize,
    cells: BTreeMap<String, Vec<(EntityId, GeoPoint)>>,
    len: usize,
}

impl GeohashIndex {
    pub fn new(precision: usize) -> Self {
        Self {
            precision: precision.clamp(1, 12),
            cells: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// Finest precision whose cell is at least as tall as the circle's
    /// latitude radius and as wide as its longitude half-extent. With such a
    /// cell the circle cannot reach past the eight neighbours of the cell
    /// holding its centre.
    pub fn query_precision(&self, circle: &SearchCircle) -> Option<usize> {
        let lon_extent = circle.max_longitude_extent()?;
        let lat_extent = circle.radius_deg();
        (1..=self.precision).rev().find(|&p| {
            let (h, w) = cell_size(p);
            h >= lat_extent + EXTENT_SLACK_DEG && w >= lon_extent + EXTENT_SLACK_DEG
        })
    }

    /// The cell holding the centre plus its eight neighbours. Neighbours past
    /// the antimeridian wrap; rows past a pole do not exist, though
    /// `geohash::neighbors` would wrap them to the opposite pole.
    fn nine_cells(&self, center: &GeoPoint, precision: usize) -> Result<BTreeSet<String>> {
        let center_hash = hash(center.lat(), center.lon(), precision)?;
        let rect = decode_bbox(&center_hash).map_err(|e| {
            ProximityError::InvalidQuery(format!("cannot decode geohash {center_hash}: {e}"))
        })?;
        let around = neighbors(&center_hash).map_err(|e| {
            ProximityError::InvalidQuery(format!("no neighbours for geohash {center_hash}: {e}"))
        })?;

        let mut cells = BTreeSet::from([center_hash, around.e, around.w]);
        if rect.max().y < 90.0 {
            cells.extend([around.n, around.ne, around.nw]);
        }
        if rect.min().y > -90.0 {
            cells.extend([around.s, around.se, around.sw]);
        }
        Ok(cells)
    }

    /// Cells covering `bbox` at the finest precision that needs no more
    /// than [`MAX_COVER_CELLS`] of them, keeping only those `keep` accepts.
    fn cover<F>(&self, bbox: &BoundingBox, keep: F) -> Result<Vec<String>>
    where
        F: Fn(&BoundingBox) -> bool,
    {
        for precision in (1..=self.precision).rev() {
            let (h, w) = cell_size(precision);
            let rows = (180.0 / h) as i64;
            let cols = (360.0 / w) as i64;
            let row = |lat: f64| (((lat + 90.0) / h).floor() as i64).clamp(0, rows - 1);
            let col = |lon: f64| (((lon + 180.0) / w).floor() as i64).clamp(0, cols - 1);
            let (r0, r1) = (row(bbox.min_lat), row(bbox.max_lat));
            let (c0, c1) = (col(bbox.min_lon), col(bbox.max_lon));
            let count = ((r1 - r0 + 1) * (c1 - c0 + 1)) as usize;
            if count > MAX_COVER_CELLS && precision > 1 {
                continue;
            }

            let mut cells = Vec::with_capacity(count);
            for r in r0..=r1 {
                for c in c0..=c1 {
                    let min_lat = -90.0 + r as f64 * h;
                    let min_lon = -180.0 + c as f64 * w;
                    let cell = BoundingBox::new(min_lat, min_lon, min_lat + h, min_lon + w);
                    if keep(&cell) {
                        let center = cell.center();
                        cells.push(hash(center.lat(), center.lon(), precision)?);
                    }
                }
            }
            return Ok(cells);
        }
        Ok(Vec::new())
    }

    /// Every point stored under a cell key starting with `prefix`.
    fn scan_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a (EntityId, GeoPoint)> + 'a {
        self.cells
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .flat_map(|(_, items)| items.iter())
    }

    fn circle_cells(&self, circle: &SearchCircle) -> Result<Vec<String>> {
        match self.query_precision(circle) {
            Some(precision) => Ok(self
                .nine_cells(&circle.center, precision)?
                .into_iter()
                .collect()),
            None => {
                let mut cells = Vec::new();
                for bbox in circle.bounding_boxes() {
                    cells.extend(self.cover(&bbox, |cell| circle.intersects_box(cell))?);
                }
                cells.sort();
                cells.dedup();
                Ok(cells)
            }
        }
    }
}

impl SpatialBackend for GeohashIndex {
    fn kind(&self) -> BackendKind {
        BackendKind::Geohash
    }

    fn insert(&mut self, id: EntityId, point: GeoPoint) -> Result<()> {
        let key = hash(point.lat(), point.lon(), self.precision)?;
        self.cells.entry(key).or_default().push((id, point));
        self.len += 1;
        Ok(())
    }

    fn remove(&mut self, id: &EntityId, point: &GeoPoint) -> bool {
        let Ok(key) = hash(point.lat(), point.lon(), self.precision) else {
            return false;
        };
        let Some(items) = self.cells.get_mut(&key) else {
            return false;
        };
        let Some(pos) = items.iter().position(|(e, _)| e == id) else {
            return false;
        };
        items.swap_remove(pos);
        if items.is_empty() {
            self.cells.remove(&key);
        }
        self.len -= 1;
        true
    }

    fn query_circle(&self, circle: &SearchCircle, out: &mut Vec<EntityId>) {
        // Points were validated on insert and the centre on entry, so
        // encoding cannot fail here; a failure would only mean no cells.
        let cells = match self.circle_cells(circle) {
            Ok(cells) => cells,
            Err(e) => {
                log::warn!("geohash cell selection failed: {}", e);
                return;
            }
        };
        for cell in &cells {
            out.extend(self.scan_prefix(cell).map(|(e, _)| e.clone()));
        }
    }

    fn query_bbox(&self, bbox: &BoundingBox, out: &mut Vec<EntityId>) {
        let cells = match self.cover(bbox, |cell| cell.intersects(bbox)) {
            Ok(cells) => cells,
            Err(e) => {
                log::warn!("geohash cover failed: {}", e);
                return;
            }
        };
        for cell in &cells {
            out.extend(
                self.scan_prefix(cell)
                    .filter(|(_, p)| bbox.contains(p))
                    .map(|(e, _)| e.clone()),
            );
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn max_depth(&self) -> usize {
        self.precision
    }

    fn clear(&mut self) {
        self.cells.clear();
        self.len = 0;
    }
}
