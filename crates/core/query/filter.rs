//! Exact-distance filtering of index candidates.

use crate::cache::CachedHit;
use crate::compute::spatial::haversine_distance;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::index::IndexReader;
use proxima_types::entity::{EntityId, SearchHit};
use proxima_types::geo::GeoPoint;
use std::cmp::Ordering;

/// How many candidates are filtered between deadline checks.
const DEADLINE_STRIDE: usize = 256;

/// Narrows an over-approximate candidate list to the exact circle.
///
/// Coordinates come from the index's own entity store through `reader`, so
/// they are consistent with the snapshot the candidates were drawn from.
/// Candidates no longer present (or in another category) are dropped. The
/// survivors are sorted by distance, ties broken by ascending id.
pub fn filter_candidates(
    reader: &IndexReader<'_>,
    candidates: &[EntityId],
    center: &GeoPoint,
    radius_m: f64,
    category: Option<&str>,
    deadline: &Deadline,
) -> Result<Vec<SearchHit>> {
    Ok(collect_nearby(reader, candidates, center, radius_m, category, deadline)?
        .into_iter()
        .map(CachedHit::into_hit)
        .collect())
}

/// Same narrowing as [`filter_candidates`], keeping each survivor's position
/// so the list can be cached and re-ranked later from another center.
pub fn collect_nearby(
    reader: &IndexReader<'_>,
    candidates: &[EntityId],
    center: &GeoPoint,
    radius_m: f64,
    category: Option<&str>,
    deadline: &Deadline,
) -> Result<Vec<CachedHit>> {
    let mut hits = Vec::with_capacity(candidates.len().min(1024));
    for (i, id) in candidates.iter().enumerate() {
        if i % DEADLINE_STRIDE == 0 {
            deadline.check("filter")?;
        }
        let Some(record) = reader.get(id) else {
            continue;
        };
        if !record.matches_category(category) {
            continue;
        }
        let point = record.point();
        let distance_m = haversine_distance(center, &point);
        if distance_m <= radius_m {
            hits.push(CachedHit {
                id: id.clone(),
                point,
                distance_m,
            });
        }
    }
    hits.sort_unstable_by(|a, b| {
        a.distance_m
            .total_cmp(&b.distance_m)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(hits)
}

/// Ranks a cached list from `center`: exact distances, nothing beyond
/// `radius_m`, sorted.
pub fn rank_cached(cached: &[CachedHit], center: &GeoPoint, radius_m: f64) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = cached
        .iter()
        .filter_map(|entry| {
            let distance_m = haversine_distance(center, &entry.point);
            (distance_m <= radius_m).then(|| SearchHit {
                id: entry.id.clone(),
                distance_m,
            })
        })
        .collect();
    sort_hits(&mut hits);
    hits
}

/// Ascending distance, then ascending id, so pagination is deterministic.
pub fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_unstable_by(compare_hits);
}

#[inline]
fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.distance_m
        .total_cmp(&b.distance_m)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::index::SpatialIndex;
    use proxima_types::entity::EntityRecord;
    use std::time::Duration;

    #[test]
    fn test_sort_tie_break_by_id() {
        let mut hits = vec![
            SearchHit::new("c", 5.0),
            SearchHit::new("b", 1.0),
            SearchHit::new("a", 5.0),
        ];
        sort_hits(&mut hits);
        let order: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_filters_false_positives_and_categories() {
        let index = SpatialIndex::new(&Config::default());
        index
            .insert(EntityRecord::new("near", 37.7764, -122.4172, "cafe", 1))
            .unwrap();
        index
            .insert(EntityRecord::new("bar", 37.7751, -122.4087, "bar", 1))
            .unwrap();
        index
            .insert(EntityRecord::new("far", 37.9000, -122.9000, "cafe", 1))
            .unwrap();

        let center = GeoPoint::new(37.7749, -122.4194);
        let deadline = Deadline::none();
        let reader = index.read(&deadline).unwrap();
        let candidates = vec![
            EntityId::new("far"),
            EntityId::new("bar"),
            EntityId::new("near"),
            EntityId::new("gone"),
        ];

        let all = filter_candidates(&reader, &candidates, &center, 2_000.0, None, &deadline)
            .unwrap();
        let ids: Vec<&str> = all.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "bar"]);
        assert!(all.iter().all(|h| h.distance_m <= 2_000.0));

        let cafes =
            filter_candidates(&reader, &candidates, &center, 2_000.0, Some("cafe"), &deadline)
                .unwrap();
        assert_eq!(cafes.len(), 1);
        assert_eq!(cafes[0].id.as_str(), "near");
    }

    #[test]
    fn test_rank_cached_uses_request_center() {
        let cached = vec![
            CachedHit::new("east", GeoPoint::new(0.0, 0.02), 0.0),
            CachedHit::new("west", GeoPoint::new(0.0, -0.02), 0.0),
        ];
        // Each side is about 2.2 km from the origin, so a 2 km circle around
        // a center shifted east keeps only the east entity.
        let center = GeoPoint::new(0.0, 0.005);
        let ranked = rank_cached(&cached, &center, 2_000.0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id.as_str(), "east");
        let expected = haversine_distance(&center, &GeoPoint::new(0.0, 0.02));
        assert_eq!(ranked[0].distance_m, expected);
    }

    #[test]
    fn test_expired_deadline_fails_instead_of_partial() {
        let index = SpatialIndex::new(&Config::default());
        let deadline = Deadline::none();
        let reader = index.read(&deadline).unwrap();
        let expired = Deadline::after(Some(Duration::ZERO));
        let err = filter_candidates(
            &reader,
            &[EntityId::new("x")],
            &GeoPoint::new(0.0, 0.0),
            100.0,
            None,
            &expired,
        )
        .unwrap_err();
        assert!(err.is_retryable());
    }
}
