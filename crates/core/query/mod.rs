//! Query coordinator: cache lookup, single-flight, index query, filter,
//! cache populate, paginate.

pub mod filter;

pub use filter::{collect_nearby, filter_candidates, rank_cached, sort_hits};

use crate::cache::{CacheKey, CachedHits, Join, QueryCache, SingleFlight, WaitOutcome};
use crate::compute::spatial::haversine_distance;
use crate::compute::validation::{validate_point, validate_polygon, validate_radius_bounds};
use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::{ProximityError, Result};
use crate::index::SpatialIndex;
use geo::{BoundingRect, Centroid, Intersects, Polygon};
use proxima_types::bbox::BoundingBox;
use proxima_types::entity::SearchHit;
use proxima_types::geo::GeoPoint;
use proxima_types::stats::QueryStats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A circle search.
///
/// # Examples
///
/// ```
/// use proxima::query::SearchRequest;
///
/// let request = SearchRequest::new(37.7749, -122.4194, 2_000.0)
///     .category("cafe")
///     .limit(10)
///     .offset(10);
/// assert_eq!(request.limit, Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    #[serde(default)]
    pub category: Option<String>,
    /// Page size; the configured default when absent.
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Overrides the configured query timeout.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl SearchRequest {
    pub fn new(latitude: f64, longitude: f64, radius_m: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_m,
            category: None,
            limit: None,
            offset: 0,
            timeout: None,
        }
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// One page of ranked results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Size of the full ranked result before pagination.
    pub total_estimate: usize,
    pub has_more: bool,
    pub cache_hit: bool,
}

impl SearchResponse {
    fn page(hits: &[SearchHit], limit: usize, offset: usize, cache_hit: bool) -> Self {
        let results: Vec<SearchHit> = hits.iter().skip(offset).take(limit).cloned().collect();
        let has_more = offset.saturating_add(results.len()) < hits.len();
        Self {
            results,
            total_estimate: hits.len(),
            has_more,
            cache_hit,
        }
    }
}

/// Orchestrates single search requests over a shared index and cache.
pub struct QueryCoordinator {
    index: Arc<SpatialIndex>,
    cache: Arc<QueryCache>,
    flights: SingleFlight<CacheKey, Result<CachedHits>>,
    config: Config,
    searches: AtomicU64,
    index_queries: AtomicU64,
    coalesced: AtomicU64,
    timeouts: AtomicU64,
}

impl QueryCoordinator {
    pub fn new(index: Arc<SpatialIndex>, cache: Arc<QueryCache>, config: Config) -> Self {
        Self {
            index,
            cache,
            flights: SingleFlight::new(),
            config,
            searches: AtomicU64::new(0),
            index_queries: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    fn page_size(&self, limit: Option<usize>) -> Result<usize> {
        match limit {
            Some(0) => Err(ProximityError::InvalidQuery(
                "limit must be at least 1".to_string(),
            )),
            Some(limit) => Ok(limit.min(self.config.max_limit)),
            None => Ok(self.config.default_limit),
        }
    }

    /// Runs a circle search.
    ///
    /// `START → CACHE_LOOKUP → (HIT → RESPOND) | (MISS → INDEX_QUERY →
    /// FILTER → CACHE_POPULATE → RESPOND)`. Limit and offset are applied to
    /// the fully ranked list, never before sorting.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.searches.fetch_add(1, Ordering::Relaxed);
        let result = self.search_inner(request);
        if let Err(ProximityError::Timeout { stage, elapsed }) = &result {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            log::debug!("search timed out during {} after {:?}", stage, elapsed);
        }
        result
    }

    fn search_inner(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let center = request.center();
        validate_point(&center)?;
        validate_radius_bounds(
            request.radius_m,
            self.config.min_radius_m,
            self.config.max_radius_m,
        )?;
        let limit = self.page_size(request.limit)?;
        let category = request.category.as_deref();
        let deadline = Deadline::after(request.timeout.or(self.config.query_timeout()));

        if !self.config.cache_enabled {
            let hits = self.compute(&center, request.radius_m, category, &deadline)?;
            return Ok(SearchResponse::page(&hits, limit, request.offset, false));
        }

        let key = CacheKey::normalize(
            &center,
            request.radius_m,
            category,
            self.config.cache_key_precision,
        );
        let (cached, cache_hit) = match self.cache.get(&key) {
            Some(cached) => (cached, true),
            None => {
                deadline.check("cache_lookup")?;
                (self.load(&key, &deadline)?, false)
            }
        };
        let hits = rank_cached(&cached, &center, request.radius_m);
        Ok(SearchResponse::page(&hits, limit, request.offset, cache_hit))
    }

    /// Computes the value for a missed key, coalescing concurrent misses.
    ///
    /// The leader re-checks the cache after registering its flight (another
    /// leader may have just finished), computes, populates the cache and
    /// only then publishes. Followers wait for at most the stampede window
    /// (and never past their deadline), then compute on their own.
    fn load(&self, key: &CacheKey, deadline: &Deadline) -> Result<CachedHits> {
        match self.flights.join(key) {
            Join::Leader(guard) => {
                if let Some(hits) = self.cache.peek(key) {
                    guard.complete(Ok(Arc::clone(&hits)));
                    return Ok(hits);
                }
                let result = self.compute_and_store(key, deadline);
                guard.complete(result.clone());
                result
            }
            Join::Follower(flight) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                let until = deadline.cap(Instant::now() + self.config.stampede_wait());
                match flight.wait(until) {
                    WaitOutcome::Ready(Ok(hits)) => Ok(hits),
                    // The leader ran out of its own time; ours may differ.
                    WaitOutcome::Ready(Err(ProximityError::Timeout { .. }))
                    | WaitOutcome::Abandoned
                    | WaitOutcome::TimedOut => {
                        deadline.check("stampede_wait")?;
                        log::debug!("computing {} independently of its flight", key);
                        self.compute_and_store(key, deadline)
                    }
                    WaitOutcome::Ready(Err(e)) => Err(e),
                }
            }
        }
    }

    /// Everything within the key's cover radius of its canonical center.
    fn compute_and_store(&self, key: &CacheKey, deadline: &Deadline) -> Result<CachedHits> {
        let center = key.center();
        let radius_m = key.cover_radius_m();
        let reader = self.index.read(deadline)?;
        self.index_queries.fetch_add(1, Ordering::Relaxed);
        let candidates = reader.range_query(&center, radius_m, key.category())?;
        deadline.check("index_query")?;
        let hits: CachedHits =
            collect_nearby(&reader, &candidates, &center, radius_m, key.category(), deadline)?
                .into();
        drop(reader);

        self.cache
            .set(key.clone(), Arc::clone(&hits), self.config.cache_ttl());
        Ok(hits)
    }

    /// Index query plus exact filter under one read snapshot.
    fn compute(
        &self,
        center: &GeoPoint,
        radius_m: f64,
        category: Option<&str>,
        deadline: &Deadline,
    ) -> Result<Vec<SearchHit>> {
        let reader = self.index.read(deadline)?;
        self.index_queries.fetch_add(1, Ordering::Relaxed);
        let candidates = reader.range_query(center, radius_m, category)?;
        deadline.check("index_query")?;
        filter_candidates(&reader, &candidates, center, radius_m, category, deadline)
    }

    /// Entities inside `polygon` (boundary inclusive), ranked by distance
    /// from its centroid. Coordinates are `x = longitude`, `y = latitude`;
    /// polygons are planar in degrees and must not cross the antimeridian.
    /// Results are never cached.
    pub fn search_polygon(
        &self,
        polygon: &Polygon<f64>,
        category: Option<&str>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<SearchResponse> {
        self.searches.fetch_add(1, Ordering::Relaxed);
        validate_polygon(polygon)?;
        let limit = self.page_size(limit)?;
        let deadline = Deadline::after(self.config.query_timeout());

        let rect = polygon.bounding_rect().ok_or_else(|| {
            ProximityError::InvalidQuery("polygon has no bounding rectangle".to_string())
        })?;
        let bbox = BoundingBox::from_rect(rect);
        let origin = polygon
            .centroid()
            .map(GeoPoint::from)
            .unwrap_or_else(|| bbox.center());

        let reader = self.index.read(&deadline)?;
        self.index_queries.fetch_add(1, Ordering::Relaxed);
        let candidates = reader.range_query_bbox(&bbox, category)?;
        deadline.check("index_query")?;

        let mut hits = Vec::new();
        for id in &candidates {
            let Some(record) = reader.get(id) else {
                continue;
            };
            let point = record.point();
            if polygon.intersects(point.inner()) {
                hits.push(SearchHit {
                    id: id.clone(),
                    distance_m: haversine_distance(&origin, &point),
                });
            }
        }
        drop(reader);
        deadline.check("filter")?;

        sort_hits(&mut hits);
        Ok(SearchResponse::page(&hits, limit, offset, false))
    }

    pub fn index(&self) -> &Arc<SpatialIndex> {
        &self.index
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats {
            searches: self.searches.load(Ordering::Relaxed),
            index_queries: self.index_queries.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use proxima_types::entity::EntityRecord;

    fn coordinator(config: Config) -> QueryCoordinator {
        let index = Arc::new(SpatialIndex::new(&config));
        let cache = Arc::new(QueryCache::new(config.cache_max_entries));
        QueryCoordinator::new(index, cache, config)
    }

    fn seed(coordinator: &QueryCoordinator) {
        for (id, lat, lon) in [
            ("a", 37.7764, -122.4172),
            ("b", 37.7751, -122.4087),
            ("c", 37.9000, -122.9000),
        ] {
            coordinator
                .index()
                .insert(EntityRecord::new(id, lat, lon, "cafe", 1))
                .unwrap();
        }
    }

    #[test]
    fn test_miss_then_hit() {
        let coordinator = coordinator(Config::default());
        seed(&coordinator);
        let request = SearchRequest::new(37.7749, -122.4194, 2_000.0);

        let first = coordinator.search(&request).unwrap();
        assert!(!first.cache_hit);
        let second = coordinator.search(&request).unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.results, second.results);

        let stats = coordinator.stats();
        assert_eq!(stats.searches, 2);
        assert_eq!(stats.index_queries, 1);
    }

    #[test]
    fn test_cached_results_are_exact_for_each_center() {
        use crate::compute::spatial::METERS_PER_DEGREE;

        // The key for this center rounds about 11 m north, so measuring from
        // the rounded center would admit "north" and drop "south".
        let center = GeoPoint::new(37.7749, -122.4194);
        let entities = [
            EntityRecord::new("south", 37.7749 - 1_995.0 / METERS_PER_DEGREE, -122.4194, "", 1),
            EntityRecord::new("north", 37.7749 + 2_005.0 / METERS_PER_DEGREE, -122.4194, "", 1),
        ];
        let cached = coordinator(Config::default());
        let exact = coordinator(Config::default().with_cache_enabled(false));
        for record in &entities {
            cached.index().insert(record.clone()).unwrap();
            exact.index().insert(record.clone()).unwrap();
        }

        let request = SearchRequest::new(center.lat(), center.lon(), 2_000.0);
        let miss = cached.search(&request).unwrap();
        let hit = cached.search(&request).unwrap();
        let expected = exact.search(&request).unwrap().results;
        assert!(!miss.cache_hit && hit.cache_hit);
        assert_eq!(miss.results, expected);
        assert_eq!(hit.results, expected);
        assert_eq!(expected.len(), 1);
        assert_eq!(expected[0].id.as_str(), "south");
        assert!((expected[0].distance_m - 1_995.0).abs() < 1e-3);

        // Another center sharing the key is served from the same entry.
        let nearby = SearchRequest::new(37.7751, -122.4188, 2_000.0);
        let shared = cached.search(&nearby).unwrap();
        assert!(shared.cache_hit);
        assert_eq!(shared.results, exact.search(&nearby).unwrap().results);
        assert_eq!(cached.stats().index_queries, 1);
    }

    #[test]
    fn test_pagination_after_sort() {
        let coordinator = coordinator(Config::default().with_cache_enabled(false));
        for i in 0..5 {
            coordinator
                .index()
                .insert(EntityRecord::new(
                    format!("e{i}"),
                    10.0 + 0.001 * (5 - i) as f64,
                    10.0,
                    "",
                    1,
                ))
                .unwrap();
        }
        let base = SearchRequest::new(10.0, 10.0, 5_000.0);

        let page1 = coordinator.search(&base.clone().limit(2)).unwrap();
        let page2 = coordinator.search(&base.clone().limit(2).offset(2)).unwrap();
        let page3 = coordinator.search(&base.clone().limit(2).offset(4)).unwrap();

        let ids = |r: &SearchResponse| -> Vec<String> {
            r.results.iter().map(|h| h.id.to_string()).collect()
        };
        assert_eq!(ids(&page1), vec!["e4", "e3"]);
        assert_eq!(ids(&page2), vec!["e2", "e1"]);
        assert_eq!(ids(&page3), vec!["e0"]);
        assert!(page1.has_more && page2.has_more && !page3.has_more);
        assert_eq!(page1.total_estimate, 5);
    }

    #[test]
    fn test_limits() {
        let coordinator = coordinator(Config::default());
        let zero = SearchRequest::new(0.0, 0.0, 1_000.0).limit(0);
        assert!(matches!(
            coordinator.search(&zero),
            Err(ProximityError::InvalidQuery(_))
        ));
        assert_eq!(coordinator.page_size(Some(10_000)).unwrap(), 100);
        assert_eq!(coordinator.page_size(None).unwrap(), 20);
    }

    #[test]
    fn test_radius_window_enforced() {
        let coordinator = coordinator(Config::default());
        for radius in [50.0, 50_001.0, -1.0, f64::NAN] {
            let request = SearchRequest::new(0.0, 0.0, radius);
            assert!(matches!(
                coordinator.search(&request),
                Err(ProximityError::InvalidQuery(_))
            ));
        }
    }

    #[test]
    fn test_zero_timeout_fails_with_timeout() {
        let coordinator = coordinator(Config::default());
        seed(&coordinator);
        let request =
            SearchRequest::new(37.7749, -122.4194, 2_000.0).timeout(Duration::ZERO);
        let err = coordinator.search(&request).unwrap_err();
        assert!(matches!(err, ProximityError::Timeout { .. }));
        assert_eq!(coordinator.stats().timeouts, 1);
        // Nothing partial was cached.
        assert!(coordinator.cache().is_empty());
    }

    #[test]
    fn test_polygon_search() {
        let coordinator = coordinator(Config::default());
        seed(&coordinator);
        coordinator
            .index()
            .insert(EntityRecord::new("corner", 37.77, -122.42, "cafe", 1))
            .unwrap();

        let area = polygon![
            (x: -122.42, y: 37.77),
            (x: -122.40, y: 37.77),
            (x: -122.40, y: 37.79),
            (x: -122.42, y: 37.79),
            (x: -122.42, y: 37.77),
        ];
        let response = coordinator.search_polygon(&area, None, None, 0).unwrap();
        let mut ids: Vec<&str> = response.results.iter().map(|h| h.id.as_str()).collect();
        ids.sort();
        // Vertex counts as inside.
        assert_eq!(ids, vec!["a", "b", "corner"]);
        assert!(!response.cache_hit);
        assert!(coordinator.cache().is_empty());

        let distances: Vec<f64> = response.results.iter().map(|h| h.distance_m).collect();
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unavailable_index() {
        let config = Config::default();
        let index = Arc::new(SpatialIndex::loading(&config));
        let coordinator =
            QueryCoordinator::new(index, Arc::new(QueryCache::default()), config);
        let err = coordinator
            .search(&SearchRequest::new(0.0, 0.0, 1_000.0))
            .unwrap_err();
        assert!(matches!(err, ProximityError::IndexUnavailable(_)));
        assert!(err.is_retryable());
    }
}
