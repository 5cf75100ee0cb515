//! Engine configuration.
//!
//! Mirrors the serde layout used across the crate: every field has a default,
//! unknown fields are rejected, and `validate()` runs on every decode path.
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Spatial index implementation chosen at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Adaptive subdivision; better for skewed density.
    #[default]
    Quadtree,
    /// Fixed-precision buckets; better for uniform density.
    Geohash,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendKind,

    /// Entities a quadtree leaf holds before it splits
    #[serde(default = "Config::default_quadtree_capacity")]
    pub quadtree_capacity: usize,

    /// Leaves at this depth grow instead of splitting (coincident points)
    #[serde(default = "Config::default_quadtree_max_depth")]
    pub quadtree_max_depth: usize,

    /// Storage precision of geohash buckets (1-12)
    #[serde(default = "Config::default_geohash_precision")]
    pub geohash_precision: usize,

    #[serde(default = "Config::default_cache_enabled")]
    pub cache_enabled: bool,

    #[serde(default = "Config::default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Decimal places kept when normalizing cache-key coordinates
    #[serde(default = "Config::default_cache_key_precision")]
    pub cache_key_precision: u32,

    #[serde(default = "Config::default_cache_max_entries")]
    pub cache_max_entries: Option<usize>,

    /// How long a request waits on another request's in-flight computation
    /// before computing independently
    #[serde(default = "Config::default_stampede_wait_ms")]
    pub stampede_wait_ms: u64,

    /// Per-request deadline applied when the request does not carry one
    #[serde(default = "Config::default_query_timeout_ms")]
    pub query_timeout_ms: Option<u64>,

    #[serde(default = "Config::default_min_radius_m")]
    pub min_radius_m: f64,

    #[serde(default = "Config::default_max_radius_m")]
    pub max_radius_m: f64,

    #[serde(default = "Config::default_default_limit")]
    pub default_limit: usize,

    #[serde(default = "Config::default_max_limit")]
    pub max_limit: usize,

    #[serde(default = "Config::default_tombstone_retention_secs")]
    pub tombstone_retention_secs: u64,

    #[serde(default = "Config::default_sync_workers")]
    pub sync_workers: usize,
}

impl Config {
    const fn default_quadtree_capacity() -> usize {
        50
    }

    const fn default_quadtree_max_depth() -> usize {
        20
    }

    const fn default_geohash_precision() -> usize {
        7
    }

    const fn default_cache_enabled() -> bool {
        true
    }

    const fn default_cache_ttl_ms() -> u64 {
        30_000
    }

    const fn default_cache_key_precision() -> u32 {
        3
    }

    const fn default_cache_max_entries() -> Option<usize> {
        Some(100_000)
    }

    const fn default_stampede_wait_ms() -> u64 {
        250
    }

    const fn default_query_timeout_ms() -> Option<u64> {
        Some(1_000)
    }

    const fn default_min_radius_m() -> f64 {
        100.0
    }

    const fn default_max_radius_m() -> f64 {
        50_000.0
    }

    const fn default_default_limit() -> usize {
        20
    }

    const fn default_max_limit() -> usize {
        100
    }

    const fn default_tombstone_retention_secs() -> u64 {
        3_600
    }

    const fn default_sync_workers() -> usize {
        4
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_quadtree_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "Quadtree capacity must be greater than zero");
        self.quadtree_capacity = capacity;
        self
    }

    pub fn with_quadtree_max_depth(mut self, depth: usize) -> Self {
        self.quadtree_max_depth = depth;
        self
    }

    pub fn with_geohash_precision(mut self, precision: usize) -> Self {
        assert!(
            (1..=12).contains(&precision),
            "Geohash precision must be between 1 and 12"
        );
        self.geohash_precision = precision;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_cache_key_precision(mut self, decimals: u32) -> Self {
        self.cache_key_precision = decimals;
        self
    }

    pub fn with_cache_max_entries(mut self, max_entries: Option<usize>) -> Self {
        self.cache_max_entries = max_entries;
        self
    }

    pub fn with_stampede_wait(mut self, wait: Duration) -> Self {
        self.stampede_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn with_radius_bounds(mut self, min_m: f64, max_m: f64) -> Self {
        self.min_radius_m = min_m;
        self.max_radius_m = max_m;
        self
    }

    pub fn with_sync_workers(mut self, workers: usize) -> Self {
        assert!(workers > 0, "Sync workers must be greater than zero");
        self.sync_workers = workers;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn stampede_wait(&self) -> Duration {
        Duration::from_millis(self.stampede_wait_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.quadtree_capacity == 0 {
            return Err("Quadtree capacity must be greater than zero".to_string());
        }

        if !(1..=12).contains(&self.geohash_precision) {
            return Err(format!(
                "Geohash precision must be between 1 and 12, got {}",
                self.geohash_precision
            ));
        }

        if self.cache_key_precision > 8 {
            return Err(format!(
                "Cache key precision must be at most 8 decimal places, got {}",
                self.cache_key_precision
            ));
        }

        if !(self.min_radius_m > 0.0 && self.min_radius_m <= self.max_radius_m) {
            return Err(format!(
                "Radius bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.min_radius_m, self.max_radius_m
            ));
        }

        if self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(format!(
                "Default limit must be in 1..={}, got {}",
                self.max_limit, self.default_limit
            ));
        }

        if self.sync_workers == 0 {
            return Err("Sync workers must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            quadtree_capacity: Self::default_quadtree_capacity(),
            quadtree_max_depth: Self::default_quadtree_max_depth(),
            geohash_precision: Self::default_geohash_precision(),
            cache_enabled: Self::default_cache_enabled(),
            cache_ttl_ms: Self::default_cache_ttl_ms(),
            cache_key_precision: Self::default_cache_key_precision(),
            cache_max_entries: Self::default_cache_max_entries(),
            stampede_wait_ms: Self::default_stampede_wait_ms(),
            query_timeout_ms: Self::default_query_timeout_ms(),
            min_radius_m: Self::default_min_radius_m(),
            max_radius_m: Self::default_max_radius_m(),
            default_limit: Self::default_default_limit(),
            max_limit: Self::default_max_limit(),
            tombstone_retention_secs: Self::default_tombstone_retention_secs(),
            sync_workers: Self::default_sync_workers(),
        }
    }
}
