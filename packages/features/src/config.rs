//! Run parameters, loaded from an optional TOML file.
//!
//! Every field has a default, so an empty or absent file is a valid
//! configuration. `SITESCORE_CACHE_PATH` overrides the cache location.
//!
//! ```toml
//! concurrency = 4
//!
//! [cache]
//! path = "data/cache/geo_cache.json"
//! ttl_days = 30
//!
//! [sampling]
//! max_sample_points = 10
//! sub_radius_m = 100.0
//!
//! [retry.numeric]
//! expand_factor = 2.0
//! max_expand = 3
//!
//! [retry.categorical]
//! schedule = { explicit = [200.0, 500.0, 1000.0, 2000.0] }
//! delay_ms = 1000
//!
//! [reconcile]
//! max_attempts = 3
//!
//! [valuation]
//! enabled = true
//! ```

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use sitescore_cache::{CacheConfig, DEFAULT_TTL_DAYS};
use sitescore_fetch::policy::{DEFAULT_EXPAND_FACTOR, DEFAULT_MAX_EXPAND};
use sitescore_fetch::{RadiusSchedule, RetryPolicy};
use sitescore_reconcile::ReconcilePolicy;

use crate::FeatureError;

/// Environment variable overriding the cache location.
pub const CACHE_PATH_ENV: &str = "SITESCORE_CACHE_PATH";

/// Cache location used when neither the file nor the environment sets one.
pub const DEFAULT_CACHE_PATH: &str = "data/cache/geo_cache.json";

/// Top-level run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Cache location and expiry.
    pub cache: CacheSettings,
    /// Region sampling and candidate generation.
    pub sampling: SamplingSettings,
    /// Metric retry policies.
    pub retry: RetrySettings,
    /// Administrative and valuation reconciliation.
    pub reconcile: ReconcilePolicy,
    /// Parcel valuation.
    pub valuation: ValuationSettings,
    /// Sample points fetched at once. `1` is strictly sequential.
    pub concurrency: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            cache: CacheSettings::default(),
            sampling: SamplingSettings::default(),
            retry: RetrySettings::default(),
            reconcile: ReconcilePolicy::default(),
            valuation: ValuationSettings::default(),
            concurrency: 1,
        }
    }
}

/// Parcel valuation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationSettings {
    /// Whether to build the valuation source at all. When `true`, its
    /// credentials are required.
    pub enabled: bool,
}

impl Default for ValuationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Cache settings as they appear in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Durable store location; `None` means [`DEFAULT_CACHE_PATH`].
    pub path: Option<PathBuf>,
    /// Entry lifetime in days.
    pub ttl_days: i64,
    /// Write through on every put.
    pub persist_on_put: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            ttl_days: DEFAULT_TTL_DAYS,
            persist_on_put: true,
        }
    }
}

/// Sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSettings {
    /// Cap on sample points per location.
    pub max_sample_points: usize,
    /// Metric search radius at each sample point, and polygon grid
    /// spacing.
    pub sub_radius_m: f64,
    /// Radius of the neighborhood characterized around a location.
    pub neighborhood_radius_m: f64,
    /// Grid spacing for city-wide candidate generation.
    pub candidate_spacing_m: f64,
    /// Cap on generated candidates.
    pub candidate_cap: usize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            max_sample_points: 10,
            sub_radius_m: 100.0,
            neighborhood_radius_m: 500.0,
            candidate_spacing_m: 50.0,
            candidate_cap: 99,
        }
    }
}

/// Retry settings for the two metric families.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Numeric metrics: geometric expansion from the sub radius.
    pub numeric: NumericRetry,
    /// Categorical metrics: full policy.
    pub categorical: RetryPolicy,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            numeric: NumericRetry::default(),
            categorical: RetryPolicy::categorical(),
        }
    }
}

/// Geometric expansion parameters; the initial radius is supplied per
/// call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumericRetry {
    /// Multiplier between attempts.
    pub expand_factor: f64,
    /// Attempts after the first.
    pub max_expand: u32,
    /// Pause between attempts in milliseconds.
    pub delay_ms: u64,
    /// Chained nearest-place snaps.
    pub max_snap_depth: u32,
}

impl Default for NumericRetry {
    fn default() -> Self {
        let base = RetryPolicy::numeric(0.0);
        Self {
            expand_factor: DEFAULT_EXPAND_FACTOR,
            max_expand: DEFAULT_MAX_EXPAND,
            delay_ms: base.delay_ms,
            max_snap_depth: base.max_snap_depth,
        }
    }
}

impl NumericRetry {
    /// The policy for metrics searched from `initial_radius`.
    #[must_use]
    pub fn policy(&self, initial_radius: f64) -> RetryPolicy {
        RetryPolicy {
            schedule: RadiusSchedule::Geometric {
                initial: initial_radius,
                factor: self.expand_factor,
                max_expand: self.max_expand,
            },
            delay_ms: self.delay_ms,
            max_snap_depth: self.max_snap_depth,
        }
    }
}

impl AggregationConfig {
    /// Loads `path` if given, otherwise defaults, then applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::Io`] if the file cannot be read or
    /// [`FeatureError::ConfigFile`] if it is not valid TOML for this
    /// schema.
    pub fn load(path: Option<&Path>) -> Result<Self, FeatureError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                let config = Self::from_toml(&text).map_err(|source| FeatureError::ConfigFile {
                    path: path.to_path_buf(),
                    source,
                })?;
                log::info!("Loaded config from {}", path.display());
                config
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the document does not match the schema.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Applies environment overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var(CACHE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            log::debug!("Cache path overridden by {CACHE_PATH_ENV}: {path}");
            self.cache.path = Some(PathBuf::from(path));
        }
    }

    /// The effective cache location.
    #[must_use]
    pub fn cache_path(&self) -> PathBuf {
        self.cache
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH))
    }

    /// Settings for [`sitescore_cache::GeoCache::open`].
    #[must_use]
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            path: Some(self.cache_path()),
            ttl: TimeDelta::try_days(self.cache.ttl_days.max(0)).unwrap_or(TimeDelta::MAX),
            persist_on_put: self.cache.persist_on_put,
        }
    }

    /// Numeric retry policy for the configured sub radius.
    #[must_use]
    pub fn numeric_policy(&self) -> RetryPolicy {
        self.retry.numeric.policy(self.sampling.sub_radius_m)
    }
}
