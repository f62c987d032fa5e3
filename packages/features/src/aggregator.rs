//! Per-location feature aggregation.

use std::sync::Arc;

use futures::stream::{self, StreamExt as _, TryStreamExt as _};
use sitescore_fetch::{FetchOutcome, Resolution, RetryFallbackFetcher, RetryPolicy};
use sitescore_location_models::{
    AdminLookupResult, Coordinate, FeatureRecord, SamplePoint, SampleRegion, Valuation,
};
use sitescore_provider::MetricSource;
use sitescore_reconcile::SourceReconciler;
use sitescore_spatial::sampler::sample_region;

use crate::FeatureError;
use crate::config::{AggregationConfig, NumericRetry};

/// A metric source bound to a feature name.
#[derive(Clone)]
pub enum MetricBinding {
    /// A real-valued metric, fetched with the numeric policy.
    Numeric {
        /// Feature name.
        name: String,
        /// The source.
        source: Arc<dyn MetricSource<Value = f64>>,
    },
    /// A count metric, fetched with the numeric policy and stored as a
    /// number.
    Count {
        /// Feature name.
        name: String,
        /// The source.
        source: Arc<dyn MetricSource<Value = u64>>,
    },
    /// A label metric, fetched with the categorical policy.
    Categorical {
        /// Feature name.
        name: String,
        /// The source.
        source: Arc<dyn MetricSource<Value = String>>,
    },
}

impl std::fmt::Debug for MetricBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, name, source) = match self {
            Self::Numeric { name, source } => ("numeric", name, source.name()),
            Self::Count { name, source } => ("count", name, source.name()),
            Self::Categorical { name, source } => ("categorical", name, source.name()),
        };
        f.debug_struct("MetricBinding")
            .field("kind", &kind)
            .field("name", name)
            .field("source", &source)
            .finish()
    }
}

impl MetricBinding {
    /// Binds a real-valued source.
    pub fn numeric(name: impl Into<String>, source: Arc<dyn MetricSource<Value = f64>>) -> Self {
        Self::Numeric {
            name: name.into(),
            source,
        }
    }

    /// Binds a count source.
    pub fn count(name: impl Into<String>, source: Arc<dyn MetricSource<Value = u64>>) -> Self {
        Self::Count {
            name: name.into(),
            source,
        }
    }

    /// Binds a label source.
    pub fn categorical(
        name: impl Into<String>,
        source: Arc<dyn MetricSource<Value = String>>,
    ) -> Self {
        Self::Categorical {
            name: name.into(),
            source,
        }
    }

    /// The feature name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Numeric { name, .. } | Self::Count { name, .. } | Self::Categorical { name, .. } => {
                name
            }
        }
    }
}

/// Everything gathered for one location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFeatures {
    /// The location's representative coordinate.
    pub origin: Coordinate,
    /// One record per sample point, in sampler order.
    pub records: Vec<FeatureRecord>,
    /// Administrative unit at the origin.
    pub admin: Option<AdminLookupResult>,
    /// Parcel valuation at the origin.
    pub valuation: Valuation,
}

/// Samples regions and fetches every bound metric at each sample point.
#[derive(Debug, Clone)]
pub struct FeatureAggregator {
    fetcher: RetryFallbackFetcher,
    reconciler: SourceReconciler,
    bindings: Vec<MetricBinding>,
    max_sample_points: usize,
    numeric_retry: NumericRetry,
    categorical_policy: RetryPolicy,
    concurrency: usize,
}

impl FeatureAggregator {
    /// Creates an aggregator with no metrics bound, taking sampling and
    /// retry settings from `config`.
    #[must_use]
    pub fn new(
        fetcher: RetryFallbackFetcher,
        reconciler: SourceReconciler,
        config: &AggregationConfig,
    ) -> Self {
        Self {
            fetcher,
            reconciler,
            bindings: Vec::new(),
            max_sample_points: config.sampling.max_sample_points,
            numeric_retry: config.retry.numeric.clone(),
            categorical_policy: config.retry.categorical.clone(),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Adds a metric binding.
    #[must_use]
    pub fn with_binding(mut self, binding: MetricBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// The bound metrics, in insertion order.
    #[must_use]
    pub fn bindings(&self) -> &[MetricBinding] {
        &self.bindings
    }

    /// The reconciler used once per location.
    #[must_use]
    pub const fn reconciler(&self) -> &SourceReconciler {
        &self.reconciler
    }

    /// Builds features for `region`, searching each metric from
    /// `sub_radius` meters around every sample point.
    ///
    /// Polygons are gridded at `sub_radius` spacing; circles are covered
    /// with at most the configured number of sample points.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::Sampler`] if the region cannot be sampled,
    /// or a configuration error from a provider. Missing data is never an
    /// error.
    pub async fn build_features(
        &self,
        region: &SampleRegion,
        sub_radius: f64,
    ) -> Result<LocationFeatures, FeatureError> {
        let points = sample_region(region, sub_radius, self.max_sample_points)?;
        let Some(origin) = region
            .anchor()
            .or_else(|| points.first().map(SamplePoint::coordinate))
        else {
            return Err(sitescore_spatial::SamplerError::DegeneratePolygon.into());
        };

        log::info!(
            "Building features at {origin}: {} sample points, {} metrics",
            points.len(),
            self.bindings.len()
        );

        let numeric_policy = self.numeric_retry.policy(sub_radius);
        let records = if self.concurrency > 1 {
            let mut indexed: Vec<(usize, FeatureRecord)> =
                stream::iter(points.iter().map(|point| {
                    let policy = &numeric_policy;
                    async move {
                        let record = self.fetch_point(point.coordinate(), policy).await?;
                        Ok::<_, FeatureError>((point.index(), record))
                    }
                }))
                .buffer_unordered(self.concurrency)
                .try_collect()
                .await?;
            indexed.sort_by_key(|(index, _)| *index);
            indexed.into_iter().map(|(_, record)| record).collect()
        } else {
            let mut records = Vec::with_capacity(points.len());
            for point in &points {
                records.push(self.fetch_point(point.coordinate(), &numeric_policy).await?);
            }
            records
        };

        let admin = self.reconciler.admin_lookup(origin).await?;
        let valuation = self.reconciler.valuation(origin).await?;

        Ok(LocationFeatures {
            origin,
            records,
            admin,
            valuation,
        })
    }

    /// Fetches every bound metric at one sample point.
    async fn fetch_point(
        &self,
        at: Coordinate,
        numeric_policy: &RetryPolicy,
    ) -> Result<FeatureRecord, FeatureError> {
        let mut record = FeatureRecord::new(at);
        for binding in &self.bindings {
            match binding {
                MetricBinding::Numeric { name, source } => {
                    let outcome = self.fetcher.fetch(source.as_ref(), at, numeric_policy).await?;
                    log_outcome(name, at, &outcome);
                    record.set_numeric(name.as_str(), outcome.value);
                }
                MetricBinding::Count { name, source } => {
                    let outcome = self.fetcher.fetch(source.as_ref(), at, numeric_policy).await?;
                    log_outcome(name, at, &outcome);
                    #[allow(clippy::cast_precision_loss)]
                    record.set_numeric(name.as_str(), outcome.value as f64);
                }
                MetricBinding::Categorical { name, source } => {
                    let outcome = self
                        .fetcher
                        .fetch(source.as_ref(), at, &self.categorical_policy)
                        .await?;
                    log_outcome(name, at, &outcome);
                    record.set_label(name.as_str(), outcome.value);
                }
            }
        }
        Ok(record)
    }
}

fn log_outcome<V: std::fmt::Debug>(name: &str, at: Coordinate, outcome: &FetchOutcome<V>) {
    match outcome.resolution {
        Resolution::Direct { radius, .. } => {
            log::debug!("{name} at {at}: {:?} within {radius} m", outcome.value);
        }
        Resolution::Snapped { snapped, .. } => {
            log::debug!("{name} at {at}: {:?} via {snapped}", outcome.value);
        }
        Resolution::Sentinel => log::debug!("{name} at {at}: no data"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sitescore_cache::{CacheConfig, GeoCache};
    use sitescore_fetch::PlaceSnapper;
    use sitescore_location_models::{AdminRecord, FeatureValue, Provenance};
    use sitescore_provider::{AdminSource, PlaceGeocoder, ProviderError};
    use sitescore_reconcile::ReconcilePolicy;

    struct Density;

    #[async_trait]
    impl MetricSource for Density {
        type Value = f64;

        fn name(&self) -> &str {
            "density"
        }

        async fn fetch(&self, at: Coordinate, _radius: f64) -> Result<Option<f64>, ProviderError> {
            Ok(Some(at.lat()))
        }
    }

    struct Pois {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetricSource for Pois {
        type Value = u64;

        fn name(&self) -> &str {
            "pois"
        }

        async fn fetch(&self, _at: Coordinate, radius: f64) -> Result<Option<u64>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(if radius > 150.0 { 3 } else { 0 }))
        }
    }

    struct Category;

    #[async_trait]
    impl MetricSource for Category {
        type Value = String;

        fn name(&self) -> &str {
            "category"
        }

        async fn fetch(&self, _at: Coordinate, _radius: f64) -> Result<Option<String>, ProviderError> {
            Ok(Some("cafe".to_string()))
        }
    }

    struct NoPlaces;

    #[async_trait]
    impl PlaceGeocoder for NoPlaces {
        async fn geocode_by_name(&self, name: &str) -> Result<Coordinate, ProviderError> {
            Err(ProviderError::NotFound {
                query: name.to_string(),
            })
        }

        async fn reverse_geocode(&self, _at: Coordinate) -> Result<Option<String>, ProviderError> {
            Ok(None)
        }
    }

    struct Blocks {
        seen: Mutex<Vec<Coordinate>>,
    }

    #[async_trait]
    impl AdminSource for Blocks {
        fn name(&self) -> &str {
            "blocks"
        }

        async fn lookup(&self, at: Coordinate) -> Result<Option<AdminRecord>, ProviderError> {
            self.seen.lock().unwrap().push(at);
            Ok(Some(AdminRecord {
                jurisdiction_id: "360610113001000".to_string(),
                parcel_id: None,
            }))
        }
    }

    fn aggregator(concurrency: usize) -> (FeatureAggregator, Arc<Blocks>, Arc<Pois>) {
        let cache = Arc::new(GeoCache::open(CacheConfig::default()));
        let snapper = PlaceSnapper::new(Arc::clone(&cache), Arc::new(NoPlaces));
        let fetcher = RetryFallbackFetcher::new(Arc::clone(&cache), snapper);
        let blocks = Arc::new(Blocks {
            seen: Mutex::new(Vec::new()),
        });
        let reconciler = SourceReconciler::new(cache, ReconcilePolicy::default())
            .with_admin(blocks.clone(), None);
        let pois = Arc::new(Pois {
            calls: AtomicUsize::new(0),
        });

        let mut config = AggregationConfig::default();
        config.concurrency = concurrency;
        config.retry.categorical.delay_ms = 0;

        let aggregator = FeatureAggregator::new(fetcher, reconciler, &config)
            .with_binding(MetricBinding::numeric("population_density", Arc::new(Density)))
            .with_binding(MetricBinding::count("poi_count", pois.clone()))
            .with_binding(MetricBinding::categorical("category", Arc::new(Category)));
        (aggregator, blocks, pois)
    }

    fn times_square() -> SampleRegion {
        SampleRegion::Circle {
            center: Coordinate::new(40.7580, -73.9855).unwrap(),
            radius_meters: 500.0,
        }
    }

    #[tokio::test]
    async fn one_record_per_sample_point_with_every_metric() {
        let (aggregator, blocks, _) = aggregator(1);
        let features = aggregator.build_features(&times_square(), 100.0).await.unwrap();

        assert!(!features.records.is_empty());
        assert!(features.records.len() <= 10);
        for record in &features.records {
            assert_eq!(
                record.get("population_density"),
                Some(&FeatureValue::Numeric(record.point.lat()))
            );
            assert_eq!(record.get("poi_count"), Some(&FeatureValue::Numeric(3.0)));
            assert_eq!(record.get("category").and_then(FeatureValue::as_label), Some("cafe"));
        }

        // Administrative lookup happens once, at the origin.
        assert_eq!(*blocks.seen.lock().unwrap(), vec![features.origin]);
        let admin = features.admin.unwrap();
        assert_eq!(admin.source, Provenance::Primary);
        assert!(!features.valuation.is_available());
    }

    #[tokio::test]
    async fn concurrent_run_preserves_sample_order() {
        let (sequential, _, _) = aggregator(1);
        let (concurrent, _, _) = aggregator(4);
        let a = sequential.build_features(&times_square(), 100.0).await.unwrap();
        let b = concurrent.build_features(&times_square(), 100.0).await.unwrap();

        let points_a: Vec<Coordinate> = a.records.iter().map(|r| r.point).collect();
        let points_b: Vec<Coordinate> = b.records.iter().map(|r| r.point).collect();
        assert_eq!(points_a, points_b);
    }

    #[tokio::test]
    async fn counts_expand_from_the_sub_radius() {
        let (aggregator, _, pois) = aggregator(1);
        let features = aggregator.build_features(&times_square(), 100.0).await.unwrap();
        // 100 m yields zero, 200 m succeeds: two calls per point.
        assert_eq!(pois.calls.load(Ordering::SeqCst), features.records.len() * 2);
    }

    #[tokio::test]
    async fn degenerate_polygon_is_a_sampler_error() {
        let (aggregator, _, _) = aggregator(1);
        let ring = vec![
            Coordinate::new(40.0, -73.0).unwrap(),
            Coordinate::new(40.1, -73.0).unwrap(),
        ];
        let err = aggregator
            .build_features(&SampleRegion::Polygon { ring }, 100.0)
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureError::Sampler(_)));
    }
}
