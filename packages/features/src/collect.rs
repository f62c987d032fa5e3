//! Resumable batch collection of labeled feature rows.
//!
//! Each labeled candidate is aggregated, reduced, and appended to the
//! output CSV immediately, so an interrupted run loses at most the
//! candidate in flight. On restart, candidates whose coordinate (rounded
//! to six decimals) already appears in the file are skipped.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sitescore_location_models::{Coordinate, FeatureRow, SampleRegion};
use sitescore_provider::LabelSource;

use crate::reduce::to_feature_row;
use crate::{FeatureAggregator, FeatureError, ProgressCallback};

/// Column holding the training label.
pub const LABEL_COLUMN: &str = "label";

/// Batch run parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectOptions {
    /// Neighborhood radius sampled around each candidate.
    pub neighborhood_radius_m: f64,
    /// Metric search radius at each sample point.
    pub sub_radius_m: f64,
    /// Output CSV, created or appended to.
    pub output: PathBuf,
}

/// What a batch run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectSummary {
    /// Candidates considered.
    pub candidates: usize,
    /// Candidates already present in the output.
    pub resumed: usize,
    /// Candidates skipped for lack of a label.
    pub unlabeled: usize,
    /// Rows appended.
    pub written: usize,
}

/// Collects a labeled row for every candidate not already in the output.
///
/// # Errors
///
/// Returns [`FeatureError`] on output I/O failure or a configuration
/// error from any provider. Unlabeled candidates and missing metric data
/// are not errors.
pub async fn collect(
    aggregator: &FeatureAggregator,
    labels: &dyn LabelSource,
    candidates: &[Coordinate],
    options: &CollectOptions,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<CollectSummary, FeatureError> {
    let mut sink = CsvSink::open(&options.output)?;
    let mut summary = CollectSummary {
        candidates: candidates.len(),
        ..CollectSummary::default()
    };

    log::info!(
        "Collecting {} candidates into {} ({} already done)",
        candidates.len(),
        options.output.display(),
        sink.done.len()
    );
    progress.set_total(candidates.len() as u64);

    for (i, &candidate) in candidates.iter().enumerate() {
        progress.set_message(format!("{candidate}"));

        if sink.contains(candidate) {
            summary.resumed += 1;
            progress.inc(1);
            continue;
        }

        let Some(label) = label_for(labels, candidate).await? else {
            log::debug!("[{}/{}] {candidate}: no label, skipping", i + 1, candidates.len());
            summary.unlabeled += 1;
            progress.inc(1);
            continue;
        };

        let region = SampleRegion::Circle {
            center: candidate,
            radius_meters: options.neighborhood_radius_m,
        };
        let features = aggregator
            .build_features(&region, options.sub_radius_m)
            .await?;
        sink.append(&to_feature_row(&features, Some(label)))?;
        summary.written += 1;
        log::info!("[{}/{}] {candidate}: label {label}", i + 1, candidates.len());
        progress.inc(1);
    }

    progress.finish(format!(
        "{} written, {} resumed, {} unlabeled",
        summary.written, summary.resumed, summary.unlabeled
    ));
    Ok(summary)
}

async fn label_for(
    labels: &dyn LabelSource,
    at: Coordinate,
) -> Result<Option<f64>, FeatureError> {
    match labels.label_at(at).await {
        Ok(label) => Ok(label.filter(|v| v.is_finite())),
        Err(e) if e.is_fatal() => Err(FeatureError::Provider {
            context: "Label lookup".to_string(),
            source: e,
        }),
        Err(e) => {
            log::warn!("Label lookup failed at {at}: {e}");
            Ok(None)
        }
    }
}

/// Coordinate identity used for resume matching.
#[allow(clippy::cast_possible_truncation)]
fn coordinate_key(lat: f64, lon: f64) -> (i64, i64) {
    ((lat * 1e6).round() as i64, (lon * 1e6).round() as i64)
}

/// Append-only CSV writer that remembers which coordinates it holds.
struct CsvSink {
    path: PathBuf,
    header: Option<Vec<String>>,
    done: HashSet<(i64, i64)>,
}

impl CsvSink {
    fn open(path: &Path) -> Result<Self, FeatureError> {
        let mut sink = Self {
            path: path.to_path_buf(),
            header: None,
            done: HashSet::new(),
        };

        let has_content = std::fs::metadata(path).is_ok_and(|m| m.len() > 0);
        if !has_content {
            return Ok(sink);
        }

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(ToString::to_string).collect();
        let lat_idx = header.iter().position(|h| h == "lat");
        let lon_idx = header.iter().position(|h| h == "lon");

        if let (Some(lat_idx), Some(lon_idx)) = (lat_idx, lon_idx) {
            for record in reader.records() {
                let record = record?;
                let lat = record.get(lat_idx).and_then(|v| v.parse::<f64>().ok());
                let lon = record.get(lon_idx).and_then(|v| v.parse::<f64>().ok());
                if let (Some(lat), Some(lon)) = (lat, lon) {
                    sink.done.insert(coordinate_key(lat, lon));
                }
            }
        } else {
            log::warn!(
                "{} has no lat/lon columns; nothing will be resumed",
                path.display()
            );
        }

        sink.header = Some(header);
        Ok(sink)
    }

    fn contains(&self, c: Coordinate) -> bool {
        self.done.contains(&coordinate_key(c.lat(), c.lon()))
    }

    fn append(&mut self, row: &FeatureRow) -> Result<(), FeatureError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let header = match &self.header {
            Some(header) => header.clone(),
            None => {
                let mut header = vec!["lat".to_string(), "lon".to_string()];
                header.extend(row.values.keys().cloned());
                header.push(LABEL_COLUMN.to_string());
                writer.write_record(&header)?;
                self.header = Some(header.clone());
                header
            }
        };

        let fields: Vec<String> = header
            .iter()
            .map(|column| match column.as_str() {
                "lat" => row.lat.to_string(),
                "lon" => row.lon.to_string(),
                LABEL_COLUMN => row.label.as_ref().map(ToString::to_string).unwrap_or_default(),
                name => row
                    .values
                    .get(name)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            })
            .collect();
        writer.write_record(&fields)?;
        writer.flush()?;

        self.done.insert(coordinate_key(row.lat, row.lon));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sitescore_cache::{CacheConfig, GeoCache};
    use sitescore_fetch::{PlaceSnapper, RetryFallbackFetcher};
    use sitescore_provider::{MetricSource, PlaceGeocoder, ProviderError};
    use sitescore_reconcile::{ReconcilePolicy, SourceReconciler};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{AggregationConfig, MetricBinding, null_progress};

    struct Density;

    #[async_trait]
    impl MetricSource for Density {
        type Value = f64;

        fn name(&self) -> &str {
            "density"
        }

        async fn fetch(&self, _at: Coordinate, _radius: f64) -> Result<Option<f64>, ProviderError> {
            Ok(Some(12.5))
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

    /// Labels points north of 40.5 with their latitude.
    struct NorthOnly {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LabelSource for NorthOnly {
        async fn label_at(&self, at: Coordinate) -> Result<Option<f64>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((at.lat() > 40.5).then(|| at.lat() * 1_000.0))
        }
    }

    fn aggregator() -> FeatureAggregator {
        let cache = Arc::new(GeoCache::open(CacheConfig::default()));
        let snapper = PlaceSnapper::new(Arc::clone(&cache), Arc::new(NoPlaces));
        let mut config = AggregationConfig::default();
        config.sampling.max_sample_points = 3;
        FeatureAggregator::new(
            RetryFallbackFetcher::new(Arc::clone(&cache), snapper),
            SourceReconciler::new(cache, ReconcilePolicy::default()),
            &config,
        )
        .with_binding(MetricBinding::numeric("population_density", Arc::new(Density)))
    }

    fn temp_output(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sitescore_collect_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir.join("rows.csv")
    }

    fn options(output: PathBuf) -> CollectOptions {
        CollectOptions {
            neighborhood_radius_m: 100.0,
            sub_radius_m: 50.0,
            output,
        }
    }

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[tokio::test]
    async fn writes_labeled_rows_and_resumes() {
        let output = temp_output("resume");
        let aggregator = aggregator();
        let labels = NorthOnly {
            calls: AtomicUsize::new(0),
        };
        let progress = null_progress();
        let candidates = vec![c(40.7, -73.9), c(40.1, -73.9), c(40.8, -73.95)];

        let first = collect(&aggregator, &labels, &candidates, &options(output.clone()), &progress)
            .await
            .unwrap();
        assert_eq!(
            first,
            CollectSummary {
                candidates: 3,
                resumed: 0,
                unlabeled: 1,
                written: 2,
            }
        );

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(ToString::to_string).collect();
        assert_eq!(
            header,
            vec!["lat", "lon", "jurisdiction_id", "population_density", "valuation", "label"]
        );
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "Unknown");
        assert_eq!(&rows[0][3], "12.5");
        assert_eq!(&rows[0][4], "NaN");
        assert_eq!(&rows[0][5], "40700");

        // A second run with one extra candidate only appends that one.
        let more = vec![c(40.7, -73.9), c(40.1, -73.9), c(40.8, -73.95), c(40.9, -73.9)];
        let second = collect(&aggregator, &labels, &more, &options(output.clone()), &progress)
            .await
            .unwrap();
        assert_eq!(second.resumed, 2);
        assert_eq!(second.written, 1);
        assert_eq!(second.unlabeled, 1);

        let rows = csv::Reader::from_path(&output).unwrap().records().count();
        assert_eq!(rows, 3);

        std::fs::remove_dir_all(output.parent().unwrap()).unwrap();
    }

    #[test]
    fn coordinate_key_rounds_to_six_decimals() {
        assert_eq!(coordinate_key(40.758_000_4, -73.985_5), coordinate_key(40.758, -73.985_500_3));
        assert_ne!(coordinate_key(40.758_001, -73.9855), coordinate_key(40.758, -73.9855));
    }

    #[tokio::test]
    async fn fatal_label_error_stops_the_run() {
        struct Unconfigured;

        #[async_trait]
        impl LabelSource for Unconfigured {
            async fn label_at(&self, _at: Coordinate) -> Result<Option<f64>, ProviderError> {
                Err(ProviderError::config("missing key"))
            }
        }

        let output = temp_output("fatal");
        let err = collect(
            &aggregator(),
            &Unconfigured,
            &[c(40.7, -73.9)],
            &options(output.clone()),
            &null_progress(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FeatureError::Provider { .. }));
        assert!(!output.exists());
    }
}
