#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Feature aggregation for candidate locations.
//!
//! [`FeatureAggregator`] samples a region, fetches every bound metric at
//! each sample point, and reconciles the administrative record and
//! valuation once per location. [`reduce`] collapses the per-point
//! records into one row, [`candidates`] grids a city boundary into
//! candidate locations, and [`collect`] runs the whole pipeline over a
//! candidate list, appending labeled rows to a CSV that can be resumed.

pub mod aggregator;
pub mod candidates;
pub mod collect;
pub mod config;
pub mod progress;
pub mod reduce;

use std::path::PathBuf;

use sitescore_fetch::FetchError;
use sitescore_provider::ProviderError;
use sitescore_reconcile::ReconcileError;
use sitescore_spatial::SamplerError;
use thiserror::Error;

pub use aggregator::{FeatureAggregator, LocationFeatures, MetricBinding};
pub use config::AggregationConfig;
pub use progress::{NullProgress, ProgressCallback, null_progress};

/// Errors from aggregation and batch collection.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// A metric source or geocoder is misconfigured.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// An administrative or valuation provider is misconfigured.
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    /// The region could not be sampled.
    #[error(transparent)]
    Sampler(#[from] SamplerError),

    /// A provider call needed to set up the run failed.
    #[error("{context}: {source}")]
    Provider {
        /// What was being looked up.
        context: String,
        /// The underlying error.
        #[source]
        source: ProviderError,
    },

    /// The configuration file could not be parsed.
    #[error("Invalid config file {}: {source}", path.display())]
    ConfigFile {
        /// The file that failed to parse.
        path: PathBuf,
        /// The parse error.
        #[source]
        source: toml::de::Error,
    },

    /// Output I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// CSV reading or writing failed.
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
