#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Retry-with-fallback strategy for single-point metrics.
//!
//! Every external metric (population density, POI counts, category
//! labels) goes through one [`RetryFallbackFetcher`]:
//!
//! 1. Try the metric at each radius of the [`RetryPolicy`] schedule,
//!    stopping at the first usable value.
//! 2. If none works, snap the point to the centroid of its nearest named
//!    place and try once more at the base radius.
//! 3. Otherwise return the value type's sentinel.
//!
//! Provider failures inside an attempt are logged and count as a miss.
//! Only configuration errors escape as [`FetchError`].

pub mod fetcher;
pub mod policy;
pub mod snap;
pub mod value;

use sitescore_provider::ProviderError;
use thiserror::Error;

pub use fetcher::{FetchOutcome, Resolution, RetryFallbackFetcher};
pub use policy::{RadiusSchedule, RetryPolicy};
pub use snap::PlaceSnapper;
pub use value::MetricValue;

/// Errors that stop a fetch. Data sparsity never produces one.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A provider reported a configuration problem.
    #[error("Configuration error from {provider}: {source}")]
    Config {
        /// The metric or geocoder that failed.
        provider: String,
        /// The underlying error.
        #[source]
        source: ProviderError,
    },
}
