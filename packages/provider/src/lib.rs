#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! External data providers for site scoring.
//!
//! The aggregation engine only sees the capability traits in
//! [`capability`]; everything else here is a concrete implementation of
//! one of them, configured from the TOML files in `services/` (see
//! [`service_registry`]):
//!
//! - **Nominatim**: place geocoding, reverse geocoding, boundaries.
//! - **Overpass**: point-of-interest counts and category labels.
//! - **`WorldPop`**: population density.
//! - **Foursquare open places**: POI counts and categories from a local
//!   Parquet snapshot, queried through `DuckDB`.
//! - **FCC** (primary) and **Census geographies** (secondary):
//!   administrative block lookups.
//! - **NYC Geoclient + DOF**: parcel resolution and valuation.
//! - **`MapPLUTO`**: assessed totals used as training labels.

pub mod capability;
pub mod census;
pub mod fcc;
pub mod foursquare;
pub mod geoclient;
pub mod http;
pub mod nominatim;
pub mod nyc_dof;
pub mod overpass;
pub mod pluto;
pub mod rate_limit;
pub mod service_registry;
pub mod worldpop;

use thiserror::Error;

pub use capability::{
    AdminSource, BoundaryLookup, LabelSource, MetricSource, PlaceGeocoder, ValuationSource,
};

/// Errors from provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Missing or invalid configuration (credentials, service entries).
    /// Every later call would fail the same way.
    #[error("Configuration error: {message}")]
    Config {
        /// What is missing or wrong.
        message: String,
    },

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP status {status}")]
    Status {
        /// The status code.
        status: u16,
    },

    /// Provider asked us to slow down (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The response did not have the expected shape.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// The query matched nothing.
    #[error("Not found: {query}")]
    NotFound {
        /// What was looked up.
        query: String,
    },

    /// Local `DuckDB` query failure.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

impl ProviderError {
    /// Shorthand for a [`ProviderError::Config`].
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ProviderError::Parse`].
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Configuration errors must reach the caller; nothing downstream can
    /// recover from them.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Server-side or transport conditions that may clear up on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::RateLimited | Self::Timeout => true,
            Self::Config { .. } | Self::Parse { .. } | Self::NotFound { .. } | Self::DuckDb(_) => {
                false
            }
        }
    }
}
