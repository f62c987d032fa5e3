//! Capability traits the aggregation engine consumes.
//!
//! Each trait is one kind of external lookup. Implementations return
//! `Ok(None)` (or an empty list) for "no data here", and reserve `Err`
//! for failed calls so callers can tell sparsity from breakage.

use async_trait::async_trait;
use geo::MultiPolygon;
use sitescore_location_models::{AdminRecord, Coordinate, ValuationCandidate, ValuationRecord};

use crate::ProviderError;

/// Place-name geocoding in both directions.
#[async_trait]
pub trait PlaceGeocoder: Send + Sync {
    /// Resolves a place name to a coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if nothing matches, or another
    /// [`ProviderError`] if the call fails.
    async fn geocode_by_name(&self, name: &str) -> Result<Coordinate, ProviderError>;

    /// Names the settlement containing `at`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails.
    async fn reverse_geocode(&self, at: Coordinate) -> Result<Option<String>, ProviderError>;
}

/// Administrative boundary lookup by place name.
#[async_trait]
pub trait BoundaryLookup: Send + Sync {
    /// Returns the areal boundary of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the place has no areal
    /// boundary, or another [`ProviderError`] if the call fails.
    async fn boundary(&self, name: &str) -> Result<MultiPolygon<f64>, ProviderError>;
}

/// A single-point metric lookup within a radius.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// The metric's value type.
    type Value: Send;

    /// Short identifier used in cache keys and logs.
    fn name(&self) -> &str;

    /// Fetches the metric around `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails.
    async fn fetch(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Option<Self::Value>, ProviderError>;
}

/// Administrative (census block / jurisdiction) lookup.
#[async_trait]
pub trait AdminSource: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Looks up the administrative unit containing `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails.
    async fn lookup(&self, at: Coordinate) -> Result<Option<AdminRecord>, ProviderError>;
}

/// Parcel valuation: identifier resolution, direct lookup, and spatial
/// search.
#[async_trait]
pub trait ValuationSource: Send + Sync {
    /// Resolves the parcel identifier at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails. A missing credential is
    /// [`ProviderError::Config`].
    async fn resolve_identifier(&self, at: Coordinate) -> Result<Option<String>, ProviderError>;

    /// Fetches the valuation record for a parcel identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails.
    async fn value_by_identifier(&self, id: &str)
    -> Result<Option<ValuationRecord>, ProviderError>;

    /// Returns valuation records located within a box of `radius_meters`
    /// around `at`. Candidates are not sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails.
    async fn values_near(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<ValuationCandidate>, ProviderError>;
}

/// Training label at a point (e.g. assessed total of the parcel there).
#[async_trait]
pub trait LabelSource: Send + Sync {
    /// Returns the label at `at`, if one is assigned.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the call fails.
    async fn label_at(&self, at: Coordinate) -> Result<Option<f64>, ProviderError>;
}
