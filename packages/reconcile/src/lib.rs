#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reconciliation of administrative and valuation lookups.
//!
//! Administrative lookups try a primary provider with bounded retry and
//! exponential backoff, then a secondary provider whose record is already
//! normalized into the same shape. Valuation lookups try a direct
//! identifier lookup, then the nearest record of a spatial search, and
//! finally settle for an explicit "unavailable" result.

pub mod policy;
pub mod reconciler;

use sitescore_provider::ProviderError;
use thiserror::Error;

pub use policy::ReconcilePolicy;
pub use reconciler::SourceReconciler;

/// Errors that stop a reconciliation. Missing data never produces one.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A provider reported a configuration problem.
    #[error("Configuration error from {provider}: {source}")]
    Config {
        /// The provider that failed.
        provider: String,
        /// The underlying error.
        #[source]
        source: ProviderError,
    },
}
