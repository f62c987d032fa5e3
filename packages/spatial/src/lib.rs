#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Spatial primitives for site scoring.
//!
//! [`geomath`] holds the pure distance/degree conversions; [`sampler`]
//! turns a region (a disk or a polygon) into a bounded set of sample
//! points; [`boundary`] parses `GeoJSON` boundaries returned by geocoders
//! into `geo` polygons the sampler can grid.

pub mod boundary;
pub mod geomath;
pub mod sampler;

/// Errors from region sampling.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplerError {
    /// `max_points` must be at least 1.
    #[error("max_points must be at least 1 (got {0})")]
    InvalidMaxPoints(usize),

    /// Grid spacing must be a positive, finite number of meters.
    #[error("Grid spacing must be positive (got {0} m)")]
    InvalidSpacing(f64),

    /// The polygon has fewer than three distinct vertices.
    #[error("Polygon ring has fewer than 3 distinct vertices")]
    DegeneratePolygon,

    /// The requested grid would be unreasonably large.
    #[error("Grid would contain ~{estimated} points (limit {limit})")]
    GridTooLarge {
        /// Estimated number of grid points.
        estimated: u64,
        /// Configured limit.
        limit: u64,
    },
}
