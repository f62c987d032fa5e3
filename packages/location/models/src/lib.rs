#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Location types shared by the sampling, fetching, and aggregation crates.
//!
//! These are plain value types: coordinates and the regions built from
//! them, the per-point feature records produced during one aggregation
//! pass, and the administrative/valuation records returned by the
//! reconciler. None of them perform I/O.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Errors raised when constructing location values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    /// Latitude outside `[-90, 90]` or not finite.
    #[error("Latitude out of range: {0}")]
    Latitude(f64),

    /// Longitude outside `[-180, 180]` or not finite.
    #[error("Longitude out of range: {0}")]
    Longitude(f64),
}

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    lat: f64,
    lon: f64,
}

impl Coordinate {
    /// Creates a coordinate, validating both axes.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] if either axis is out of range or not
    /// finite.
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::Longitude(lon));
        }
        Ok(Self { lat, lon })
    }

    /// Creates a coordinate by clamping latitude into range and wrapping
    /// longitude into `[-180, 180]`.
    ///
    /// Used for grid points derived arithmetically from a valid center,
    /// which can step a hair past the poles or the antimeridian.
    #[must_use]
    pub fn normalized(lat: f64, lon: f64) -> Self {
        let lat = lat.clamp(-90.0, 90.0);
        let mut lon = lon;
        if lon > 180.0 || lon < -180.0 {
            lon = (lon + 180.0).rem_euclid(360.0) - 180.0;
        }
        Self { lat, lon }
    }

    /// Latitude in decimal degrees.
    #[must_use]
    pub const fn lat(&self) -> f64 {
        self.lat
    }

    /// Longitude in decimal degrees.
    #[must_use]
    pub const fn lon(&self) -> f64 {
        self.lon
    }

    /// Returns `true` if both axes match after rounding to `decimals`
    /// places.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, decimals: i32) -> bool {
        let scale = 10f64.powi(decimals);
        (self.lat * scale).round() == (other.lat * scale).round()
            && (self.lon * scale).round() == (other.lon * scale).round()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// An area to be characterized by sub-samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleRegion {
    /// A disk around a center point.
    Circle {
        /// Disk center.
        center: Coordinate,
        /// Disk radius in meters.
        radius_meters: f64,
    },
    /// A single closed ring. The closing vertex may be omitted.
    Polygon {
        /// Ring vertices.
        ring: Vec<Coordinate>,
    },
}

impl SampleRegion {
    /// Representative coordinate for the region: the center of a circle
    /// or the vertex average of a polygon ring.
    #[must_use]
    pub fn anchor(&self) -> Option<Coordinate> {
        match self {
            Self::Circle { center, .. } => Some(*center),
            Self::Polygon { ring } => {
                if ring.is_empty() {
                    return None;
                }
                #[allow(clippy::cast_precision_loss)]
                let n = ring.len() as f64;
                let lat = ring.iter().map(Coordinate::lat).sum::<f64>() / n;
                let lon = ring.iter().map(Coordinate::lon).sum::<f64>() / n;
                Some(Coordinate::normalized(lat, lon))
            }
        }
    }
}

/// How a [`SamplePoint`] was derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleOrigin {
    /// Circle sub-sampling around `center`.
    Circle {
        /// Center of the sampled disk.
        center: Coordinate,
        /// Radius of the sampled disk in meters.
        radius_meters: f64,
        /// Sub-circle radius chosen by the sampler.
        sub_radius_meters: f64,
    },
    /// Polygon grid enumeration.
    Polygon {
        /// Grid spacing requested by the caller, in meters.
        spacing_meters: f64,
    },
}

/// A coordinate produced by the region sampler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplePoint {
    coordinate: Coordinate,
    origin: SampleOrigin,
    index: usize,
}

impl SamplePoint {
    /// Creates a sample point. `index` is the point's position in the
    /// sampler's output.
    #[must_use]
    pub const fn new(coordinate: Coordinate, origin: SampleOrigin, index: usize) -> Self {
        Self {
            coordinate,
            origin,
            index,
        }
    }

    /// The sampled coordinate.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    /// The region this point was derived from.
    #[must_use]
    pub const fn origin(&self) -> SampleOrigin {
        self.origin
    }

    /// Position in the sampler's output.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

/// A single metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Numeric metric (density, count, valuation).
    Numeric(f64),
    /// Categorical label.
    Categorical(String),
}

impl FeatureValue {
    /// Returns the numeric value, if any.
    #[must_use]
    pub const fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }

    /// Returns the categorical label, if any.
    #[must_use]
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Self::Numeric(_) => None,
            Self::Categorical(s) => Some(s),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{v}"),
            Self::Categorical(s) => f.write_str(s),
        }
    }
}

/// Metric values gathered at one sample point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// The sample point coordinate.
    pub point: Coordinate,
    /// Metric name -> value.
    pub values: BTreeMap<String, FeatureValue>,
}

impl FeatureRecord {
    /// Creates an empty record for `point`.
    #[must_use]
    pub const fn new(point: Coordinate) -> Self {
        Self {
            point,
            values: BTreeMap::new(),
        }
    }

    /// Sets a numeric metric.
    pub fn set_numeric(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), FeatureValue::Numeric(value));
    }

    /// Sets a categorical metric.
    pub fn set_label(&mut self, name: impl Into<String>, label: impl Into<String>) {
        self.values
            .insert(name.into(), FeatureValue::Categorical(label.into()));
    }

    /// Looks up a metric by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.values.get(name)
    }
}

/// Which provider in a primary/secondary chain produced a record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    /// The preferred provider.
    Primary,
    /// The fallback provider.
    Secondary,
}

/// An administrative record in the canonical shape every provider is
/// normalized into, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRecord {
    /// Jurisdiction identifier (census block FIPS).
    pub jurisdiction_id: String,
    /// Parcel identifier, when the provider knows it.
    pub parcel_id: Option<String>,
}

impl AdminRecord {
    /// Attaches provenance.
    #[must_use]
    pub fn tagged(self, source: Provenance) -> AdminLookupResult {
        AdminLookupResult {
            jurisdiction_id: self.jurisdiction_id,
            parcel_id: self.parcel_id,
            source,
        }
    }
}

/// Result of an administrative lookup, with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLookupResult {
    /// Jurisdiction identifier (census block FIPS).
    pub jurisdiction_id: String,
    /// Parcel identifier, when known.
    pub parcel_id: Option<String>,
    /// Which provider produced the record.
    pub source: Provenance,
}

/// A valuation record fetched by identifier or spatial search.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRecord {
    /// Full market value.
    pub market_value: Option<f64>,
    /// Assessed value.
    pub assessed_value: Option<f64>,
}

impl ValuationRecord {
    /// The record's usable value: market value if present and finite,
    /// otherwise assessed value if present and finite.
    #[must_use]
    pub fn usable_value(&self) -> Option<f64> {
        self.market_value
            .filter(|v| v.is_finite())
            .or_else(|| self.assessed_value.filter(|v| v.is_finite()))
    }
}

/// A valuation record located near a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationCandidate {
    /// Where the record is located.
    pub coordinate: Coordinate,
    /// The record itself.
    pub record: ValuationRecord,
}

/// How a [`Valuation`] was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValuationBasis {
    /// Direct identifier lookup.
    Identifier {
        /// The resolved identifier.
        id: String,
    },
    /// Nearest record from a spatial search.
    Nearest {
        /// Distance from the query point in meters.
        distance_meters: f64,
    },
    /// Nothing usable was found.
    Unavailable,
}

/// A valuation result. `value` is NaN when `basis` is
/// [`ValuationBasis::Unavailable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    /// The value, or NaN.
    pub value: f64,
    /// How it was obtained.
    pub basis: ValuationBasis,
}

impl Valuation {
    /// The "no data" valuation.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self {
            value: f64::NAN,
            basis: ValuationBasis::Unavailable,
        }
    }

    /// Returns `true` if a usable value was found.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        !matches!(self.basis, ValuationBasis::Unavailable)
    }
}

/// A location-level row handed to tabular export or regression input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    /// Origin latitude.
    pub lat: f64,
    /// Origin longitude.
    pub lon: f64,
    /// Metric name -> reduced value.
    pub values: BTreeMap<String, FeatureValue>,
    /// Optional training label.
    pub label: Option<f64>,
}
