//! Cache key construction.
//!
//! Keys are plain strings. Place names are hashed so that arbitrary user
//! input never leaks into the store layout; coordinate keys are rounded to
//! six decimals (about 0.1 m) so float noise maps to the same entry.
//!
//! Stores written before the `place:` namespace keyed geocodes by the bare
//! SHA-1 hex of the normalized name; [`CacheKey::legacy_place`] rebuilds
//! those keys so migrated entries can still be hit.

use sha1::Sha1;
use sha2::{Digest, Sha256};
use sitescore_location_models::Coordinate;

/// Builders for the cache key namespaces.
pub struct CacheKey;

impl CacheKey {
    /// Key for a place-name geocode. Case and surrounding whitespace are
    /// ignored.
    #[must_use]
    pub fn place(name: &str) -> String {
        let digest = Sha256::digest(normalize_place(name).as_bytes());
        format!("place:{}", hex::encode(digest))
    }

    /// Pre-namespace key for a place-name geocode: the bare SHA-1 hex of
    /// the normalized name.
    #[must_use]
    pub fn legacy_place(name: &str) -> String {
        hex::encode(Sha1::digest(normalize_place(name).as_bytes()))
    }

    /// Key for a metric fetched at `coordinate` within `radius_meters`.
    #[must_use]
    pub fn point(metric: &str, coordinate: Coordinate, radius_meters: f64) -> String {
        format!(
            "{metric}:{}:{}:{radius_meters:.1}",
            fixed6(coordinate.lat()),
            fixed6(coordinate.lon()),
        )
    }

    /// Key for a radius-less lookup at `coordinate` (reverse geocodes,
    /// admin lookups).
    #[must_use]
    pub fn coordinate(kind: &str, coordinate: Coordinate) -> String {
        format!(
            "{kind}:{}:{}",
            fixed6(coordinate.lat()),
            fixed6(coordinate.lon())
        )
    }
}

fn normalize_place(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Six-decimal rendering with negative zero folded into zero.
fn fixed6(v: f64) -> String {
    let s = format!("{v:.6}");
    if s == "-0.000000" { "0.000000".to_string() } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn place_keys_ignore_case_and_padding() {
        assert_eq!(CacheKey::place("Brooklyn, NY"), CacheKey::place("  brooklyn, ny "));
        assert_ne!(CacheKey::place("Brooklyn"), CacheKey::place("Queens"));
        let key = CacheKey::place("Brooklyn");
        assert!(key.starts_with("place:"));
        assert_eq!(key.len(), "place:".len() + 64);
    }

    #[test]
    fn legacy_place_keys_are_bare_sha1() {
        assert_eq!(
            CacheKey::legacy_place(" Brooklyn "),
            "eab3d2bab6ded567f25ca57b0c0d2c21ee017287"
        );
    }

    #[test]
    fn point_keys_round_to_six_decimals() {
        let a = Coordinate::new(40.758_000_01, -73.985_5).unwrap();
        let b = Coordinate::new(40.758_000_04, -73.985_500_02).unwrap();
        assert_eq!(
            CacheKey::point("poi_count", a, 500.0),
            CacheKey::point("poi_count", b, 500.0)
        );
        assert_eq!(
            CacheKey::point("poi_count", a, 500.0),
            "poi_count:40.758000:-73.985500:500.0"
        );
        assert_ne!(
            CacheKey::point("poi_count", a, 500.0),
            CacheKey::point("poi_count", a, 1000.0)
        );
    }

    #[test]
    fn coordinate_keys_fold_negative_zero() {
        let c = Coordinate::new(-0.000_000_1, 0.0).unwrap();
        assert_eq!(CacheKey::coordinate("reverse", c), "reverse:0.000000:0.000000");
    }
}
