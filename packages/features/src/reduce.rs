//! Collapsing per-point records into one row per location.

use std::collections::BTreeMap;

use sitescore_location_models::{FeatureRecord, FeatureRow, FeatureValue};

use crate::LocationFeatures;

/// Label every encoder treats as the fallback category.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Column holding the location's valuation (NaN when unavailable).
pub const VALUATION_FIELD: &str = "valuation";

/// Column holding the location's jurisdiction identifier.
pub const JURISDICTION_FIELD: &str = "jurisdiction_id";

/// Unweighted mean of every numeric field across `records`. Sentinel
/// values take part like any other value.
#[must_use]
pub fn reduce_mean(records: &[FeatureRecord]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<&str, (f64, u32)> = BTreeMap::new();
    for record in records {
        for (name, value) in &record.values {
            if let Some(v) = value.as_numeric() {
                let entry = sums.entry(name.as_str()).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }
    sums.into_iter()
        .map(|(name, (sum, n))| (name.to_string(), sum / f64::from(n)))
        .collect()
}

/// Most frequent label of every categorical field across `records`.
/// Ties go to the lexicographically smallest label.
#[must_use]
pub fn reduce_mode(records: &[FeatureRecord]) -> BTreeMap<String, String> {
    let mut counts: BTreeMap<&str, BTreeMap<&str, u32>> = BTreeMap::new();
    for record in records {
        for (name, value) in &record.values {
            if let Some(label) = value.as_label() {
                *counts
                    .entry(name.as_str())
                    .or_default()
                    .entry(label)
                    .or_insert(0) += 1;
            }
        }
    }
    counts
        .into_iter()
        .filter_map(|(name, labels)| {
            // Iteration is in label order, so the first maximum wins ties.
            let mut best: Option<(&str, u32)> = None;
            for (label, n) in labels {
                if best.is_none_or(|(_, m)| n > m) {
                    best = Some((label, n));
                }
            }
            best.map(|(label, _)| (name.to_string(), label.to_string()))
        })
        .collect()
}

/// Reduces a location to a single row: numeric means, categorical modes,
/// the valuation, and the jurisdiction.
#[must_use]
pub fn to_feature_row(features: &LocationFeatures, label: Option<f64>) -> FeatureRow {
    let mut values: BTreeMap<String, FeatureValue> = reduce_mean(&features.records)
        .into_iter()
        .map(|(name, v)| (name, FeatureValue::Numeric(v)))
        .collect();
    values.extend(
        reduce_mode(&features.records)
            .into_iter()
            .map(|(name, l)| (name, FeatureValue::Categorical(l))),
    );
    values.insert(
        VALUATION_FIELD.to_string(),
        FeatureValue::Numeric(features.valuation.value),
    );
    values.insert(
        JURISDICTION_FIELD.to_string(),
        FeatureValue::Categorical(
            features
                .admin
                .as_ref()
                .map_or_else(|| UNKNOWN_LABEL.to_string(), |a| a.jurisdiction_id.clone()),
        ),
    );

    FeatureRow {
        lat: features.origin.lat(),
        lon: features.origin.lon(),
        values,
        label,
    }
}

/// Stable integer codes for categorical labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryEncoder {
    codes: BTreeMap<String, usize>,
}

impl CategoryEncoder {
    /// Assigns codes to the sorted unique labels.
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut codes: BTreeMap<String, usize> =
            labels.into_iter().map(|l| (l.into(), 0)).collect();
        for (code, slot) in codes.values_mut().enumerate() {
            *slot = code;
        }
        Self { codes }
    }

    /// The code for `label`. Unseen labels get the code of `"Unknown"`
    /// when the encoder knows it.
    #[must_use]
    pub fn encode(&self, label: &str) -> Option<usize> {
        self.codes
            .get(label)
            .or_else(|| self.codes.get(UNKNOWN_LABEL))
            .copied()
    }

    /// The label for `code`.
    #[must_use]
    pub fn decode(&self, code: usize) -> Option<&str> {
        self.codes
            .iter()
            .find_map(|(label, c)| (*c == code).then_some(label.as_str()))
    }

    /// Number of known labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Returns `true` if no labels are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescore_location_models::{AdminRecord, Coordinate, Provenance, Valuation};

    fn record(lat: f64, density: f64, category: &str) -> FeatureRecord {
        let mut r = FeatureRecord::new(Coordinate::new(lat, -73.0).unwrap());
        r.set_numeric("density", density);
        r.set_label("category", category);
        r
    }

    #[test]
    fn mean_includes_sentinels() {
        let records = vec![record(40.0, 10.0, "a"), record(40.1, 0.0, "a"), record(40.2, 20.0, "b")];
        let means = reduce_mean(&records);
        assert!((means["density"] - 10.0).abs() < 1e-9);
        assert!(!means.contains_key("category"));
    }

    #[test]
    fn mode_breaks_ties_lexicographically() {
        let records = vec![
            record(40.0, 1.0, "park"),
            record(40.1, 1.0, "cafe"),
            record(40.2, 1.0, "park"),
            record(40.3, 1.0, "cafe"),
        ];
        assert_eq!(reduce_mode(&records)["category"], "cafe");

        let records = vec![record(40.0, 1.0, "park"), record(40.1, 1.0, "park"), record(40.2, 1.0, "cafe")];
        assert_eq!(reduce_mode(&records)["category"], "park");
    }

    #[test]
    fn empty_records_reduce_to_nothing() {
        assert!(reduce_mean(&[]).is_empty());
        assert!(reduce_mode(&[]).is_empty());
    }

    #[test]
    fn row_carries_valuation_and_jurisdiction() {
        let origin = Coordinate::new(40.758, -73.9855).unwrap();
        let features = LocationFeatures {
            origin,
            records: vec![record(40.0, 4.0, "cafe")],
            admin: Some(
                AdminRecord {
                    jurisdiction_id: "360610113001000".to_string(),
                    parcel_id: None,
                }
                .tagged(Provenance::Primary),
            ),
            valuation: Valuation::unavailable(),
        };

        let row = to_feature_row(&features, Some(1_102_500.0));
        assert!((row.lat - 40.758).abs() < f64::EPSILON);
        assert_eq!(row.label, Some(1_102_500.0));
        assert_eq!(row.values["density"], FeatureValue::Numeric(4.0));
        assert_eq!(row.values["category"], FeatureValue::Categorical("cafe".to_string()));
        assert!(row.values[VALUATION_FIELD].as_numeric().unwrap().is_nan());
        assert_eq!(
            row.values[JURISDICTION_FIELD].as_label(),
            Some("360610113001000")
        );
    }

    #[test]
    fn encoder_codes_are_sorted_and_fall_back_to_unknown() {
        let encoder = CategoryEncoder::fit(["park", "cafe", "Unknown", "cafe"]);
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.encode("Unknown"), Some(0));
        assert_eq!(encoder.encode("cafe"), Some(1));
        assert_eq!(encoder.encode("park"), Some(2));
        assert_eq!(encoder.encode("museum"), Some(0));
        assert_eq!(encoder.decode(2), Some("park"));

        let strict = CategoryEncoder::fit(["cafe"]);
        assert_eq!(strict.encode("museum"), None);
    }
}
