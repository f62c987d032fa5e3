//! City-wide candidate generation.

use geo::MultiPolygon;
use sitescore_location_models::{Coordinate, SamplePoint};
use sitescore_provider::BoundaryLookup;
use sitescore_spatial::SamplerError;
use sitescore_spatial::sampler::sample_within_multipolygon;

use crate::FeatureError;

/// Grids `boundary` at `spacing_m` and keeps at most `cap` points.
///
/// # Errors
///
/// Returns [`SamplerError`] if the spacing is invalid or the grid is too
/// large.
pub fn candidates_within(
    boundary: &MultiPolygon<f64>,
    spacing_m: f64,
    cap: usize,
) -> Result<Vec<Coordinate>, SamplerError> {
    let mut candidates: Vec<Coordinate> = sample_within_multipolygon(boundary, spacing_m)?
        .iter()
        .map(SamplePoint::coordinate)
        .collect();
    if candidates.len() > cap {
        log::info!(
            "Boundary grid has {} candidates; keeping the first {cap}",
            candidates.len()
        );
        candidates.truncate(cap);
    }
    Ok(candidates)
}

/// Resolves the boundary of `place` and grids it into candidate
/// locations.
///
/// # Errors
///
/// Returns [`FeatureError::Provider`] if the boundary cannot be resolved
/// or [`FeatureError::Sampler`] if gridding fails.
pub async fn generate_city_candidates(
    lookup: &dyn BoundaryLookup,
    place: &str,
    spacing_m: f64,
    cap: usize,
) -> Result<Vec<Coordinate>, FeatureError> {
    log::info!("Generating candidates for '{place}' every {spacing_m} m...");
    let boundary = lookup
        .boundary(place)
        .await
        .map_err(|source| FeatureError::Provider {
            context: format!("Boundary lookup for '{place}'"),
            source,
        })?;
    let candidates = candidates_within(&boundary, spacing_m, cap)?;
    log::info!("{} candidates for '{place}'", candidates.len());
    Ok(candidates)
}
