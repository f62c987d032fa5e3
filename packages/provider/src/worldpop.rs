//! `WorldPop` zonal statistics client.
//!
//! Sends a circle around the point (as a `GeoJSON` polygon) to the stats
//! service and converts the returned total population into people per
//! square kilometer.
//!
//! See <https://www.worldpop.org/sdi/advancedapi>

use std::f64::consts::PI;

use async_trait::async_trait;
use sitescore_location_models::Coordinate;
use sitescore_spatial::geomath::{meters_to_degrees_lat, meters_to_degrees_lon};

use crate::rate_limit::RateLimiter;
use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{MetricSource, ProviderError, http};

/// Vertices used to approximate the query circle.
const CIRCLE_VERTICES: u32 = 32;

/// Population density source backed by the `WorldPop` stats API.
#[derive(Debug)]
pub struct WorldPopDensity {
    client: reqwest::Client,
    base_url: String,
    dataset: String,
    year: u16,
    limiter: RateLimiter,
    max_retries: u32,
}

impl WorldPopDensity {
    /// Creates a source from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not a `WorldPop`
    /// service.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::WorldPop {
            base_url,
            dataset,
            year,
        } = &service.provider
        else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not world_pop",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            base_url: base_url.clone(),
            dataset: dataset.clone(),
            year: *year,
            limiter: RateLimiter::from_millis(service.rate_limit_ms),
            max_retries: service.max_retries,
        })
    }

    /// Creates a source from the `worldpop` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("worldpop")?)
    }
}

#[async_trait]
impl MetricSource for WorldPopDensity {
    type Value = f64;

    fn name(&self) -> &str {
        "population_density"
    }

    async fn fetch(&self, at: Coordinate, radius_meters: f64) -> Result<Option<f64>, ProviderError> {
        let radius = radius_meters.max(1.0);
        let geojson = circle_geojson(at, radius).to_string();
        let params = [
            ("dataset", self.dataset.clone()),
            ("year", self.year.to_string()),
            ("geojson", geojson),
            ("runasync", "false".to_string()),
        ];

        self.limiter.acquire().await;
        let body = http::send_json(
            || self.client.get(&self.base_url).query(&params),
            self.max_retries,
        )
        .await?;

        let Some(total) = parse_total_population(&body)? else {
            return Ok(None);
        };
        let area_km2 = PI * radius * radius / 1_000_000.0;
        Ok(Some(total / area_km2))
    }
}

/// A closed polygon approximating a circle, as a `GeoJSON` geometry.
fn circle_geojson(center: Coordinate, radius_meters: f64) -> serde_json::Value {
    let dlat = meters_to_degrees_lat(radius_meters);
    let dlon = meters_to_degrees_lon(radius_meters, center.lat());

    let mut ring: Vec<[f64; 2]> = (0..CIRCLE_VERTICES)
        .map(|i| {
            let theta = 2.0 * PI * f64::from(i) / f64::from(CIRCLE_VERTICES);
            [
                center.lon() + dlon * theta.cos(),
                center.lat() + dlat * theta.sin(),
            ]
        })
        .collect();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }

    serde_json::json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [ring]}
        }]
    })
}

/// Reads `data.total_population`. A service-reported error is a parse
/// failure; a missing total is "no data".
fn parse_total_population(body: &serde_json::Value) -> Result<Option<f64>, ProviderError> {
    if body["error"].as_bool() == Some(true) {
        let message = body["error_message"]
            .as_str()
            .unwrap_or("unknown WorldPop error");
        return Err(ProviderError::parse(format!("WorldPop: {message}")));
    }
    Ok(body["data"]["total_population"]
        .as_f64()
        .filter(|v| v.is_finite() && *v >= 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn circle_is_closed_and_centered() {
        let center = Coordinate::new(40.758, -73.9855).unwrap();
        let gj = circle_geojson(center, 500.0);
        let ring = gj["features"][0]["geometry"]["coordinates"][0]
            .as_array()
            .unwrap();
        assert_eq!(ring.len(), CIRCLE_VERTICES as usize + 1);
        assert_eq!(ring.first(), ring.last());

        let lons: Vec<f64> = ring.iter().map(|p| p[0].as_f64().unwrap()).collect();
        let mid = (lons.iter().copied().fold(f64::INFINITY, f64::min)
            + lons.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            / 2.0;
        assert!((mid - center.lon()).abs() < 1e-9);
    }

    #[test]
    fn parses_total_population() {
        let body = json!({"status": "finished", "error": false, "data": {"total_population": 7853.98}});
        assert_eq!(parse_total_population(&body).unwrap(), Some(7853.98));

        let empty = json!({"status": "finished", "error": false, "data": {}});
        assert_eq!(parse_total_population(&empty).unwrap(), None);

        let failed = json!({"error": true, "error_message": "geojson too large"});
        assert!(parse_total_population(&failed).is_err());
    }
}
