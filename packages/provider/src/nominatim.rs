//! Nominatim / `OpenStreetMap` geocoder client.
//!
//! Serves three roles: forward geocoding of place names, reverse
//! geocoding to the enclosing settlement (used by snap fallback), and
//! boundary polygons for city-wide candidate generation.
//!
//! Nominatim has strict rate limits: **1 request per second** on the
//! public instance. The client paces itself via `rate_limit_ms`.
//!
//! See <https://nominatim.org/release-docs/develop/api/Search/>

use async_trait::async_trait;
use geo::MultiPolygon;
use sitescore_location_models::Coordinate;

use crate::rate_limit::RateLimiter;
use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{BoundaryLookup, PlaceGeocoder, ProviderError, http};

/// Address fields that name a settlement, most specific last.
const SETTLEMENT_FIELDS: [&str; 3] = ["city", "town", "village"];

/// Nominatim HTTP client.
#[derive(Debug)]
pub struct NominatimClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    max_retries: u32,
}

impl NominatimClient {
    /// Creates a client from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not a Nominatim
    /// service.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::Nominatim { base_url } = &service.provider else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not nominatim",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::from_millis(service.rate_limit_ms),
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `nominatim` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("nominatim")?)
    }

    async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ProviderError> {
        self.limiter.acquire().await;
        let url = format!("{}/{path}", self.base_url);
        http::send_json(|| self.client.get(&url).query(params), self.max_retries).await
    }
}

#[async_trait]
impl PlaceGeocoder for NominatimClient {
    async fn geocode_by_name(&self, name: &str) -> Result<Coordinate, ProviderError> {
        let body = self
            .get(
                "search",
                &[
                    ("q", name.to_string()),
                    ("format", "jsonv2".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        parse_search(&body)?.ok_or_else(|| ProviderError::NotFound {
            query: name.to_string(),
        })
    }

    async fn reverse_geocode(&self, at: Coordinate) -> Result<Option<String>, ProviderError> {
        let body = self
            .get(
                "reverse",
                &[
                    ("lat", at.lat().to_string()),
                    ("lon", at.lon().to_string()),
                    ("format", "jsonv2".to_string()),
                    ("addressdetails", "1".to_string()),
                    ("accept-language", "en".to_string()),
                ],
            )
            .await?;
        Ok(parse_reverse_place(&body))
    }
}

#[async_trait]
impl BoundaryLookup for NominatimClient {
    async fn boundary(&self, name: &str) -> Result<MultiPolygon<f64>, ProviderError> {
        let body = self
            .get(
                "search",
                &[
                    ("q", name.to_string()),
                    ("format", "jsonv2".to_string()),
                    ("polygon_geojson", "1".to_string()),
                    ("limit", "5".to_string()),
                ],
            )
            .await?;
        parse_boundary_response(&body)?.ok_or_else(|| ProviderError::NotFound {
            query: format!("boundary of {name}"),
        })
    }
}

fn results(body: &serde_json::Value) -> Result<&Vec<serde_json::Value>, ProviderError> {
    body.as_array()
        .ok_or_else(|| ProviderError::parse("Nominatim response is not an array"))
}

/// Parses a search response into the first hit's coordinate.
fn parse_search(body: &serde_json::Value) -> Result<Option<Coordinate>, ProviderError> {
    let Some(first) = results(body)?.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| ProviderError::parse("Missing lat in Nominatim response"))?;

    let lon = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| ProviderError::parse("Missing lon in Nominatim response"))?;

    Coordinate::new(lat, lon)
        .map(Some)
        .map_err(|e| ProviderError::parse(format!("Nominatim returned {e}")))
}

/// Picks the settlement name (city, then town, then village) from a
/// reverse-geocode response.
fn parse_reverse_place(body: &serde_json::Value) -> Option<String> {
    let address = body.get("address")?;
    SETTLEMENT_FIELDS
        .iter()
        .filter_map(|field| address.get(field).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(String::from)
}

/// Returns the first areal boundary among search results.
fn parse_boundary_response(
    body: &serde_json::Value,
) -> Result<Option<MultiPolygon<f64>>, ProviderError> {
    Ok(results(body)?
        .iter()
        .filter_map(|r| r.get("geojson"))
        .find_map(|g| sitescore_spatial::boundary::parse_boundary(&g.to_string())))
}
