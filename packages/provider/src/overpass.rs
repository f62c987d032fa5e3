//! Overpass API client for `OpenStreetMap` feature queries.
//!
//! Two metrics come from here: the number of `amenity` features within a
//! radius, and a land-use style category label (the first `amenity`,
//! `shop`, or `landuse` tag found, in that order of preference).
//!
//! See <https://wiki.openstreetmap.org/wiki/Overpass_API/Overpass_QL>

use std::sync::Arc;

use async_trait::async_trait;
use sitescore_location_models::Coordinate;

use crate::rate_limit::RateLimiter;
use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{MetricSource, ProviderError, http};

/// Tag keys consulted for a category label, in order of preference.
pub const CATEGORY_KEYS: [&str; 3] = ["amenity", "shop", "landuse"];

/// Maximum number of tagged elements pulled for category detection.
const CATEGORY_ELEMENT_LIMIT: u32 = 200;

/// Overpass HTTP client.
#[derive(Debug)]
pub struct OverpassClient {
    client: reqwest::Client,
    base_url: String,
    query_timeout_secs: u32,
    limiter: RateLimiter,
    max_retries: u32,
}

impl OverpassClient {
    /// Creates a client from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not an Overpass
    /// service.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::Overpass {
            base_url,
            query_timeout_secs,
        } = &service.provider
        else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not overpass",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            base_url: base_url.clone(),
            query_timeout_secs: *query_timeout_secs,
            limiter: RateLimiter::from_millis(service.rate_limit_ms),
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `overpass` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("overpass")?)
    }

    async fn run(&self, query: String) -> Result<serde_json::Value, ProviderError> {
        self.limiter.acquire().await;
        log::debug!("Overpass query: {query}");
        let form = [("data", query)];
        http::send_json(
            || self.client.post(&self.base_url).form(&form),
            self.max_retries,
        )
        .await
    }

    /// Counts `amenity` features within `radius_meters` of `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the request or parsing fails.
    pub async fn poi_count(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Option<u64>, ProviderError> {
        let body = self
            .run(count_query(at, radius_meters, self.query_timeout_secs))
            .await?;
        parse_count(&body).map(Some)
    }

    /// Returns the preferred category label within `radius_meters` of `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the request or parsing fails.
    pub async fn category(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Option<String>, ProviderError> {
        let body = self
            .run(category_query(at, radius_meters, self.query_timeout_secs))
            .await?;
        parse_category(&body)
    }
}

fn around(at: Coordinate, radius_meters: f64) -> String {
    format!(
        "around:{:.0},{:.6},{:.6}",
        radius_meters.max(1.0),
        at.lat(),
        at.lon()
    )
}

fn count_query(at: Coordinate, radius_meters: f64, timeout_secs: u32) -> String {
    format!(
        "[out:json][timeout:{timeout_secs}];nwr({})[amenity];out count;",
        around(at, radius_meters)
    )
}

fn category_query(at: Coordinate, radius_meters: f64, timeout_secs: u32) -> String {
    let filter = around(at, radius_meters);
    let union: String = CATEGORY_KEYS
        .iter()
        .map(|key| format!("nwr({filter})[{key}];"))
        .collect();
    format!("[out:json][timeout:{timeout_secs}];({union});out tags {CATEGORY_ELEMENT_LIMIT};")
}

/// Reads the `total` of an `out count;` response.
fn parse_count(body: &serde_json::Value) -> Result<u64, ProviderError> {
    let tags = body["elements"]
        .as_array()
        .and_then(|els| els.iter().find(|e| e["type"] == "count"))
        .map(|e| &e["tags"])
        .ok_or_else(|| ProviderError::parse("Overpass count response has no count element"))?;

    let total = &tags["total"];
    total
        .as_u64()
        .or_else(|| total.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| ProviderError::parse("Overpass count element has no numeric total"))
}

/// Picks the first value of the most preferred tag key present on any
/// element.
fn parse_category(body: &serde_json::Value) -> Result<Option<String>, ProviderError> {
    let elements = body["elements"]
        .as_array()
        .ok_or_else(|| ProviderError::parse("Overpass response has no elements array"))?;

    Ok(CATEGORY_KEYS.iter().find_map(|key| {
        elements
            .iter()
            .filter_map(|e| e["tags"][*key].as_str())
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(String::from)
    }))
}

/// Point-of-interest count metric backed by Overpass.
#[derive(Debug, Clone)]
pub struct OverpassPoiCount(pub Arc<OverpassClient>);

#[async_trait]
impl MetricSource for OverpassPoiCount {
    type Value = u64;

    fn name(&self) -> &str {
        "osm_poi_count"
    }

    async fn fetch(&self, at: Coordinate, radius_meters: f64) -> Result<Option<u64>, ProviderError> {
        self.0.poi_count(at, radius_meters).await
    }
}

/// Category label metric backed by Overpass.
#[derive(Debug, Clone)]
pub struct OverpassCategory(pub Arc<OverpassClient>);

#[async_trait]
impl MetricSource for OverpassCategory {
    type Value = String;

    fn name(&self) -> &str {
        "osm_category"
    }

    async fn fetch(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Option<String>, ProviderError> {
        self.0.category(at, radius_meters).await
    }
}
