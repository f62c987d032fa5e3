//! US Census geocoder (geographies by coordinates): the secondary
//! administrative lookup.
//!
//! Its response schema differs from the FCC one; [`parse_geographies`]
//! normalizes it into the same [`AdminRecord`] shape.
//!
//! See <https://geocoding.geo.census.gov/geocoder/Geocoding_Services_API.html>

use async_trait::async_trait;
use sitescore_location_models::{AdminRecord, Coordinate};

use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{AdminSource, ProviderError, http};

/// Census geographies client.
#[derive(Debug)]
pub struct CensusGeographiesClient {
    client: reqwest::Client,
    base_url: String,
    benchmark: String,
    vintage: String,
    max_retries: u32,
}

impl CensusGeographiesClient {
    /// Creates a client from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not a Census
    /// geographies service.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::CensusGeographies {
            base_url,
            benchmark,
            vintage,
        } = &service.provider
        else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not census_geographies",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            base_url: base_url.clone(),
            benchmark: benchmark.clone(),
            vintage: vintage.clone(),
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `census` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("census")?)
    }
}

#[async_trait]
impl AdminSource for CensusGeographiesClient {
    fn name(&self) -> &str {
        "census"
    }

    async fn lookup(&self, at: Coordinate) -> Result<Option<AdminRecord>, ProviderError> {
        let params = [
            ("x", at.lon().to_string()),
            ("y", at.lat().to_string()),
            ("benchmark", self.benchmark.clone()),
            ("vintage", self.vintage.clone()),
            ("format", "json".to_string()),
        ];
        let body = http::send_json(
            || self.client.get(&self.base_url).query(&params),
            self.max_retries,
        )
        .await?;
        parse_geographies(&body)
    }
}

/// Finds the first census block layer (its name varies by vintage, e.g.
/// `"Census Blocks"` or `"2020 Census Blocks"`) and returns its `GEOID`.
fn parse_geographies(body: &serde_json::Value) -> Result<Option<AdminRecord>, ProviderError> {
    let geographies = body["result"]["geographies"]
        .as_object()
        .ok_or_else(|| ProviderError::parse("Census response has no result.geographies"))?;

    Ok(geographies
        .iter()
        .filter(|(layer, _)| layer.ends_with("Census Blocks"))
        .filter_map(|(_, blocks)| blocks.as_array()?.first())
        .find_map(|block| block["GEOID"].as_str())
        .map(|geoid| AdminRecord {
            jurisdiction_id: geoid.to_string(),
            parcel_id: None,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_to_same_shape_as_fcc() {
        let body = json!({"result": {
            "input": {"location": {"x": -73.9855, "y": 40.758}},
            "geographies": {
                "Counties": [{"GEOID": "36061"}],
                "2020 Census Blocks": [{
                    "GEOID": "360610119001000",
                    "STATE": "36",
                    "COUNTY": "061",
                    "BLOCK": "1000"
                }]
            }
        }});
        let record = parse_geographies(&body).unwrap().unwrap();
        assert_eq!(
            record,
            AdminRecord {
                jurisdiction_id: "360610119001000".to_string(),
                parcel_id: None,
            }
        );
    }

    #[test]
    fn no_block_layer_is_no_data() {
        let body = json!({"result": {"geographies": {"Counties": [{"GEOID": "36061"}]}}});
        assert_eq!(parse_geographies(&body).unwrap(), None);
        assert!(parse_geographies(&json!({"errors": ["bad"]})).is_err());
    }
}
