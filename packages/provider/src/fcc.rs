//! FCC Census Block API: the primary administrative lookup.
//!
//! See <https://geo.fcc.gov/api/census/>

use async_trait::async_trait;
use sitescore_location_models::{AdminRecord, Coordinate};

use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{AdminSource, ProviderError, http};

/// FCC block-find client.
#[derive(Debug)]
pub struct FccBlockClient {
    client: reqwest::Client,
    base_url: String,
    max_retries: u32,
}

impl FccBlockClient {
    /// Creates a client from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not an FCC
    /// service.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::FccBlock { base_url } = &service.provider else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not fcc_block",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            base_url: base_url.clone(),
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `fcc` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("fcc")?)
    }
}

#[async_trait]
impl AdminSource for FccBlockClient {
    fn name(&self) -> &str {
        "fcc"
    }

    async fn lookup(&self, at: Coordinate) -> Result<Option<AdminRecord>, ProviderError> {
        let params = [
            ("latitude", at.lat().to_string()),
            ("longitude", at.lon().to_string()),
            ("format", "json".to_string()),
        ];
        let body = http::send_json(
            || self.client.get(&self.base_url).query(&params),
            self.max_retries,
        )
        .await?;
        parse_block(&body)
    }
}

/// Extracts `Block.FIPS`. A non-OK status is an error; a null block
/// (water, outside the US) is "no data".
fn parse_block(body: &serde_json::Value) -> Result<Option<AdminRecord>, ProviderError> {
    if let Some(status) = body["status"].as_str()
        && !status.eq_ignore_ascii_case("ok")
    {
        let message = body["messages"]
            .as_array()
            .and_then(|m| m.first())
            .and_then(serde_json::Value::as_str)
            .unwrap_or(status);
        return Err(ProviderError::parse(format!("FCC: {message}")));
    }

    Ok(body["Block"]["FIPS"]
        .as_str()
        .filter(|fips| !fips.is_empty())
        .map(|fips| AdminRecord {
            jurisdiction_id: fips.to_string(),
            parcel_id: None,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_block_fips() {
        let body = json!({
            "Block": {"FIPS": "360610119001000", "bbox": []},
            "County": {"FIPS": "36061", "name": "New York"},
            "State": {"FIPS": "36", "code": "NY", "name": "New York"},
            "status": "OK",
            "executionTime": "0"
        });
        let record = parse_block(&body).unwrap().unwrap();
        assert_eq!(record.jurisdiction_id, "360610119001000");
        assert_eq!(record.parcel_id, None);
    }

    #[test]
    fn null_block_is_no_data() {
        let body = json!({"Block": {"FIPS": null}, "status": "OK"});
        assert_eq!(parse_block(&body).unwrap(), None);
    }

    #[test]
    fn error_status_is_an_error() {
        let body = json!({"status": "ERROR", "messages": ["Invalid latitude"]});
        assert!(parse_block(&body).is_err());
    }
}
