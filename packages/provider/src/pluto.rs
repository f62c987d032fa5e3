//! `MapPLUTO` `ArcGIS` point query: the assessed total of the tax lot
//! containing a point, used as the training label for batch collection.

use async_trait::async_trait;
use sitescore_location_models::Coordinate;

use crate::http::as_f64_lenient;
use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{LabelSource, ProviderError, http};

/// `ArcGIS` `FeatureServer` client for the `MapPLUTO` layer.
#[derive(Debug)]
pub struct PlutoClient {
    client: reqwest::Client,
    query_url: String,
    value_field: String,
    max_retries: u32,
}

impl PlutoClient {
    /// Creates a client from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not an `ArcGIS`
    /// service.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::ArcGis {
            query_url,
            value_field,
        } = &service.provider
        else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not arc_gis",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            query_url: query_url.clone(),
            value_field: value_field.clone(),
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `mappluto` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("mappluto")?)
    }
}

#[async_trait]
impl LabelSource for PlutoClient {
    async fn label_at(&self, at: Coordinate) -> Result<Option<f64>, ProviderError> {
        let params = [
            ("geometry", format!("{},{}", at.lon(), at.lat())),
            ("geometryType", "esriGeometryPoint".to_string()),
            ("inSR", "4326".to_string()),
            ("spatialRel", "esriSpatialRelIntersects".to_string()),
            ("outFields", format!("BBL,{}", self.value_field)),
            ("returnGeometry", "false".to_string()),
            ("f", "json".to_string()),
        ];
        let body = http::send_json(
            || self.client.get(&self.query_url).query(&params),
            self.max_retries,
        )
        .await?;
        parse_label(&body, &self.value_field)
    }
}

/// Reads `value_field` from the first feature. `ArcGIS` reports errors
/// with HTTP 200 and an `error` object, so those are mapped here.
fn parse_label(body: &serde_json::Value, value_field: &str) -> Result<Option<f64>, ProviderError> {
    if let Some(error) = body.get("error") {
        let code = error["code"].as_u64().unwrap_or(0);
        let message = error["message"].as_str().unwrap_or("unknown ArcGIS error");
        return Err(match u16::try_from(code) {
            Ok(status) if status >= 400 => ProviderError::Status { status },
            _ => ProviderError::parse(format!("ArcGIS: {message}")),
        });
    }

    let features = body["features"]
        .as_array()
        .ok_or_else(|| ProviderError::parse("ArcGIS response has no features array"))?;

    Ok(features
        .first()
        .and_then(|f| as_f64_lenient(&f["attributes"][value_field])))
}
