//! NYC Department of Finance property valuation (Socrata SODA API).
//!
//! Two query shapes against the same dataset: by borough/block/lot, and
//! by a latitude/longitude box around a point. [`NycValuation`] pairs
//! this client with [`GeoclientClient`] to form a full
//! [`ValuationSource`].

use async_trait::async_trait;
use sitescore_location_models::{Coordinate, ValuationCandidate, ValuationRecord};
use sitescore_spatial::geomath::bounding_box;

use crate::geoclient::{Bbl, GeoclientClient};
use crate::http::as_f64_lenient;
use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{ProviderError, ValuationSource, http};

/// Environment variable holding an optional Socrata app token.
pub const APP_TOKEN_ENV: &str = "SOCRATA_APP_TOKEN";

/// Which dataset columns hold the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueFields {
    /// Market value column.
    pub market: String,
    /// Assessed value column.
    pub assessed: String,
}

/// Socrata client for the DOF valuation dataset.
#[derive(Debug)]
pub struct NycDofClient {
    client: reqwest::Client,
    resource_url: String,
    fields: ValueFields,
    row_limit: u32,
    app_token: Option<String>,
    max_retries: u32,
}

impl NycDofClient {
    /// Creates a client from a service entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not a Socrata
    /// service.
    pub fn from_service(
        service: &GeoService,
        app_token: Option<String>,
    ) -> Result<Self, ProviderError> {
        let ProviderConfig::Socrata {
            base_url,
            dataset,
            market_field,
            assessed_field,
            row_limit,
        } = &service.provider
        else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not socrata",
                service.id,
                service.kind()
            )));
        };
        Ok(Self {
            client: http::client_for(service)?,
            resource_url: format!("{}/{dataset}.json", base_url.trim_end_matches('/')),
            fields: ValueFields {
                market: market_field.clone(),
                assessed: assessed_field.clone(),
            },
            row_limit: *row_limit,
            app_token: app_token.filter(|t| !t.trim().is_empty()),
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `nyc_dof` registry entry, reading the
    /// optional app token from `SOCRATA_APP_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`], reading the app token through `var`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is missing.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ProviderError> {
        Self::from_service(&find_service("nyc_dof")?, var(APP_TOKEN_ENV))
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<serde_json::Value, ProviderError> {
        http::send_json(
            || {
                let req = self
                    .client
                    .get(&self.resource_url)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .query(params);
                match &self.app_token {
                    Some(token) => req.header("X-App-Token", token),
                    None => req,
                }
            },
            self.max_retries,
        )
        .await
    }

    /// Fetches the first record for a parcel.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the request or parsing fails.
    pub async fn by_bbl(&self, bbl: Bbl) -> Result<Option<ValuationRecord>, ProviderError> {
        let body = self
            .query(&[
                ("boro", bbl.boro.to_string()),
                ("block", bbl.block.to_string()),
                ("lot", bbl.lot.to_string()),
                ("$limit", "5".to_string()),
            ])
            .await?;
        let rows = rows(&body)?;
        Ok(rows.first().map(|row| parse_record(row, &self.fields)))
    }

    /// Fetches records inside the box of `radius_meters` around `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the request or parsing fails.
    pub async fn near(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<ValuationCandidate>, ProviderError> {
        let bbox = bounding_box(at, radius_meters);
        let body = self
            .query(&[
                (
                    "$where",
                    format!(
                        "latitude between {} and {} AND longitude between {} and {}",
                        bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon
                    ),
                ),
                ("$limit", self.row_limit.to_string()),
            ])
            .await?;
        Ok(parse_candidates(rows(&body)?, &self.fields))
    }
}

fn rows(body: &serde_json::Value) -> Result<&Vec<serde_json::Value>, ProviderError> {
    body.as_array()
        .ok_or_else(|| ProviderError::parse("Socrata response is not an array"))
}

fn parse_record(row: &serde_json::Value, fields: &ValueFields) -> ValuationRecord {
    ValuationRecord {
        market_value: as_f64_lenient(&row[fields.market.as_str()]),
        assessed_value: as_f64_lenient(&row[fields.assessed.as_str()]),
    }
}

/// Keeps rows that carry a valid location.
fn parse_candidates(rows: &[serde_json::Value], fields: &ValueFields) -> Vec<ValuationCandidate> {
    rows.iter()
        .filter_map(|row| {
            let lat = as_f64_lenient(&row["latitude"])?;
            let lon = as_f64_lenient(&row["longitude"])?;
            Some(ValuationCandidate {
                coordinate: Coordinate::new(lat, lon).ok()?,
                record: parse_record(row, fields),
            })
        })
        .collect()
}

/// NYC parcel valuation: Geoclient for identifiers, DOF for values.
#[derive(Debug)]
pub struct NycValuation {
    geoclient: GeoclientClient,
    dof: NycDofClient,
}

impl NycValuation {
    /// Pairs the two clients.
    #[must_use]
    pub const fn new(geoclient: GeoclientClient, dof: NycDofClient) -> Self {
        Self { geoclient, dof }
    }

    /// Builds both clients from the registry and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if Geoclient credentials are
    /// missing or a registry entry is absent.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`], reading variables through `var`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if Geoclient credentials are
    /// missing or a registry entry is absent.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ProviderError> {
        Ok(Self::new(
            GeoclientClient::from_vars(&var)?,
            NycDofClient::from_vars(&var)?,
        ))
    }
}

#[async_trait]
impl ValuationSource for NycValuation {
    async fn resolve_identifier(&self, at: Coordinate) -> Result<Option<String>, ProviderError> {
        Ok(self.geoclient.resolve(at).await?.map(|bbl| bbl.to_string()))
    }

    async fn value_by_identifier(
        &self,
        id: &str,
    ) -> Result<Option<ValuationRecord>, ProviderError> {
        self.dof.by_bbl(id.parse()?).await
    }

    async fn values_near(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Vec<ValuationCandidate>, ProviderError> {
        self.dof.near(at, radius_meters).await
    }
}
