//! NYC Geoclient: resolves a coordinate to a tax parcel (BBL).
//!
//! Requires `GEOCLIENT_APP_ID` and `GEOCLIENT_APP_KEY`. Their absence is
//! a configuration error raised when the client is built, not a per-call
//! failure.

use std::fmt;
use std::str::FromStr;

use sitescore_location_models::Coordinate;

use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{ProviderError, http};

/// Environment variable holding the Geoclient application id.
pub const APP_ID_ENV: &str = "GEOCLIENT_APP_ID";

/// Environment variable holding the Geoclient application key.
pub const APP_KEY_ENV: &str = "GEOCLIENT_APP_KEY";

/// Borough-block-lot parcel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bbl {
    /// Borough code, 1 through 5.
    pub boro: u8,
    /// Tax block.
    pub block: u32,
    /// Tax lot.
    pub lot: u32,
}

impl fmt::Display for Bbl {
    /// The canonical 10-digit form, e.g. `1008350041`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:05}{:04}", self.boro, self.block, self.lot)
    }
}

impl FromStr for Bbl {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ProviderError::parse(format!("Invalid BBL '{s}'"));
        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let boro: u8 = s[0..1].parse().map_err(|_| invalid())?;
        if !(1..=5).contains(&boro) {
            return Err(invalid());
        }
        Ok(Self {
            boro,
            block: s[1..6].parse().map_err(|_| invalid())?,
            lot: s[6..10].parse().map_err(|_| invalid())?,
        })
    }
}

/// Geoclient lat/lon client.
#[derive(Debug)]
pub struct GeoclientClient {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    app_key: String,
    max_retries: u32,
}

impl GeoclientClient {
    /// Creates a client with explicit credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not a Geoclient
    /// service or a credential is blank.
    pub fn new(service: &GeoService, app_id: String, app_key: String) -> Result<Self, ProviderError> {
        let ProviderConfig::Geoclient { base_url } = &service.provider else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not geoclient",
                service.id,
                service.kind()
            )));
        };
        if app_id.trim().is_empty() || app_key.trim().is_empty() {
            return Err(ProviderError::config("Geoclient credentials are blank"));
        }
        Ok(Self {
            client: http::client_for(service)?,
            base_url: base_url.clone(),
            app_id,
            app_key,
            max_retries: service.max_retries,
        })
    }

    /// Creates a client from the `geoclient` registry entry and the
    /// credential environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry or either variable is
    /// missing.
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Like [`Self::from_env`], reading credentials through `var`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry or either credential
    /// is missing.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ProviderError> {
        let service = find_service("geoclient")?;
        let app_id = var(APP_ID_ENV)
            .ok_or_else(|| ProviderError::config(format!("{APP_ID_ENV} is not set")))?;
        let app_key = var(APP_KEY_ENV)
            .ok_or_else(|| ProviderError::config(format!("{APP_KEY_ENV} is not set")))?;
        Self::new(&service, app_id, app_key)
    }

    /// Resolves the parcel at `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the request fails.
    pub async fn resolve(&self, at: Coordinate) -> Result<Option<Bbl>, ProviderError> {
        let params = [
            ("lat", at.lat().to_string()),
            ("lon", at.lon().to_string()),
            ("app_id", self.app_id.clone()),
            ("app_key", self.app_key.clone()),
        ];
        let body = http::send_json(
            || self.client.get(&self.base_url).query(&params),
            self.max_retries,
        )
        .await?;
        Ok(parse_bbl(&body))
    }
}

/// Reads the BBL from a Geoclient response, from the combined `bbl`
/// field or from its borough/block/lot parts.
fn parse_bbl(body: &serde_json::Value) -> Option<Bbl> {
    let latlon = body.get("latlon")?;

    if let Some(bbl) = latlon["bbl"].as_str().and_then(|s| s.parse().ok()) {
        return Some(bbl);
    }

    let part = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| latlon[*k].as_str())
            .and_then(|s| s.trim().parse::<u32>().ok())
    };
    let boro = part(&["boroughCode", "bblBoroughCode"])?;
    Some(Bbl {
        boro: u8::try_from(boro).ok().filter(|b| (1..=5).contains(b))?,
        block: part(&["block", "bblTaxBlock"])?,
        lot: part(&["lot", "bblTaxLot"])?,
    })
}
