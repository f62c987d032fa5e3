//! Compile-time registry of provider service configurations.
//!
//! Each provider is defined in a TOML file under `services/`. The
//! registry embeds these at compile time and exposes them via
//! [`all_services`], [`enabled_services`], and [`find_service`].

use serde::Deserialize;

use crate::ProviderError;

/// A provider service configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoService {
    /// Unique identifier (e.g., `"nominatim"`, `"fcc"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service is used.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Order among services serving the same role; lower runs first.
    pub priority: u32,
    /// Minimum delay between requests in milliseconds.
    #[serde(default)]
    pub rate_limit_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Transport-level retries for transient failures.
    #[serde(default)]
    pub max_retries: u32,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Nominatim / `OpenStreetMap` geocoder.
    Nominatim {
        /// API root (e.g., `"https://nominatim.openstreetmap.org"`).
        base_url: String,
    },
    /// Overpass API for `OpenStreetMap` feature queries.
    Overpass {
        /// Interpreter endpoint.
        base_url: String,
        /// Server-side query timeout in seconds.
        #[serde(default = "default_overpass_timeout")]
        query_timeout_secs: u32,
    },
    /// `WorldPop` zonal statistics API.
    WorldPop {
        /// Stats endpoint.
        base_url: String,
        /// Dataset code (e.g., `"wpgppop"`).
        dataset: String,
        /// Dataset year.
        year: u16,
    },
    /// Foursquare open places snapshot read from Parquet.
    FoursquareParquet {
        /// Path or glob of the Parquet files.
        parquet_path: String,
    },
    /// FCC Census Block API.
    FccBlock {
        /// Block-find endpoint.
        base_url: String,
    },
    /// US Census geocoder geographies-by-coordinates endpoint.
    CensusGeographies {
        /// Endpoint URL.
        base_url: String,
        /// Benchmark name (e.g., `"Public_AR_Census2020"`).
        benchmark: String,
        /// Vintage name (e.g., `"Census2020_Census2020"`).
        vintage: String,
    },
    /// NYC Geoclient parcel resolver.
    Geoclient {
        /// Lat/lon endpoint.
        base_url: String,
    },
    /// Socrata SODA dataset.
    Socrata {
        /// Portal resource root (e.g., `"https://data.cityofnewyork.us/resource"`).
        base_url: String,
        /// Dataset identifier (e.g., `"yjxr-fw8i"`).
        dataset: String,
        /// Column holding the market value.
        market_field: String,
        /// Column holding the assessed value.
        assessed_field: String,
        /// Maximum rows returned by a spatial search.
        #[serde(default = "default_row_limit")]
        row_limit: u32,
    },
    /// `ArcGIS` `FeatureServer` point query.
    ArcGis {
        /// Layer query URL.
        query_url: String,
        /// Attribute holding the label value.
        value_field: String,
    },
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_overpass_timeout() -> u32 {
    25
}

const fn default_row_limit() -> u32 {
    50
}

impl GeoService {
    /// Returns the provider's base URL regardless of variant.
    ///
    /// Returns an empty string for providers without one (local Parquet).
    #[must_use]
    pub fn base_url(&self) -> &str {
        match &self.provider {
            ProviderConfig::Nominatim { base_url }
            | ProviderConfig::Overpass { base_url, .. }
            | ProviderConfig::WorldPop { base_url, .. }
            | ProviderConfig::FccBlock { base_url }
            | ProviderConfig::CensusGeographies { base_url, .. }
            | ProviderConfig::Geoclient { base_url }
            | ProviderConfig::Socrata { base_url, .. } => base_url,
            ProviderConfig::ArcGis { query_url, .. } => query_url,
            ProviderConfig::FoursquareParquet { .. } => "",
        }
    }

    /// The `type` tag of the provider table.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match &self.provider {
            ProviderConfig::Nominatim { .. } => "nominatim",
            ProviderConfig::Overpass { .. } => "overpass",
            ProviderConfig::WorldPop { .. } => "world_pop",
            ProviderConfig::FoursquareParquet { .. } => "foursquare_parquet",
            ProviderConfig::FccBlock { .. } => "fcc_block",
            ProviderConfig::CensusGeographies { .. } => "census_geographies",
            ProviderConfig::Geoclient { .. } => "geoclient",
            ProviderConfig::Socrata { .. } => "socrata",
            ProviderConfig::ArcGis { .. } => "arc_gis",
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("nominatim", include_str!("../services/nominatim.toml")),
    ("overpass", include_str!("../services/overpass.toml")),
    ("worldpop", include_str!("../services/worldpop.toml")),
    ("foursquare", include_str!("../services/foursquare.toml")),
    ("fcc", include_str!("../services/fcc.toml")),
    ("census", include_str!("../services/census.toml")),
    ("geoclient", include_str!("../services/geoclient.toml")),
    ("nyc_dof", include_str!("../services/nyc_dof.toml")),
    ("mappluto", include_str!("../services/mappluto.toml")),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 9;

/// Returns all service configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (the configs are embedded, so
/// this is caught by the registry tests).
#[must_use]
pub fn all_services() -> Vec<GeoService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse provider service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
#[must_use]
pub fn enabled_services() -> Vec<GeoService> {
    let mut services: Vec<GeoService> =
        all_services().into_iter().filter(|s| s.enabled).collect();
    services.sort_by_key(|s| s.priority);
    services
}

/// Looks up an enabled service by id.
///
/// # Errors
///
/// Returns [`ProviderError::Config`] if no enabled service has that id.
pub fn find_service(id: &str) -> Result<GeoService, ProviderError> {
    enabled_services()
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| ProviderError::config(format!("No enabled provider service '{id}'")))
}
