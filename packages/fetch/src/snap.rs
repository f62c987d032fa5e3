//! Nearest-place resolution with caching.
//!
//! Snapping reverse-geocodes a coordinate to its settlement name, then
//! forward-geocodes that name to the settlement's centroid. Both steps are
//! cached: reverse results under `reverse:<lat>:<lon>`, forward results
//! under `place:<sha256>` as a `[lat, lon]` pair. Forward lookups also
//! accept entries under the legacy bare SHA-1 key and re-store them under
//! the current key.

use std::sync::Arc;

use sitescore_cache::{CacheKey, GeoCache};
use sitescore_location_models::Coordinate;
use sitescore_provider::{PlaceGeocoder, ProviderError};

use crate::FetchError;

/// Cached place geocoding shared by the fetcher and the CLI.
#[derive(Clone)]
pub struct PlaceSnapper {
    cache: Arc<GeoCache>,
    geocoder: Arc<dyn PlaceGeocoder>,
}

impl std::fmt::Debug for PlaceSnapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaceSnapper").finish_non_exhaustive()
    }
}

fn config_error(source: ProviderError) -> FetchError {
    FetchError::Config {
        provider: "place geocoder".to_string(),
        source,
    }
}

impl PlaceSnapper {
    /// Creates a snapper over `geocoder`, caching into `cache`.
    #[must_use]
    pub fn new(cache: Arc<GeoCache>, geocoder: Arc<dyn PlaceGeocoder>) -> Self {
        Self { cache, geocoder }
    }

    /// Geocodes a place name, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged, including
    /// [`ProviderError::NotFound`]; the caller decides what a miss means.
    pub async fn geocode(&self, name: &str) -> Result<Coordinate, ProviderError> {
        let key = CacheKey::place(name);
        if let Some((lat, lon)) = self.cache.get_as::<(f64, f64)>(&key)
            && let Ok(c) = Coordinate::new(lat, lon)
        {
            log::debug!("Geocode cache hit for '{name}'");
            return Ok(c);
        }

        if let Some((lat, lon)) = self
            .cache
            .get_as::<(f64, f64)>(&CacheKey::legacy_place(name))
            && let Ok(c) = Coordinate::new(lat, lon)
        {
            log::debug!("Legacy geocode cache hit for '{name}'");
            self.cache.put_as(&key, &(c.lat(), c.lon()));
            return Ok(c);
        }

        let c = self.geocoder.geocode_by_name(name).await?;
        self.cache.put_as(&key, &(c.lat(), c.lon()));
        Ok(c)
    }

    /// Names the settlement containing `at`, consulting the cache first.
    ///
    /// # Errors
    ///
    /// Returns the provider's error unchanged.
    pub async fn reverse(&self, at: Coordinate) -> Result<Option<String>, ProviderError> {
        let key = CacheKey::coordinate("reverse", at);
        if let Some(name) = self.cache.get_as::<String>(&key) {
            return Ok(Some(name));
        }

        let name = self.geocoder.reverse_geocode(at).await?;
        if let Some(name) = &name {
            self.cache.put_as(&key, name);
        }
        Ok(name)
    }

    /// Resolves the centroid of the settlement nearest to `at`.
    ///
    /// Returns `Ok(None)` when there is no named place or a lookup fails
    /// for a non-configuration reason.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the geocoder is misconfigured.
    pub async fn nearest_place(&self, at: Coordinate) -> Result<Option<Coordinate>, FetchError> {
        let name = match self.reverse(at).await {
            Ok(Some(name)) => name,
            Ok(None) => {
                log::debug!("No named place around {at}");
                return Ok(None);
            }
            Err(e) if e.is_fatal() => return Err(config_error(e)),
            Err(e) => {
                log::warn!("Reverse geocode failed at {at}: {e}");
                return Ok(None);
            }
        };

        match self.geocode(&name).await {
            Ok(c) => {
                log::debug!("Nearest place to {at} is '{name}' at {c}");
                Ok(Some(c))
            }
            Err(e) if e.is_fatal() => Err(config_error(e)),
            Err(e) => {
                log::warn!("Forward geocode of '{name}' failed: {e}");
                Ok(None)
            }
        }
    }
}
