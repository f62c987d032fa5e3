//! Wiring of the cache, providers, and aggregator for one run.

use std::path::Path;
use std::sync::Arc;

use sitescore_cache::GeoCache;
use sitescore_features::{AggregationConfig, FeatureAggregator, MetricBinding};
use sitescore_fetch::{PlaceSnapper, RetryFallbackFetcher};
use sitescore_provider::census::CensusGeographiesClient;
use sitescore_provider::fcc::FccBlockClient;
use sitescore_provider::foursquare::{FoursquareCategory, FoursquarePlaces, FoursquarePoiCount};
use sitescore_provider::nominatim::NominatimClient;
use sitescore_provider::nyc_dof::NycValuation;
use sitescore_provider::overpass::{OverpassCategory, OverpassClient, OverpassPoiCount};
use sitescore_provider::service_registry::{
    GeoService, ProviderConfig, enabled_services, find_service,
};
use sitescore_provider::worldpop::WorldPopDensity;
use sitescore_provider::{AdminSource, ProviderError, ValuationSource};
use sitescore_reconcile::SourceReconciler;

/// Everything a command needs.
pub struct Context {
    pub config: AggregationConfig,
    pub cache: Arc<GeoCache>,
    pub nominatim: Arc<NominatimClient>,
    pub snapper: PlaceSnapper,
    admin: Vec<Arc<dyn AdminSource>>,
    valuation: Option<Arc<dyn ValuationSource>>,
}

impl Context {
    /// Loads the configuration and opens the cache, reading credentials
    /// from the process environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = AggregationConfig::load(config_path)?;
        Self::with_config(config, |name| std::env::var(name).ok())
    }

    /// Opens the cache and builds the administrative and valuation
    /// sources for an already-loaded configuration. Credentials are read
    /// through `var`.
    ///
    /// Missing credentials for an enabled source are an error here, before
    /// any command runs.
    pub fn with_config(
        config: AggregationConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let admin = admin_sources(&enabled_services(), build_admin_source)?;
        let valuation: Option<Arc<dyn ValuationSource>> = if config.valuation.enabled {
            Some(Arc::new(NycValuation::from_vars(var)?))
        } else {
            log::info!("Parcel valuation disabled by configuration");
            None
        };

        let cache = Arc::new(GeoCache::open(config.cache_config()));
        let nominatim = Arc::new(NominatimClient::from_registry()?);
        let snapper = PlaceSnapper::new(Arc::clone(&cache), nominatim.clone());
        Ok(Self {
            config,
            cache,
            nominatim,
            snapper,
            admin,
            valuation,
        })
    }

    /// Builds an aggregator over every enabled metric service plus the
    /// administrative and valuation sources.
    pub fn aggregator(&self) -> Result<FeatureAggregator, ProviderError> {
        let fetcher = RetryFallbackFetcher::new(Arc::clone(&self.cache), self.snapper.clone());
        let mut aggregator = FeatureAggregator::new(fetcher, self.reconciler(), &self.config);

        if enabled("worldpop")?.is_some() {
            aggregator = aggregator.with_binding(MetricBinding::numeric(
                "population_density",
                Arc::new(WorldPopDensity::from_registry()?),
            ));
        }

        if let Some(service) = enabled("overpass")? {
            let overpass = Arc::new(OverpassClient::from_service(&service)?);
            aggregator = aggregator
                .with_binding(MetricBinding::count(
                    "osm_poi_count",
                    Arc::new(OverpassPoiCount(Arc::clone(&overpass))),
                ))
                .with_binding(MetricBinding::categorical(
                    "location_category_osm",
                    Arc::new(OverpassCategory(overpass)),
                ));
        }

        if let Some(service) = enabled("foursquare")? {
            let places = FoursquarePlaces::from_service(&service)?;
            aggregator = aggregator
                .with_binding(MetricBinding::count(
                    "fsq_poi_count",
                    Arc::new(FoursquarePoiCount(places.clone())),
                ))
                .with_binding(MetricBinding::categorical(
                    "location_category_foursquare",
                    Arc::new(FoursquareCategory(places)),
                ));
        }

        log::debug!("Aggregator: {:?}", aggregator.bindings());
        Ok(aggregator)
    }

    fn reconciler(&self) -> SourceReconciler {
        reconciler_for(
            Arc::clone(&self.cache),
            &self.config,
            &self.admin,
            self.valuation.clone(),
        )
    }
}

/// Assembles a reconciler whose first admin source is the primary tier
/// and second, if any, the secondary.
fn reconciler_for(
    cache: Arc<GeoCache>,
    config: &AggregationConfig,
    admin: &[Arc<dyn AdminSource>],
    valuation: Option<Arc<dyn ValuationSource>>,
) -> SourceReconciler {
    let mut reconciler = SourceReconciler::new(cache, config.reconcile.clone());

    let mut tiers = admin.iter().cloned();
    match tiers.next() {
        Some(primary) => reconciler = reconciler.with_admin(primary, tiers.next()),
        None => log::warn!("No administrative lookup service is enabled"),
    }

    if let Some(valuation) = valuation {
        reconciler = reconciler.with_valuation(valuation);
    }
    reconciler
}

const fn is_admin(service: &GeoService) -> bool {
    matches!(
        service.provider,
        ProviderConfig::FccBlock { .. } | ProviderConfig::CensusGeographies { .. }
    )
}

/// Enabled administrative services in tier order: ascending priority,
/// at most two.
fn admin_tiers(services: &[GeoService]) -> Vec<&GeoService> {
    let mut tiers: Vec<&GeoService> = services
        .iter()
        .filter(|s| s.enabled && is_admin(s))
        .collect();
    tiers.sort_by_key(|s| s.priority);
    if tiers.len() > 2 {
        log::debug!(
            "{} administrative services enabled; using the first two by priority",
            tiers.len()
        );
        tiers.truncate(2);
    }
    tiers
}

/// Builds the administrative tiers from `services` with `build`.
fn admin_sources(
    services: &[GeoService],
    build: impl Fn(&GeoService) -> Result<Arc<dyn AdminSource>, ProviderError>,
) -> Result<Vec<Arc<dyn AdminSource>>, ProviderError> {
    admin_tiers(services)
        .into_iter()
        .map(|service| {
            log::debug!("Admin tier: {} (priority {})", service.id, service.priority);
            build(service)
        })
        .collect()
}

fn build_admin_source(service: &GeoService) -> Result<Arc<dyn AdminSource>, ProviderError> {
    match service.provider {
        ProviderConfig::FccBlock { .. } => Ok(Arc::new(FccBlockClient::from_service(service)?)),
        ProviderConfig::CensusGeographies { .. } => {
            Ok(Arc::new(CensusGeographiesClient::from_service(service)?))
        }
        _ => Err(ProviderError::config(format!(
            "Service '{}' ({}) is not an administrative source",
            service.id,
            service.kind()
        ))),
    }
}

/// Looks up a registry entry, returning `None` if it is disabled.
fn enabled(id: &str) -> Result<Option<GeoService>, ProviderError> {
    let service = find_service(id)?;
    if service.enabled {
        Ok(Some(service))
    } else {
        log::info!("Service '{id}' is disabled");
        Ok(None)
    }
}
