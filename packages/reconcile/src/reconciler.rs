//! The two-tier reconciler.

use std::future::Future;
use std::sync::Arc;

use sitescore_cache::{CacheKey, GeoCache};
use sitescore_location_models::{
    AdminLookupResult, Coordinate, Provenance, Valuation, ValuationBasis, ValuationCandidate,
};
use sitescore_provider::{AdminSource, ProviderError, ValuationSource};
use sitescore_spatial::geomath::distance_meters;

use crate::{ReconcileError, ReconcilePolicy};

/// Administrative and valuation lookups with provider fallback.
#[derive(Clone)]
pub struct SourceReconciler {
    cache: Arc<GeoCache>,
    policy: ReconcilePolicy,
    primary: Option<Arc<dyn AdminSource>>,
    secondary: Option<Arc<dyn AdminSource>>,
    valuation: Option<Arc<dyn ValuationSource>>,
}

impl std::fmt::Debug for SourceReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceReconciler")
            .field("policy", &self.policy)
            .field("primary", &self.primary.as_ref().map(|s| s.name().to_string()))
            .field(
                "secondary",
                &self.secondary.as_ref().map(|s| s.name().to_string()),
            )
            .field("valuation", &self.valuation.is_some())
            .finish_non_exhaustive()
    }
}

impl SourceReconciler {
    /// Creates a reconciler with no providers; attach them with
    /// [`Self::with_admin`] and [`Self::with_valuation`].
    #[must_use]
    pub fn new(cache: Arc<GeoCache>, policy: ReconcilePolicy) -> Self {
        Self {
            cache,
            policy,
            primary: None,
            secondary: None,
            valuation: None,
        }
    }

    /// Sets the administrative providers.
    #[must_use]
    pub fn with_admin(
        mut self,
        primary: Arc<dyn AdminSource>,
        secondary: Option<Arc<dyn AdminSource>>,
    ) -> Self {
        self.primary = Some(primary);
        self.secondary = secondary;
        self
    }

    /// Sets the valuation provider.
    #[must_use]
    pub fn with_valuation(mut self, valuation: Arc<dyn ValuationSource>) -> Self {
        self.valuation = Some(valuation);
        self
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &ReconcilePolicy {
        &self.policy
    }

    /// Looks up the administrative unit at `at`, primary first.
    ///
    /// Returns `Ok(None)` when neither provider has a record.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Config`] if a provider is misconfigured.
    pub async fn admin_lookup(
        &self,
        at: Coordinate,
    ) -> Result<Option<AdminLookupResult>, ReconcileError> {
        let key = CacheKey::coordinate("admin", at);
        if let Some(hit) = self.cache.get_as::<AdminLookupResult>(&key) {
            log::debug!("Admin cache hit at {at} ({})", hit.source);
            return Ok(Some(hit));
        }

        let tiers = [
            (self.primary.as_ref(), Provenance::Primary),
            (self.secondary.as_ref(), Provenance::Secondary),
        ];
        for (source, provenance) in tiers {
            let Some(source) = source else {
                continue;
            };
            match self
                .call_with_retry(source.name(), || source.lookup(at))
                .await?
            {
                Some(Some(record)) => {
                    let result = record.tagged(provenance);
                    self.cache.put_as(&key, &result);
                    return Ok(Some(result));
                }
                Some(None) => log::debug!("{}: no record at {at}", source.name()),
                None => {}
            }
        }

        log::info!("No administrative record at {at} from any provider");
        Ok(None)
    }

    /// Values the parcel at `at`: by identifier, then the nearest record
    /// of a spatial search, then [`Valuation::unavailable`].
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Config`] if the provider is misconfigured.
    pub async fn valuation(&self, at: Coordinate) -> Result<Valuation, ReconcileError> {
        let Some(source) = &self.valuation else {
            return Ok(Valuation::unavailable());
        };

        let key = CacheKey::coordinate("valuation", at);
        if let Some(hit) = self.cache.get_as::<Valuation>(&key)
            && hit.is_available()
            && hit.value.is_finite()
        {
            return Ok(hit);
        }

        let found = match self.by_identifier(source.as_ref(), at).await? {
            Some(valuation) => Some(valuation),
            None => self.nearest(source.as_ref(), at).await?,
        };

        match found {
            Some(valuation) => {
                self.cache.put_as(&key, &valuation);
                Ok(valuation)
            }
            None => {
                log::info!("No usable valuation at {at}");
                Ok(Valuation::unavailable())
            }
        }
    }

    async fn by_identifier(
        &self,
        source: &dyn ValuationSource,
        at: Coordinate,
    ) -> Result<Option<Valuation>, ReconcileError> {
        let Some(Some(id)) = self
            .call_with_retry("parcel identifier", || source.resolve_identifier(at))
            .await?
        else {
            log::debug!("No parcel identifier at {at}, searching nearby");
            return Ok(None);
        };

        let record = self
            .call_with_retry("parcel valuation", || source.value_by_identifier(&id))
            .await?
            .flatten();

        match record.and_then(|r| r.usable_value()) {
            Some(value) => Ok(Some(Valuation {
                value,
                basis: ValuationBasis::Identifier { id },
            })),
            None => {
                log::debug!("Parcel {id} has no usable value, searching nearby");
                Ok(None)
            }
        }
    }

    async fn nearest(
        &self,
        source: &dyn ValuationSource,
        at: Coordinate,
    ) -> Result<Option<Valuation>, ReconcileError> {
        let radius = self.policy.near_radius_m;
        let candidates = self
            .call_with_retry("nearby valuation", || source.values_near(at, radius))
            .await?
            .unwrap_or_default();
        log::debug!(
            "{} valuation candidates within {radius} m of {at}",
            candidates.len()
        );
        Ok(nearest_usable(at, &candidates))
    }

    /// Calls `call` up to `max_attempts` times, backing off between
    /// retryable failures. `Ok(None)` means the provider gave up.
    async fn call_with_retry<T, F, Fut>(
        &self,
        provider: &str,
        mut call: F,
    ) -> Result<Option<T>, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match call().await {
                Ok(value) => return Ok(Some(value)),
                Err(e) if e.is_fatal() => {
                    return Err(ReconcileError::Config {
                        provider: provider.to_string(),
                        source: e,
                    });
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    let wait = self.policy.backoff(attempt);
                    log::warn!(
                        "{provider}: attempt {attempt}/{attempts} failed: {e}; retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    log::warn!("{provider}: giving up after {attempt} attempt(s): {e}");
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }
}

/// The usable candidate closest to `at` by great-circle distance.
fn nearest_usable(at: Coordinate, candidates: &[ValuationCandidate]) -> Option<Valuation> {
    candidates
        .iter()
        .filter_map(|c| {
            let value = c.record.usable_value()?;
            Some((distance_meters(at, c.coordinate), value))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(distance, value)| Valuation {
            value,
            basis: ValuationBasis::Nearest {
                distance_meters: distance,
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use sitescore_cache::CacheConfig;
    use sitescore_location_models::{AdminRecord, ValuationRecord};

    type AdminResponder =
        Box<dyn Fn(u32) -> Result<Option<AdminRecord>, ProviderError> + Send + Sync>;

    struct FakeAdmin {
        name: &'static str,
        respond: AdminResponder,
        calls: AtomicU32,
    }

    impl FakeAdmin {
        fn new(
            name: &'static str,
            respond: impl Fn(u32) -> Result<Option<AdminRecord>, ProviderError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                respond: Box::new(respond),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AdminSource for FakeAdmin {
        fn name(&self) -> &str {
            self.name
        }

        async fn lookup(&self, _at: Coordinate) -> Result<Option<AdminRecord>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.respond)(n)
        }
    }

    #[derive(Default)]
    struct FakeValuation {
        identifier: Option<String>,
        identifier_fails: bool,
        record: Option<ValuationRecord>,
        candidates: Vec<ValuationCandidate>,
        record_calls: AtomicU32,
        near_calls: AtomicU32,
        seen_ids: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ValuationSource for FakeValuation {
        async fn resolve_identifier(&self, _at: Coordinate) -> Result<Option<String>, ProviderError> {
            if self.identifier_fails {
                return Err(ProviderError::Status { status: 404 });
            }
            Ok(self.identifier.clone())
        }

        async fn value_by_identifier(
            &self,
            id: &str,
        ) -> Result<Option<ValuationRecord>, ProviderError> {
            self.record_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_ids.lock().unwrap().push(id.to_string());
            Ok(self.record.clone())
        }

        async fn values_near(
            &self,
            _at: Coordinate,
            _radius_meters: f64,
        ) -> Result<Vec<ValuationCandidate>, ProviderError> {
            self.near_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.candidates.clone())
        }
    }

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn block(fips: &str) -> AdminRecord {
        AdminRecord {
            jurisdiction_id: fips.to_string(),
            parcel_id: None,
        }
    }

    fn reconciler() -> SourceReconciler {
        let cache = Arc::new(GeoCache::open(CacheConfig::default()));
        SourceReconciler::new(
            cache,
            ReconcilePolicy::default().with_base_backoff(Duration::ZERO),
        )
    }

    fn candidate(lat: f64, lon: f64, market: Option<f64>) -> ValuationCandidate {
        ValuationCandidate {
            coordinate: c(lat, lon),
            record: ValuationRecord {
                market_value: market,
                assessed_value: None,
            },
        }
    }

    #[tokio::test]
    async fn primary_success_is_tagged_primary() {
        let primary = FakeAdmin::new("fcc", |_| Ok(Some(block("360610113001000"))));
        let secondary = FakeAdmin::new("census", |_| Ok(Some(block("other"))));
        let r = reconciler().with_admin(primary.clone(), Some(secondary.clone()));

        let result = r.admin_lookup(c(40.758, -73.9855)).await.unwrap().unwrap();
        assert_eq!(result.jurisdiction_id, "360610113001000");
        assert_eq!(result.source, Provenance::Primary);
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn exhausted_primary_falls_back_to_secondary() {
        let primary = FakeAdmin::new("fcc", |_| Err(ProviderError::Status { status: 502 }));
        let secondary = FakeAdmin::new("census", |_| Ok(Some(block("360610113001000"))));
        let r = reconciler().with_admin(primary.clone(), Some(secondary.clone()));

        let result = r.admin_lookup(c(40.758, -73.9855)).await.unwrap().unwrap();
        assert_eq!(primary.calls(), 3);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(
            result,
            block("360610113001000").tagged(Provenance::Secondary)
        );
    }

    #[tokio::test]
    async fn non_retryable_error_falls_through_immediately() {
        let primary = FakeAdmin::new("fcc", |_| Err(ProviderError::Status { status: 400 }));
        let secondary = FakeAdmin::new("census", |_| Ok(Some(block("1"))));
        let r = reconciler().with_admin(primary.clone(), Some(secondary));

        let result = r.admin_lookup(c(40.0, -73.0)).await.unwrap().unwrap();
        assert_eq!(primary.calls(), 1);
        assert_eq!(result.source, Provenance::Secondary);
    }

    #[tokio::test]
    async fn transient_failure_then_primary_success() {
        let primary = FakeAdmin::new("fcc", |n| {
            if n == 0 {
                Err(ProviderError::Timeout)
            } else {
                Ok(Some(block("1")))
            }
        });
        let r = reconciler().with_admin(primary.clone(), None);

        let result = r.admin_lookup(c(40.0, -73.0)).await.unwrap().unwrap();
        assert_eq!(primary.calls(), 2);
        assert_eq!(result.source, Provenance::Primary);
    }

    #[tokio::test]
    async fn configuration_error_is_raised() {
        let primary = FakeAdmin::new("fcc", |_| Err(ProviderError::config("no key")));
        let secondary = FakeAdmin::new("census", |_| Ok(Some(block("1"))));
        let r = reconciler().with_admin(primary, Some(secondary.clone()));

        let err = r.admin_lookup(c(40.0, -73.0)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Config { ref provider, .. } if provider == "fcc"));
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn no_record_anywhere_is_none_and_results_are_cached() {
        let primary = FakeAdmin::new("fcc", |_| Ok(None));
        let r = reconciler().with_admin(primary.clone(), None);
        assert_eq!(r.admin_lookup(c(40.0, -73.0)).await.unwrap(), None);

        let found = FakeAdmin::new("fcc", |_| Ok(Some(block("9"))));
        let r = reconciler().with_admin(found.clone(), None);
        let at = c(41.0, -74.0);
        r.admin_lookup(at).await.unwrap();
        r.admin_lookup(at).await.unwrap();
        assert_eq!(found.calls(), 1);
    }

    #[tokio::test]
    async fn valuation_by_identifier() {
        let source = Arc::new(FakeValuation {
            identifier: Some("1008350041".to_string()),
            record: Some(ValuationRecord {
                market_value: Some(2_450_000.0),
                assessed_value: Some(1_102_500.0),
            }),
            ..FakeValuation::default()
        });
        let r = reconciler().with_valuation(source.clone());

        let valuation = r.valuation(c(40.758, -73.9855)).await.unwrap();
        assert!((valuation.value - 2_450_000.0).abs() < f64::EPSILON);
        assert_eq!(
            valuation.basis,
            ValuationBasis::Identifier {
                id: "1008350041".to_string()
            }
        );
        assert_eq!(source.near_calls.load(Ordering::SeqCst), 0);
        assert_eq!(*source.seen_ids.lock().unwrap(), vec!["1008350041"]);
    }

    #[tokio::test]
    async fn unusable_record_falls_back_to_nearest_candidate() {
        let at = c(40.7580, -73.9855);
        let source = Arc::new(FakeValuation {
            identifier: Some("1008350041".to_string()),
            record: Some(ValuationRecord {
                market_value: Some(f64::NAN),
                assessed_value: None,
            }),
            candidates: vec![
                candidate(40.7600, -73.9855, Some(300.0)),
                candidate(40.7581, -73.9855, None),
                candidate(40.7585, -73.9855, Some(100.0)),
            ],
            ..FakeValuation::default()
        });
        let r = reconciler().with_valuation(source.clone());

        let valuation = r.valuation(at).await.unwrap();
        assert!((valuation.value - 100.0).abs() < f64::EPSILON);
        let ValuationBasis::Nearest { distance_meters } = valuation.basis else {
            panic!("expected nearest basis, got {:?}", valuation.basis);
        };
        assert!(distance_meters > 50.0 && distance_meters < 60.0);
        assert_eq!(source.record_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_identifier_resolution_searches_nearby() {
        let source = Arc::new(FakeValuation {
            identifier_fails: true,
            candidates: vec![candidate(40.0, -73.0, Some(5.0))],
            ..FakeValuation::default()
        });
        let r = reconciler().with_valuation(source.clone());

        let valuation = r.valuation(c(40.0, -73.0)).await.unwrap();
        assert!((valuation.value - 5.0).abs() < f64::EPSILON);
        assert_eq!(source.record_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn nothing_usable_is_unavailable() {
        let source = Arc::new(FakeValuation {
            candidates: vec![candidate(40.0, -73.0, None)],
            ..FakeValuation::default()
        });
        let r = reconciler().with_valuation(source);
        let valuation = r.valuation(c(40.0, -73.0)).await.unwrap();
        assert!(valuation.value.is_nan());
        assert!(!valuation.is_available());

        let bare = reconciler();
        assert!(!bare.valuation(c(40.0, -73.0)).await.unwrap().is_available());
    }
}
