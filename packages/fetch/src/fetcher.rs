//! The retry/fallback state machine.
//!
//! ```text
//! Attempting(r0) → Attempting(r1) → … → Attempting(rN)
//!     → Snap(depth 1) → … → Snap(depth D) → Sentinel
//! ```
//!
//! Any state may exit early with a usable value. Snapping stops as soon
//! as the resolved place is a coordinate already visited, so a point that
//! snaps to itself goes straight to the sentinel.

use std::sync::Arc;

use sitescore_cache::{CacheKey, GeoCache};
use sitescore_location_models::Coordinate;
use sitescore_provider::MetricSource;

use crate::{FetchError, MetricValue, PlaceSnapper, RetryPolicy};

/// Decimal places used when comparing snapped coordinates.
const SNAP_EQUALITY_DECIMALS: i32 = 6;

/// How a fetched value was obtained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// Found at the original point.
    Direct {
        /// Radius of the successful attempt.
        radius: f64,
        /// Zero-based attempt index within the schedule.
        attempt: u32,
    },
    /// Found after snapping to a nearby named place.
    Snapped {
        /// The original point.
        origin: Coordinate,
        /// The place centroid that produced the value.
        snapped: Coordinate,
        /// Radius used at the snapped point.
        radius: f64,
    },
    /// Nothing found; the value is the type's sentinel.
    Sentinel,
}

/// A fetched value with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome<V> {
    /// The value, or the sentinel.
    pub value: V,
    /// How it was obtained.
    pub resolution: Resolution,
    /// Number of metric calls made (cache hits excluded).
    pub calls: u32,
}

impl<V> FetchOutcome<V> {
    /// Returns `true` unless the value is a sentinel.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        !matches!(self.resolution, Resolution::Sentinel)
    }
}

/// Expanding-radius retry with nearest-place fallback, shared by every
/// metric.
#[derive(Debug, Clone)]
pub struct RetryFallbackFetcher {
    cache: Arc<GeoCache>,
    snapper: PlaceSnapper,
}

impl RetryFallbackFetcher {
    /// Creates a fetcher caching into `cache` and snapping with `snapper`.
    #[must_use]
    pub const fn new(cache: Arc<GeoCache>, snapper: PlaceSnapper) -> Self {
        Self { cache, snapper }
    }

    /// The snapper used for fallbacks.
    #[must_use]
    pub const fn snapper(&self) -> &PlaceSnapper {
        &self.snapper
    }

    /// Fetches `source` at `at` under `policy`.
    ///
    /// Never fails for lack of data: exhausting every strategy yields the
    /// sentinel with [`Resolution::Sentinel`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the metric source or the geocoder
    /// reports a configuration error.
    pub async fn fetch<S>(
        &self,
        source: &S,
        at: Coordinate,
        policy: &RetryPolicy,
    ) -> Result<FetchOutcome<S::Value>, FetchError>
    where
        S: MetricSource + ?Sized,
        S::Value: MetricValue,
    {
        let mut calls = 0;
        let mut attempts = 0u32;

        for (attempt, radius) in (0u32..).zip(policy.schedule.radii()) {
            pause(policy, attempts).await;
            attempts += 1;
            if let Some(value) = self.attempt(source, at, radius, &mut calls).await? {
                return Ok(FetchOutcome {
                    value,
                    resolution: Resolution::Direct { radius, attempt },
                    calls,
                });
            }
            log::debug!(
                "{}: nothing at {at} within {radius} m, expanding...",
                source.name()
            );
        }

        if let Some(radius) = policy.schedule.base_radius() {
            let mut visited = vec![at];
            let mut current = at;

            for depth in 1..=policy.max_snap_depth {
                let Some(snapped) = self.snapper.nearest_place(current).await? else {
                    break;
                };
                if visited
                    .iter()
                    .any(|v| v.approx_eq(&snapped, SNAP_EQUALITY_DECIMALS))
                {
                    log::debug!(
                        "{}: nearest place to {current} is {snapped}, already tried",
                        source.name()
                    );
                    break;
                }
                visited.push(snapped);

                log::info!(
                    "{}: no data around {at}, retrying at nearest place {snapped} (depth {depth})",
                    source.name()
                );
                pause(policy, attempts).await;
                attempts += 1;
                if let Some(value) = self.attempt(source, snapped, radius, &mut calls).await? {
                    return Ok(FetchOutcome {
                        value,
                        resolution: Resolution::Snapped {
                            origin: at,
                            snapped,
                            radius,
                        },
                        calls,
                    });
                }
                current = snapped;
            }
        }

        log::info!(
            "{}: no data around {at} after {calls} calls, using sentinel",
            source.name()
        );
        Ok(FetchOutcome {
            value: S::Value::sentinel(),
            resolution: Resolution::Sentinel,
            calls,
        })
    }

    /// One attempt: cache lookup, then a provider call. Successful values
    /// are cached; failures are logged and reported as `None`.
    async fn attempt<S>(
        &self,
        source: &S,
        at: Coordinate,
        radius: f64,
        calls: &mut u32,
    ) -> Result<Option<S::Value>, FetchError>
    where
        S: MetricSource + ?Sized,
        S::Value: MetricValue,
    {
        let key = CacheKey::point(source.name(), at, radius);
        if let Some(value) = self.cache.get_as::<S::Value>(&key)
            && value.is_usable()
        {
            log::debug!("{}: cache hit {key}", source.name());
            return Ok(Some(value));
        }

        *calls += 1;
        match source.fetch(at, radius).await {
            Ok(Some(value)) if value.is_usable() => {
                self.cache.put_as(&key, &value);
                Ok(Some(value))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_fatal() => Err(FetchError::Config {
                provider: source.name().to_string(),
                source: e,
            }),
            Err(e) => {
                log::warn!(
                    "{}: fetch failed at {at} within {radius} m: {e}",
                    source.name()
                );
                Ok(None)
            }
        }
    }
}

/// Sleeps for the policy delay before every attempt but the first.
async fn pause(policy: &RetryPolicy, attempts_so_far: u32) {
    let delay = policy.delay();
    if attempts_so_far > 0 && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
