//! Retry and search parameters for the reconciler.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How hard the reconciler tries before falling back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// Calls per provider before giving up on it.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the second call; doubles for each later call.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    /// Radius of the spatial valuation search.
    #[serde(default = "default_near_radius_m")]
    pub near_radius_m: f64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_backoff_ms() -> u64 {
    2_000
}

const fn default_near_radius_m() -> f64 {
    200.0
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            near_radius_m: default_near_radius_m(),
        }
    }
}

impl ReconcilePolicy {
    /// Returns a copy with a different base backoff.
    #[must_use]
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Backoff after failed attempt `attempt` (1-based):
    /// `base × 2^(attempt - 1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(1u64 << shift))
    }
}
