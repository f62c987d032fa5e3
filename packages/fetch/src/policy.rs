//! Radius schedules and retry policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default expansion factor for geometric schedules.
pub const DEFAULT_EXPAND_FACTOR: f64 = 2.0;

/// Default number of expansions after the initial radius.
pub const DEFAULT_MAX_EXPAND: u32 = 3;

/// Radii tried by the categorical policy.
pub const CATEGORICAL_RADII: [f64; 4] = [200.0, 500.0, 1_000.0, 2_000.0];

/// Delay between categorical attempts.
pub const CATEGORICAL_DELAY: Duration = Duration::from_secs(1);

/// The sequence of radii tried before falling back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadiusSchedule {
    /// `initial × factor^i` for `i` in `0..=max_expand`.
    Geometric {
        /// First radius in meters.
        initial: f64,
        /// Multiplier between attempts.
        factor: f64,
        /// Number of attempts after the first.
        max_expand: u32,
    },
    /// An explicit list of radii in meters.
    Explicit(Vec<f64>),
}

impl RadiusSchedule {
    /// All radii, in attempt order.
    #[must_use]
    pub fn radii(&self) -> Vec<f64> {
        match self {
            Self::Geometric {
                initial,
                factor,
                max_expand,
            } => (0..=*max_expand)
                .scan(*initial, |radius, _| {
                    let current = *radius;
                    *radius *= factor;
                    Some(current)
                })
                .collect(),
            Self::Explicit(radii) => radii.clone(),
        }
    }

    /// The first radius; snap attempts reuse it.
    #[must_use]
    pub fn base_radius(&self) -> Option<f64> {
        match self {
            Self::Geometric { initial, .. } => Some(*initial),
            Self::Explicit(radii) => radii.first().copied(),
        }
    }
}

/// How a metric is retried before giving up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Radii tried at the original point.
    pub schedule: RadiusSchedule,
    /// Pause before every attempt after the first, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,
    /// How many nearest-place snaps may be chained.
    #[serde(default = "default_snap_depth")]
    pub max_snap_depth: u32,
}

const fn default_snap_depth() -> u32 {
    1
}

impl RetryPolicy {
    /// Geometric expansion from `initial_radius` (×2, three expansions, no
    /// delay).
    #[must_use]
    pub const fn numeric(initial_radius: f64) -> Self {
        Self {
            schedule: RadiusSchedule::Geometric {
                initial: initial_radius,
                factor: DEFAULT_EXPAND_FACTOR,
                max_expand: DEFAULT_MAX_EXPAND,
            },
            delay_ms: 0,
            max_snap_depth: default_snap_depth(),
        }
    }

    /// Fixed radii 200/500/1000/2000 m with a one second pause between
    /// attempts.
    #[must_use]
    pub fn categorical() -> Self {
        Self {
            schedule: RadiusSchedule::Explicit(CATEGORICAL_RADII.to_vec()),
            delay_ms: u64::try_from(CATEGORICAL_DELAY.as_millis()).unwrap_or(1_000),
            max_snap_depth: default_snap_depth(),
        }
    }

    /// Returns a copy with a different inter-attempt delay.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Returns a copy with a different snap depth.
    #[must_use]
    pub const fn with_snap_depth(mut self, depth: u32) -> Self {
        self.max_snap_depth = depth;
        self
    }

    /// The inter-attempt delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}
