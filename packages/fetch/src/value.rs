//! Success predicates and sentinels per metric value type.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A value a metric can produce.
pub trait MetricValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Whether this value counts as a successful fetch.
    fn is_usable(&self) -> bool;

    /// The "no data" placeholder returned when every strategy fails.
    fn sentinel() -> Self;
}

impl MetricValue for f64 {
    fn is_usable(&self) -> bool {
        self.is_finite()
    }

    fn sentinel() -> Self {
        0.0
    }
}

/// Zero counts are treated as "nothing found here yet", which is what
/// drives radius expansion for POI counts.
impl MetricValue for u64 {
    fn is_usable(&self) -> bool {
        *self > 0
    }

    fn sentinel() -> Self {
        0
    }
}

impl MetricValue for String {
    fn is_usable(&self) -> bool {
        !self.trim().is_empty()
    }

    fn sentinel() -> Self {
        "Unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(1.5_f64.is_usable());
        assert!(0.0_f64.is_usable());
        assert!(!f64::NAN.is_usable());
        assert!(!0_u64.is_usable());
        assert!(3_u64.is_usable());
        assert!(!"  ".to_string().is_usable());
        assert!("cafe".to_string().is_usable());
    }

    #[test]
    fn sentinels() {
        assert!(f64::sentinel().abs() < f64::EPSILON);
        assert_eq!(u64::sentinel(), 0);
        assert_eq!(String::sentinel(), "Unknown");
    }
}
