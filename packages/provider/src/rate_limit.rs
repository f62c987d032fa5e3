//! Minimum-interval request pacing.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum delay between consecutive requests to one service.
///
/// Concurrent callers queue on the internal lock, so the interval holds
/// even when several workers share a client.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// A limiter allowing one request per `rate_limit_ms` milliseconds.
    /// Zero disables pacing.
    #[must_use]
    pub const fn from_millis(rate_limit_ms: u64) -> Self {
        Self {
            min_interval: Duration::from_millis(rate_limit_ms),
            last: Mutex::const_new(None),
        }
    }

    /// Waits until the next request may be sent.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spaces_requests() {
        let limiter = RateLimiter::from_millis(40);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn zero_interval_never_waits() {
        let limiter = RateLimiter::from_millis(0);
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
