// src/pipeline/rate_limit.rs

//! Global request throttle shared by every worker.

use std::num::NonZeroU32;

use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tokio_util::sync::CancellationToken;

/// Effective request rate of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSpec {
    Unlimited,
    PerSecond(NonZeroU32),
    PerMinute(NonZeroU32),
}

impl RateSpec {
    /// A non-zero per-minute figure overrides the per-second one; both zero
    /// means no throttling.
    pub fn from_limits(per_second: u32, per_minute: u32) -> Self {
        if let Some(n) = NonZeroU32::new(per_minute) {
            return RateSpec::PerMinute(n);
        }
        match NonZeroU32::new(per_second) {
            Some(n) => RateSpec::PerSecond(n),
            None => RateSpec::Unlimited,
        }
    }

    fn quota(&self) -> Option<Quota> {
        match *self {
            RateSpec::Unlimited => None,
            RateSpec::PerSecond(n) => Some(Quota::per_second(n)),
            RateSpec::PerMinute(n) => Some(Quota::per_minute(n)),
        }
    }
}

/// Token bucket in front of every network send.
pub struct RateLimiter {
    spec: RateSpec,
    bucket: Option<GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl RateLimiter {
    pub fn new(spec: RateSpec) -> Self {
        Self {
            spec,
            bucket: spec.quota().map(GovernorRateLimiter::direct),
        }
    }

    pub fn spec(&self) -> RateSpec {
        self.spec
    }

    /// Wait for one permit.
    ///
    /// Returns `false` if the run was cancelled before a permit was granted;
    /// the caller must not send in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(bucket) = &self.bucket else {
            return true;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = bucket.until_ready() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn test_per_minute_overrides_per_second() {
        let n = |v| NonZeroU32::new(v).unwrap();
        assert_eq!(RateSpec::from_limits(150, 0), RateSpec::PerSecond(n(150)));
        assert_eq!(RateSpec::from_limits(150, 30), RateSpec::PerMinute(n(30)));
        assert_eq!(RateSpec::from_limits(0, 0), RateSpec::Unlimited);
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::new(RateSpec::Unlimited);
        let cancel = CancellationToken::new();
        for _ in 0..1000 {
            assert!(limiter.acquire(&cancel).await);
        }
    }

    #[tokio::test]
    async fn test_cancel_releases_waiting_worker() {
        let limiter = RateLimiter::new(RateSpec::from_limits(0, 1));
        let cancel = CancellationToken::new();

        // burst of one, the next permit is a minute away
        assert!(limiter.acquire(&cancel).await);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let granted = tokio::time::timeout(Duration::from_secs(5), limiter.acquire(&cancel))
            .await
            .unwrap();
        assert!(!granted);
    }

    #[tokio::test]
    async fn test_per_second_rate_paces_permits() {
        // burst of two, then one permit every 500ms
        let limiter = RateLimiter::new(RateSpec::from_limits(2, 0));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        for _ in 0..4 {
            assert!(limiter.acquire(&cancel).await);
        }
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(900), "took {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_per_minute_rate_throttles() {
        // per-minute wins even with a generous per-second figure
        let limiter = RateLimiter::new(RateSpec::from_limits(1000, 2));
        let cancel = CancellationToken::new();

        assert!(limiter.acquire(&cancel).await);
        assert!(limiter.acquire(&cancel).await);
        let third = tokio::time::timeout(Duration::from_millis(300), limiter.acquire(&cancel)).await;
        assert!(third.is_err(), "third permit should wait ~30s");
    }

    #[tokio::test]
    async fn test_cancelled_before_acquire() {
        let limiter = RateLimiter::new(RateSpec::Unlimited);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }
}
