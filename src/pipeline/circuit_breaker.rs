//! Per-host circuit breaker.
//!
//! Counts network failures per host and short-circuits further targets for
//! a host once its error budget is spent.
//!
//! ## Rules
//!
//! > Every failed logical probe increments the host's counter. Successes
//! > never reset it. Once the counter reaches the threshold, every later
//! > target for that host is skipped without a network attempt.

use dashmap::DashMap;

/// Result of a circuit breaker check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Safe to probe
    Closed { errors: u32 },
    /// Budget exhausted - skip the target
    Open { errors: u32, threshold: u32 },
}

impl BreakerState {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerState::Open { .. })
    }
}

/// Shared per-host error accounting.
///
/// The counter map is private; workers only increment and check.
#[derive(Debug, Default)]
pub struct HostCircuitBreaker {
    /// Errors before a host opens. 0 disables the breaker.
    threshold: u32,
    errors: DashMap<String, u32>,
}

impl HostCircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            errors: DashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Check whether a target on `host` may be probed.
    pub fn check(&self, host: &str) -> BreakerState {
        let errors = self.errors(host);
        if self.threshold > 0 && errors >= self.threshold {
            BreakerState::Open {
                errors,
                threshold: self.threshold,
            }
        } else {
            BreakerState::Closed { errors }
        }
    }

    /// Record one failed probe against `host`, returning the new count.
    pub fn record_failure(&self, host: &str) -> u32 {
        let mut entry = self.errors.entry(host.to_ascii_lowercase()).or_insert(0);
        *entry = entry.saturating_add(1);
        let count = *entry;
        drop(entry);

        if self.threshold > 0 && count == self.threshold {
            log::warn!(
                "Circuit breaker: OPEN for {} ({} errors, threshold {})",
                host,
                count,
                self.threshold
            );
        }
        count
    }

    /// Current error count for `host`.
    pub fn errors(&self, host: &str) -> u32 {
        self.errors
            .get(&host.to_ascii_lowercase())
            .map(|count| *count)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_closed_below_threshold() {
        let cb = HostCircuitBreaker::new(3);
        cb.record_failure("a.test");
        cb.record_failure("a.test");

        assert_eq!(cb.check("a.test"), BreakerState::Closed { errors: 2 });
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = HostCircuitBreaker::new(2);
        cb.record_failure("a.test");
        cb.record_failure("A.TEST");

        assert_eq!(
            cb.check("a.test"),
            BreakerState::Open {
                errors: 2,
                threshold: 2
            }
        );
    }

    #[test]
    fn test_hosts_are_independent() {
        let cb = HostCircuitBreaker::new(1);
        cb.record_failure("down.test");

        assert!(cb.check("down.test").is_open());
        assert!(!cb.check("up.test").is_open());
    }

    #[test]
    fn test_zero_threshold_disables() {
        let cb = HostCircuitBreaker::new(0);
        for _ in 0..100 {
            cb.record_failure("a.test");
        }
        assert!(!cb.check("a.test").is_open());
        assert_eq!(cb.errors("a.test"), 100);
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_counted() {
        let cb = Arc::new(HostCircuitBreaker::new(1000));
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cb = Arc::clone(&cb);
                tokio::spawn(async move {
                    for _ in 0..10 {
                        cb.record_failure("busy.test");
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(cb.errors("busy.test"), 500);
    }
}
