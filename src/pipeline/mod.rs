//! Run orchestration: throttling, host error budgets, checkpoints and the
//! worker pool.
//!
//! - `ProbeEngine::run`: probe a target stream into a result sink

pub mod circuit_breaker;
pub mod probe;
pub mod rate_limit;
pub mod resume;
pub mod stats;

pub use circuit_breaker::{BreakerState, HostCircuitBreaker};
pub use probe::{ProbeEngine, RunSummary};
pub use rate_limit::{RateLimiter, RateSpec};
pub use resume::{ResumeCheckpoint, ResumeState};
pub use stats::{ProbeStats, StatsSnapshot};
