// src/models/mod.rs

//! Domain models for the probing engine.

mod config;
mod criteria;
mod result;
mod target;

// Re-export all public types
pub use config::{
    Config, CriteriaConfig, InputConfig, LoggingConfig, OutputConfig, RateLimitConfig,
    RedirectConfig, RequestConfig, ResponseConfig, ResumeConfig, SchemeConfig,
};
pub use criteria::{CriteriaSubject, MatchFilterCriteria};
pub use result::{DisplayOptions, ProbeResult, ProbeStatus, RedirectHop};
pub use target::{Scheme, Target};
