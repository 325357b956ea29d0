//! Result sinks and local persistence helpers.
//!
//! Accepted results are handed to a [`ResultSink`] as soon as their probe
//! completes; the sink owns formatting and the output destination.

pub mod local;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ProbeResult;

// Re-export for convenience
pub use local::{LineSink, OutputFormat};

/// Consumer of probe results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Accept one result. Called concurrently from the worker pool.
    async fn emit(&self, result: &ProbeResult) -> Result<()>;

    /// Flush buffered output at the end of a run.
    async fn finish(&self) -> Result<()>;
}
