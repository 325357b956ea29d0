// src/lib.rs

//! webprobe: mass HTTP/HTTPS probing library

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;

pub use config::ProbeSettings;
pub use error::{AppError, ProbeError, Result};
pub use pipeline::{ProbeEngine, RunSummary};
