// src/error.rs

//! Unified error handling for the probing engine.
//!
//! Two layers: [`AppError`] is fatal to a run (configuration and resume
//! loading), while [`ProbeError`] describes one failed network attempt and
//! is captured into that target's result instead of propagating.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client could not be built
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regex compilation failed
    #[error("Invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Invalid or contradictory settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint unreadable or corrupt
    #[error("Resume error: {0}")]
    Resume(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a resume error with context.
    pub fn resume(context: impl fmt::Display, message: impl fmt::Display) -> Self {
        Self::Resume(format!("{context}: {message}"))
    }
}

/// A failed network attempt against one target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("tls error: {0}")]
    Tls(String),

    #[error("connect error: {0}")]
    Connect(String),

    #[error("request error: {0}")]
    Request(String),

    /// The target could not be turned into a request at all.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl ProbeError {
    /// Whether this failure counts against the host's error budget.
    pub fn is_network(&self) -> bool {
        !matches!(self, Self::InvalidTarget(_))
    }

    /// Classify a reqwest transport error.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_builder() {
            return Self::InvalidTarget(err.to_string());
        }

        let chain = error_chain(err);
        if let Some(io_err) = find_io_error(err) {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return Self::ConnectionRefused;
            }
            if io_err.kind() == io::ErrorKind::TimedOut {
                return Self::Timeout;
            }
        }
        let lower = chain.to_lowercase();
        if lower.contains("certificate") || lower.contains("tls") || lower.contains("handshake") {
            return Self::Tls(chain);
        }
        if err.is_connect() {
            return Self::Connect(chain);
        }
        Self::Request(chain)
    }

    /// Classify an I/O error raised by the raw transport.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::TimedOut => Self::Timeout,
            io::ErrorKind::InvalidData => Self::Request(err.to_string()),
            _ => Self::Connect(err.to_string()),
        }
    }
}

/// Join an error and all of its sources into one message.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

fn find_io_error<'a>(err: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(inner) = source {
        if let Some(io_err) = inner.downcast_ref::<io::Error>() {
            return Some(io_err);
        }
        source = inner.source();
    }
    None
}
