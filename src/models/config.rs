//! Application configuration structures.
//!
//! This is the raw, file-loadable form. It is turned into the validated
//! [`ProbeSettings`](crate::config::ProbeSettings) before any probing starts.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input expansion and dedup settings
    #[serde(default)]
    pub input: InputConfig,

    /// Request construction settings
    #[serde(default)]
    pub request: RequestConfig,

    /// Scheme selection and failure budgets
    #[serde(default)]
    pub scheme: SchemeConfig,

    /// Redirect following settings
    #[serde(default)]
    pub redirects: RedirectConfig,

    /// Concurrency and throughput limits
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Response processing settings
    #[serde(default)]
    pub response: ResponseConfig,

    /// Results must satisfy every defined matcher category
    #[serde(default)]
    pub matchers: CriteriaConfig,

    /// Results hitting any defined filter category are dropped
    #[serde(default)]
    pub filters: CriteriaConfig,

    /// Output display settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Checkpoint/resume settings
    #[serde(default)]
    pub resume: ResumeConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    ///
    /// List syntax (ports, int lists, regexes) is checked when the
    /// settings are built.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.threads == 0 {
            return Err(AppError::config("rate_limit.threads must be > 0"));
        }
        if self.request.timeout_secs == 0 {
            return Err(AppError::config("request.timeout_secs must be > 0"));
        }
        if self.output.json && self.output.csv {
            return Err(AppError::config(
                "Results can only be displayed in one format: 'JSON' or 'CSV'",
            ));
        }
        if !self.request.random_agent && self.request.user_agent.trim().is_empty() {
            return Err(AppError::config(
                "request.user_agent is empty and random_agent is disabled",
            ));
        }
        if self.request.unsafe_mode && !self.request.proxy.trim().is_empty() {
            return Err(AppError::config(
                "request.proxy cannot be combined with unsafe mode",
            ));
        }
        if self.resume.enabled && self.resume.file.trim().is_empty() {
            return Err(AppError::config("resume.file is empty"));
        }
        Ok(())
    }
}

/// Input expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InputConfig {
    /// Ports to probe, nmap syntax with optional scheme prefix
    /// (e.g. `80,443,8000-8010,https:8443`)
    #[serde(default)]
    pub ports: String,

    /// Paths to probe: comma separated, or a file with one path per line
    #[serde(default)]
    pub paths: String,

    /// Probe every A/AAAA record of each host
    #[serde(default)]
    pub probe_all_ips: bool,

    /// Only probe 80/443 on hosts resolving into a CDN range
    #[serde(default)]
    pub exclude_cdn: bool,

    /// Keep :80/:443 in URLs, Host headers and dedup keys
    #[serde(default)]
    pub leave_default_ports: bool,

    /// Process input lines as they arrive
    #[serde(default)]
    pub stream: bool,

    /// Disable dedup in stream mode
    #[serde(default)]
    pub skip_dedupe: bool,

    /// Input lines are `host[:port],vhost` pairs
    #[serde(default)]
    pub vhost_input: bool,

    /// Only probe addresses inside these CIDRs (when non-empty)
    #[serde(default)]
    pub allow: Vec<String>,

    /// Never probe addresses inside these CIDRs
    #[serde(default)]
    pub deny: Vec<String>,

    /// Custom resolvers; accepted for compatibility, system resolution is used
    #[serde(default)]
    pub resolvers: Vec<String>,

    /// File holding a raw HTTP request whose method, path, headers and body
    /// are used for every target
    #[serde(default)]
    pub raw_request: Option<String>,
}

/// Request construction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Comma separated methods, or `all`
    #[serde(default = "defaults::methods")]
    pub methods: String,

    /// Request body for methods that carry one
    #[serde(default)]
    pub body: String,

    /// Custom headers in `Name: value` form
    #[serde(default)]
    pub headers: Vec<String>,

    /// Send request lines byte-for-byte, skipping URL normalization
    #[serde(default, rename = "unsafe")]
    pub unsafe_mode: bool,

    /// Pick a random browser User-Agent per request
    #[serde(default = "defaults::random_agent")]
    pub random_agent: bool,

    /// User-Agent used when random agents are disabled
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-attempt timeout in seconds (connect + read)
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Intra-scheme retries after the first attempt
    #[serde(default)]
    pub retries: u32,

    /// HTTP proxy URL (e.g. `http://127.0.0.1:8080`); empty disables
    #[serde(default)]
    pub proxy: String,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            methods: defaults::methods(),
            body: String::new(),
            headers: Vec::new(),
            unsafe_mode: false,
            random_agent: defaults::random_agent(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            retries: 0,
            proxy: String::new(),
        }
    }
}

/// Scheme selection and failure budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeConfig {
    /// Preferred scheme for inputs without one (`https` or `http`)
    #[serde(default = "defaults::preferred_scheme")]
    pub preferred: String,

    /// Probe and report both schemes instead of stopping at first success
    #[serde(default)]
    pub no_fallback: bool,

    /// Only use the scheme given in the input (or the preferred one)
    #[serde(default)]
    pub no_fallback_scheme: bool,

    /// Errors per host before remaining targets are skipped (0 disables)
    #[serde(default = "defaults::host_max_errors")]
    pub host_max_errors: u32,
}

impl Default for SchemeConfig {
    fn default() -> Self {
        Self {
            preferred: defaults::preferred_scheme(),
            no_fallback: false,
            no_fallback_scheme: false,
            host_max_errors: defaults::host_max_errors(),
        }
    }
}

/// Redirect following settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Follow redirects to any host
    #[serde(default)]
    pub follow: bool,

    /// Follow redirects only while they stay on the same host
    #[serde(default)]
    pub follow_same_host: bool,

    /// Maximum hops per logical probe
    #[serde(default = "defaults::max_redirects")]
    pub max_redirects: usize,

    /// Keep the visited chain in results
    #[serde(default)]
    pub include_chain: bool,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            follow: false,
            follow_same_host: false,
            max_redirects: defaults::max_redirects(),
            include_chain: false,
        }
    }
}

/// Concurrency and throughput limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Worker count
    #[serde(default = "defaults::threads")]
    pub threads: usize,

    /// Maximum requests per second (0 = unlimited)
    #[serde(default = "defaults::per_second")]
    pub per_second: u32,

    /// Maximum requests per minute; overrides `per_second` when non-zero
    #[serde(default)]
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            threads: defaults::threads(),
            per_second: defaults::per_second(),
            per_minute: 0,
        }
    }
}

/// Response processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Bytes of body read and processed
    #[serde(default = "defaults::body_cap")]
    pub max_body_read: usize,

    /// Bytes of body retained on results
    #[serde(default = "defaults::body_cap")]
    pub max_body_save: usize,

    /// Comma separated: md5, sha1, sha256, sha512, mmh3, simhash
    #[serde(default)]
    pub hashes: String,

    /// Regex whose matches are extracted from the body
    #[serde(default)]
    pub extract_regex: String,

    /// Probe `/favicon.ico` and report its mmh3 hash
    #[serde(default)]
    pub favicon: bool,

    /// Keep the (capped) body on results
    #[serde(default)]
    pub include_response: bool,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            max_body_read: defaults::body_cap(),
            max_body_save: defaults::body_cap(),
            hashes: String::new(),
            extract_regex: String::new(),
            favicon: false,
            include_response: false,
        }
    }
}

/// Raw per-category criteria lists.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CriteriaConfig {
    /// e.g. `200,302`
    #[serde(default)]
    pub status_codes: String,
    #[serde(default)]
    pub content_lengths: String,
    #[serde(default)]
    pub line_counts: String,
    #[serde(default)]
    pub word_counts: String,
    #[serde(default)]
    pub favicon_hashes: Vec<String>,
    #[serde(default)]
    pub strings: Vec<String>,
    #[serde(default)]
    pub regexes: Vec<String>,
}

/// Output display settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Write lines here instead of stdout
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub status_code: bool,
    #[serde(default)]
    pub content_length: bool,
    #[serde(default)]
    pub content_type: bool,
    #[serde(default)]
    pub location: bool,
    #[serde(default)]
    pub title: bool,
    #[serde(default)]
    pub server: bool,
    #[serde(default)]
    pub response_time: bool,
    #[serde(default)]
    pub method: bool,
    #[serde(default)]
    pub ip: bool,
    /// Look up and show the host's CNAME
    #[serde(default)]
    pub cname: bool,
    #[serde(default)]
    pub cdn: bool,
    #[serde(default)]
    pub line_count: bool,
    #[serde(default)]
    pub word_count: bool,
    /// Show `[SUCCESS]`/`[FAILED]` and emit lines for failures
    #[serde(default)]
    pub probe: bool,
    /// Accepted for compatibility; lines are never colored
    #[serde(default)]
    pub no_color: bool,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub csv: bool,
}

/// Checkpoint/resume settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Load the checkpoint at start if it exists
    #[serde(default)]
    pub enabled: bool,

    /// Checkpoint file
    #[serde(default = "defaults::resume_file")]
    pub file: String,

    /// Flush after this many completed targets
    #[serde(default = "defaults::flush_every")]
    pub flush_every: usize,

    /// Write the checkpoint when a run without `enabled` is interrupted.
    /// Off means completed targets are not tracked at all.
    #[serde(default = "defaults::save_on_interrupt")]
    pub save_on_interrupt: bool,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: defaults::resume_file(),
            flush_every: defaults::flush_every(),
            save_on_interrupt: defaults::save_on_interrupt(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level filter
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Periodically log run statistics
    #[serde(default)]
    pub stats: bool,

    /// Seconds between statistics lines
    #[serde(default = "defaults::stats_interval")]
    pub stats_interval_secs: u64,

    /// Log every request sent
    #[serde(default)]
    pub debug_request: bool,

    /// Log every response received
    #[serde(default)]
    pub debug_response: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            stats: false,
            stats_interval_secs: defaults::stats_interval(),
            debug_request: false,
            debug_response: false,
        }
    }
}

mod defaults {
    // Request defaults
    pub fn methods() -> String {
        "GET".into()
    }
    pub fn random_agent() -> bool {
        true
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; webprobe/0.1)".into()
    }
    pub fn timeout() -> u64 {
        5
    }

    // Scheme defaults
    pub fn preferred_scheme() -> String {
        "https".into()
    }
    pub fn host_max_errors() -> u32 {
        30
    }

    // Redirect defaults
    pub fn max_redirects() -> usize {
        10
    }

    // Rate limit defaults
    pub fn threads() -> usize {
        50
    }
    pub fn per_second() -> u32 {
        150
    }

    // Response defaults
    pub fn body_cap() -> usize {
        i32::MAX as usize
    }

    // Resume defaults
    pub fn resume_file() -> String {
        "resume.cfg".into()
    }
    pub fn flush_every() -> usize {
        100
    }
    pub fn save_on_interrupt() -> bool {
        true
    }

    // Logging defaults
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn stats_interval() -> u64 {
        5
    }
}
