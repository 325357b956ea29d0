// src/config.rs

//! Validated probe settings.
//!
//! [`ProbeSettings`] is built once from the raw [`Config`] and then shared
//! read-only (behind an `Arc`) by every component of a run. All list
//! parsing and regex compilation happens here, so a bad value aborts the
//! run before any probing starts.

use std::path::PathBuf;
use std::time::Duration;

use ipnetwork::IpNetwork;
use regex::Regex;

use crate::error::{AppError, Result};
use crate::models::{Config, CriteriaConfig, DisplayOptions, MatchFilterCriteria, Scheme};
use crate::pipeline::RateSpec;
use crate::services::RedirectPolicy;
use crate::utils::hash::HashKind;
use crate::utils::parse::{
    PortSpec, RawRequest, parse_cidrs, parse_header, parse_int_list, parse_methods, parse_paths,
    parse_ports, parse_raw_request,
};

/// Path probed in favicon mode.
pub const FAVICON_PATH: &str = "/favicon.ico";

/// Checkpoint settings.
#[derive(Debug, Clone)]
pub struct ResumeSettings {
    pub enabled: bool,
    pub file: PathBuf,
    pub flush_every: usize,
    pub save_on_interrupt: bool,
}

/// Immutable, validated configuration for one run.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    // Input expansion
    pub ports: Vec<PortSpec>,
    pub paths: Vec<String>,
    pub probe_all_ips: bool,
    pub exclude_cdn: bool,
    pub leave_default_ports: bool,
    pub stream: bool,
    pub skip_dedupe: bool,
    pub vhost_input: bool,
    pub allow: Vec<IpNetwork>,
    pub deny: Vec<IpNetwork>,
    pub resolvers: Vec<String>,

    // Request construction
    pub methods: Vec<String>,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    pub unsafe_mode: bool,
    pub random_agent: bool,
    pub user_agent: String,
    pub timeout: Duration,
    pub retries: u32,
    pub proxy: Option<String>,
    /// Host header of the raw request template, if one was loaded
    pub raw_request_host: Option<String>,

    // Scheme selection
    pub preferred_scheme: Scheme,
    pub no_fallback: bool,
    pub no_fallback_scheme: bool,
    pub host_max_errors: u32,

    // Redirects
    pub redirect_policy: RedirectPolicy,
    pub max_redirects: usize,
    pub include_chain: bool,

    // Throughput
    pub threads: usize,
    pub rate: RateSpec,

    // Response processing
    pub max_body_read: usize,
    pub max_body_save: usize,
    pub hashes: Vec<HashKind>,
    pub extract_regex: Option<Regex>,
    pub favicon: bool,
    pub include_response: bool,
    pub matchers: MatchFilterCriteria,
    pub filters: MatchFilterCriteria,

    // Output and bookkeeping
    pub display: DisplayOptions,
    pub output_file: Option<PathBuf>,
    pub resume: ResumeSettings,
    pub stats_interval: Option<Duration>,
    pub debug_request: bool,
    pub debug_response: bool,
}

impl ProbeSettings {
    /// Validate `config` and derive every parsed field.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let input = &config.input;
        let request = &config.request;
        let response = &config.response;
        let output = &config.output;

        let preferred_scheme = Scheme::parse(config.scheme.preferred.trim()).ok_or_else(|| {
            AppError::config(format!(
                "scheme.preferred must be 'http' or 'https', got '{}'",
                config.scheme.preferred
            ))
        })?;

        let raw_request = match input.raw_request.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => {
                let bytes = std::fs::read(path)
                    .map_err(|e| AppError::config(format!("cannot read raw request '{path}': {e}")))?;
                Some(parse_raw_request(&bytes)?)
            }
            _ => None,
        };

        // Template headers first, so configured headers can add to them
        let mut headers = raw_request
            .as_ref()
            .map(|raw| raw.headers.clone())
            .unwrap_or_default();
        for line in &request.headers {
            headers.push(parse_header(line)?);
        }

        let paths = if response.favicon {
            vec![FAVICON_PATH.to_string()]
        } else if let Some(raw) = &raw_request {
            vec![raw.path.clone()]
        } else {
            parse_paths(&input.paths)?
        };

        let (methods, body) = match &raw_request {
            Some(RawRequest { method, body, .. }) => (vec![method.clone()], body.clone()),
            None => (
                parse_methods(&request.methods)?,
                (!request.body.is_empty()).then(|| request.body.clone()),
            ),
        };

        let proxy = match request.proxy.trim() {
            "" => None,
            proxy => {
                reqwest::Proxy::all(proxy)
                    .map_err(|e| AppError::config(format!("invalid proxy '{proxy}': {e}")))?;
                Some(proxy.to_string())
            }
        };

        let extract_regex = match response.extract_regex.trim() {
            "" => None,
            pattern => Some(Regex::new(pattern)?),
        };

        let redirect_policy = if config.redirects.follow_same_host {
            RedirectPolicy::SameHost
        } else if config.redirects.follow {
            RedirectPolicy::AnyHost
        } else {
            RedirectPolicy::Off
        };

        let hashes = HashKind::parse_list(&response.hashes)?;

        let display = DisplayOptions {
            probe: output.probe,
            status_code: output.status_code,
            content_length: output.content_length,
            content_type: output.content_type,
            location: output.location,
            favicon: response.favicon,
            hashes: !hashes.is_empty(),
            line_count: output.line_count,
            word_count: output.word_count,
            title: output.title,
            server: output.server,
            response_time: output.response_time,
            method: output.method,
            ip: output.ip,
            cname: output.cname,
            cdn: output.cdn,
            extract: extract_regex.is_some(),
        };

        let stats_interval = config
            .logging
            .stats
            .then(|| Duration::from_secs(config.logging.stats_interval_secs.max(1)));

        Ok(Self {
            ports: parse_ports(&input.ports)?,
            paths,
            probe_all_ips: input.probe_all_ips,
            exclude_cdn: input.exclude_cdn,
            leave_default_ports: input.leave_default_ports,
            stream: input.stream,
            skip_dedupe: input.skip_dedupe,
            vhost_input: input.vhost_input,
            allow: parse_cidrs(&input.allow)?,
            deny: parse_cidrs(&input.deny)?,
            resolvers: input.resolvers.clone(),

            methods,
            body,
            headers,
            unsafe_mode: request.unsafe_mode,
            random_agent: request.random_agent,
            user_agent: request.user_agent.clone(),
            timeout: Duration::from_secs(request.timeout_secs),
            retries: request.retries,
            proxy,
            raw_request_host: raw_request.and_then(|raw| raw.host),

            preferred_scheme,
            no_fallback: config.scheme.no_fallback,
            no_fallback_scheme: config.scheme.no_fallback_scheme,
            host_max_errors: config.scheme.host_max_errors,

            redirect_policy,
            max_redirects: config.redirects.max_redirects,
            include_chain: config.redirects.include_chain,

            threads: config.rate_limit.threads,
            rate: RateSpec::from_limits(
                config.rate_limit.per_second,
                config.rate_limit.per_minute,
            ),

            max_body_read: response.max_body_read,
            max_body_save: response.max_body_save,
            hashes,
            extract_regex,
            favicon: response.favicon,
            include_response: response.include_response,
            matchers: build_criteria(&config.matchers, "match")?,
            filters: build_criteria(&config.filters, "filter")?,

            display,
            output_file: output.file.as_ref().map(PathBuf::from),
            resume: ResumeSettings {
                enabled: config.resume.enabled,
                file: PathBuf::from(&config.resume.file),
                flush_every: config.resume.flush_every.max(1),
                save_on_interrupt: config.resume.save_on_interrupt,
            },
            stats_interval,
            debug_request: config.logging.debug_request,
            debug_response: config.logging.debug_response,
        })
    }

    /// Whether the target stream is deduplicated.
    pub fn dedupe(&self) -> bool {
        !self.stream || !self.skip_dedupe
    }
}

fn build_criteria(raw: &CriteriaConfig, kind: &str) -> Result<MatchFilterCriteria> {
    let regexes = raw
        .regexes
        .iter()
        .map(|pattern| Regex::new(pattern))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(MatchFilterCriteria {
        status_codes: parse_int_list(&raw.status_codes, &format!("{kind} status code"))?,
        content_lengths: parse_int_list(&raw.content_lengths, &format!("{kind} content length"))?,
        line_counts: parse_int_list(&raw.line_counts, &format!("{kind} line count"))?,
        word_counts: parse_int_list(&raw.word_counts, &format!("{kind} word count"))?,
        favicon_hashes: raw.favicon_hashes.clone(),
        strings: raw.strings.clone(),
        regexes,
    })
}
