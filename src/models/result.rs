//! Probe result data structure.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::models::{Scheme, Target};

/// Terminal state of one logical probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProbeStatus {
    Success,
    Failed { error: String },
    /// Host error budget exhausted; no network attempt was made.
    Skipped { host_errors: u32 },
}

impl ProbeStatus {
    pub fn failed(error: &ProbeError) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One visited URL in a redirect chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub url: String,
    pub status_code: u16,
    pub location: Option<String>,
}

/// Classified outcome for one target under one scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target: Target,
    pub scheme: Scheme,
    /// Canonical reported URL (target path kept verbatim)
    pub url: String,
    /// URL of the last response in the redirect chain
    pub final_url: String,
    pub method: String,
    pub status: ProbeStatus,
    pub status_code: Option<u16>,
    /// Status codes of every response along a followed chain
    pub chain_status_codes: Vec<u16>,
    pub content_length: Option<usize>,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub server: Option<String>,
    pub title: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub hashes: BTreeMap<String, String>,
    pub favicon_hash: Option<String>,
    pub lines: usize,
    pub words: usize,
    pub extracts: Vec<String>,
    pub response_time: Duration,
    /// Only populated when chain reporting is enabled
    pub chain: Vec<RedirectHop>,
    pub ip: Option<IpAddr>,
    /// CNAME of the target host, looked up only when displayed
    pub cname: Option<String>,
    pub cdn: bool,
    /// Retained body, capped by the save limit, when response inclusion is on
    pub body: Option<String>,
    pub attempts: u32,
    /// Decoded body kept for string/regex criteria; never serialized
    #[serde(skip)]
    pub inspected_body: String,
}

impl ProbeResult {
    /// A bare result for the given target and scheme; classifier fills the rest.
    pub fn new(target: &Target, scheme: Scheme, leave_default_ports: bool) -> Self {
        let url = target.url(scheme, leave_default_ports);
        Self {
            target: target.clone(),
            scheme,
            final_url: url.clone(),
            url,
            method: target.method.clone(),
            status: ProbeStatus::Success,
            status_code: None,
            chain_status_codes: Vec::new(),
            content_length: None,
            content_type: None,
            location: None,
            server: None,
            title: None,
            headers: BTreeMap::new(),
            hashes: BTreeMap::new(),
            favicon_hash: None,
            lines: 0,
            words: 0,
            extracts: Vec::new(),
            response_time: Duration::ZERO,
            chain: Vec::new(),
            ip: target.address,
            cname: None,
            cdn: false,
            body: None,
            attempts: 0,
            inspected_body: String::new(),
        }
    }

    /// A network failure after all attempts were spent.
    pub fn failed(
        target: &Target,
        scheme: Scheme,
        leave_default_ports: bool,
        error: &ProbeError,
        attempts: u32,
    ) -> Self {
        let mut result = Self::new(target, scheme, leave_default_ports);
        result.status = ProbeStatus::failed(error);
        result.attempts = attempts;
        result
    }

    /// A target short-circuited by the host circuit breaker.
    pub fn skipped(
        target: &Target,
        scheme: Scheme,
        leave_default_ports: bool,
        host_errors: u32,
    ) -> Self {
        let mut result = Self::new(target, scheme, leave_default_ports);
        result.status = ProbeStatus::Skipped { host_errors };
        result
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Render the line-oriented output form: the URL followed by bracketed
    /// metadata in a fixed order.
    ///
    /// Returns `None` for non-successful results unless probe status
    /// display is enabled.
    pub fn render_line(&self, display: &DisplayOptions) -> Option<String> {
        if !self.is_success() {
            return display.probe.then(|| format!("{} [FAILED]", self.url));
        }

        let mut line = self.url.clone();
        let mut push = |value: &str| {
            line.push_str(" [");
            line.push_str(value);
            line.push(']');
        };

        if display.probe {
            push("SUCCESS");
        }
        if display.status_code {
            let codes = if self.chain_status_codes.len() > 1 {
                self.chain_status_codes
                    .iter()
                    .map(u16::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            } else {
                self.status_code.map(|c| c.to_string()).unwrap_or_default()
            };
            push(&codes);
        }
        if display.content_length {
            push(&self.content_length.unwrap_or(0).to_string());
        }
        if display.content_type {
            push(self.content_type.as_deref().unwrap_or(""));
        }
        if display.location {
            push(self.location.as_deref().unwrap_or(""));
        }
        if display.favicon {
            push(self.favicon_hash.as_deref().unwrap_or(""));
        }
        if display.hashes && !self.hashes.is_empty() {
            let hashes = self.hashes.values().cloned().collect::<Vec<_>>().join(",");
            push(&hashes);
        }
        if display.line_count {
            push(&self.lines.to_string());
        }
        if display.word_count {
            push(&self.words.to_string());
        }
        if display.title {
            push(self.title.as_deref().unwrap_or(""));
        }
        if display.server {
            push(self.server.as_deref().unwrap_or(""));
        }
        if display.response_time {
            push(&format!("{:?}", self.response_time));
        }
        if display.method {
            push(&self.method);
        }
        if display.ip {
            push(&self.ip.map(|ip| ip.to_string()).unwrap_or_default());
        }
        if display.cname {
            if let Some(cname) = &self.cname {
                push(cname);
            }
        }
        if display.cdn && self.cdn {
            push("cdn");
        }
        if display.extract && !self.extracts.is_empty() {
            push(&self.extracts.join(","));
        }

        Some(line)
    }
}

/// Which metadata fields appear in the line output.
#[derive(Debug, Clone, Default)]
pub struct DisplayOptions {
    pub probe: bool,
    pub status_code: bool,
    pub content_length: bool,
    pub content_type: bool,
    pub location: bool,
    pub favicon: bool,
    pub hashes: bool,
    pub line_count: bool,
    pub word_count: bool,
    pub title: bool,
    pub server: bool,
    pub response_time: bool,
    pub method: bool,
    pub ip: bool,
    pub cname: bool,
    pub cdn: bool,
    pub extract: bool,
}
