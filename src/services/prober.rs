// src/services/prober.rs

//! One logical probe per target: scheme selection, fallback and retries.
//!
//! ```text
//! Init ─▶ Primary ──success──▶ Done            (or Fallback when probing both schemes)
//!           │  └─network error, retries left─▶ Primary (next attempt)
//!           └─failure──▶ Fallback ──▶ Done     (unless the scheme is pinned)
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ProbeSettings;
use crate::error::ProbeError;
use crate::models::{Scheme, Target};
use crate::pipeline::RateLimiter;
use crate::services::transport::{FetchedResponse, ProbeRequest, Transport};
use crate::utils::http::{carries_body, random_user_agent};

/// Terminal result of probing one target under one scheme.
#[derive(Debug, Clone)]
pub struct SchemeOutcome {
    pub scheme: Scheme,
    /// Network sends made under this scheme, retries included
    pub attempts: u32,
    /// The last request sent
    pub request: ProbeRequest,
    pub result: Result<FetchedResponse, ProbeError>,
}

impl SchemeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Prober state. Retries stay within a scheme; fallback switches scheme once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeState {
    Init,
    Primary { scheme: Scheme, attempt: u32 },
    Fallback { scheme: Scheme, attempt: u32 },
    Done,
}

pub struct Prober {
    settings: Arc<ProbeSettings>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl Prober {
    pub fn new(
        settings: Arc<ProbeSettings>,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            transport,
            limiter,
            cancel,
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Probe `target`, returning one outcome per scheme that reached a
    /// terminal state.
    ///
    /// Normally the last outcome is the one to report. When both schemes
    /// are probed (`no_fallback`) every outcome is reported. An empty or
    /// short list means the run was cancelled first.
    pub async fn probe(&self, target: &Target) -> Vec<SchemeOutcome> {
        let mut outcomes = Vec::new();
        let mut state = ProbeState::Init;

        loop {
            state = match state {
                ProbeState::Init => ProbeState::Primary {
                    scheme: self.primary_scheme(target),
                    attempt: 0,
                },
                ProbeState::Primary { scheme, attempt } | ProbeState::Fallback { scheme, attempt } => {
                    let request = self.build_request(target, scheme);
                    if !self.limiter.acquire(&self.cancel).await {
                        break;
                    }
                    let result = self.transport.send(&request).await;

                    match result {
                        Err(error) if error.is_network() && attempt < self.settings.retries => {
                            log::debug!(
                                "{} attempt {} failed: {}; retrying",
                                request.url(),
                                attempt + 1,
                                error
                            );
                            retry(state)
                        }
                        result => {
                            if let Err(error) = &result {
                                log::debug!("{} failed: {}", request.url(), error);
                            }
                            let success = result.is_ok();
                            outcomes.push(SchemeOutcome {
                                scheme,
                                attempts: attempt + 1,
                                request,
                                result,
                            });
                            self.next_state(state, target, success)
                        }
                    }
                }
                ProbeState::Done => break,
            };
        }

        outcomes
    }

    /// Scheme tried first: the pinned one, else the preferred one.
    fn primary_scheme(&self, target: &Target) -> Scheme {
        target.scheme.unwrap_or(self.settings.preferred_scheme)
    }

    fn may_fall_back(&self, target: &Target) -> bool {
        target.scheme.is_none() && !self.settings.no_fallback_scheme
    }

    /// Transition after a scheme reached its terminal outcome.
    fn next_state(&self, state: ProbeState, target: &Target, success: bool) -> ProbeState {
        match state {
            ProbeState::Primary { scheme, .. } if self.may_fall_back(target) => {
                if !success || self.settings.no_fallback {
                    ProbeState::Fallback {
                        scheme: scheme.other(),
                        attempt: 0,
                    }
                } else {
                    ProbeState::Done
                }
            }
            _ => ProbeState::Done,
        }
    }

    /// Build the request for `target` under `scheme`.
    pub fn build_request(&self, target: &Target, scheme: Scheme) -> ProbeRequest {
        let mut headers = self.settings.headers.clone();
        let has_agent = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"));
        if !has_agent {
            let agent = if self.settings.random_agent {
                random_user_agent().to_string()
            } else {
                self.settings.user_agent.clone()
            };
            headers.push(("User-Agent".to_string(), agent));
        }

        let body = self
            .settings
            .body
            .clone()
            .filter(|_| carries_body(&target.method));

        ProbeRequest {
            scheme,
            host: target.host.clone(),
            port: target.port.unwrap_or_else(|| scheme.default_port()),
            path: target.request_path(),
            method: target.method.clone(),
            headers,
            body,
            host_override: target.vhost.clone(),
            address: target.address,
        }
    }
}

fn retry(state: ProbeState) -> ProbeState {
    match state {
        ProbeState::Primary { scheme, attempt } => ProbeState::Primary {
            scheme,
            attempt: attempt + 1,
        },
        ProbeState::Fallback { scheme, attempt } => ProbeState::Fallback {
            scheme,
            attempt: attempt + 1,
        },
        other => other,
    }
}
