// src/services/redirects.rs

//! Redirect chain following.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ProbeError;
use crate::models::RedirectHop;
use crate::pipeline::RateLimiter;
use crate::services::transport::{FetchedResponse, ProbeRequest, Transport};
use crate::utils::url::{host_of, resolve, visit_key};

/// Which redirects are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectPolicy {
    #[default]
    Off,
    AnyHost,
    /// Only redirects staying on the original host
    SameHost,
}

/// Why following stopped. Every variant still reports the last response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowStop {
    /// The last response is not a redirect
    NotRedirect,
    Disabled,
    LoopDetected,
    MaxHops,
    OffHost,
    MissingLocation,
    Cancelled,
    HopFailed(ProbeError),
}

#[derive(Debug, Clone)]
pub struct FollowOutcome {
    /// Last response received
    pub response: FetchedResponse,
    /// Every response along the way, the first one included
    pub chain: Vec<RedirectHop>,
    pub stop: FollowStop,
    /// Network sends made while following
    pub requests: u32,
}

pub struct RedirectFollower {
    policy: RedirectPolicy,
    max_redirects: usize,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl RedirectFollower {
    pub fn new(
        policy: RedirectPolicy,
        max_redirects: usize,
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            policy,
            max_redirects,
            transport,
            limiter,
            cancel,
        }
    }

    /// Follow redirects starting from `start`, the response to `request`.
    ///
    /// URLs are compared after normalization, so a redirect back to any
    /// visited URL ends the chain instead of looping.
    pub async fn follow(&self, start: FetchedResponse, request: &ProbeRequest) -> FollowOutcome {
        let origin_host = request.host.to_ascii_lowercase();
        let mut visited = HashSet::from([visit_key(&start.url)]);
        let mut chain = vec![hop(&start)];
        let mut current = start;
        let mut current_request = request.clone();
        let mut requests = 0;

        let stop = loop {
            if !current.is_redirect() {
                break FollowStop::NotRedirect;
            }
            if self.policy == RedirectPolicy::Off {
                break FollowStop::Disabled;
            }
            if chain.len() > self.max_redirects {
                break FollowStop::MaxHops;
            }

            let Some(next_url) = current
                .header("location")
                .and_then(|location| resolve(&current.url, location))
            else {
                break FollowStop::MissingLocation;
            };

            if self.policy == RedirectPolicy::SameHost
                && host_of(&next_url).as_deref() != Some(origin_host.as_str())
            {
                log::debug!("Not following off-host redirect {} -> {}", current.url, next_url);
                break FollowStop::OffHost;
            }
            if !visited.insert(visit_key(&next_url)) {
                log::debug!("Redirect loop at {}", next_url);
                break FollowStop::LoopDetected;
            }

            let (method, keep_body) = follow_up_method(current.status, &current_request.method);
            let Some(next_request) = current_request.redirected(&next_url, &method, keep_body)
            else {
                break FollowStop::MissingLocation;
            };

            if !self.limiter.acquire(&self.cancel).await {
                break FollowStop::Cancelled;
            }
            requests += 1;

            match self.transport.send(&next_request).await {
                Ok(response) => {
                    chain.push(hop(&response));
                    current = response;
                    current_request = next_request;
                }
                Err(error) => {
                    log::debug!("Redirect hop {} failed: {}", next_url, error);
                    break FollowStop::HopFailed(error);
                }
            }
        };

        FollowOutcome {
            response: current,
            chain,
            stop,
            requests,
        }
    }
}

/// 301/302/303 switch to a body-less GET (HEAD stays HEAD); 307/308 keep
/// method and body.
fn follow_up_method(status: u16, method: &str) -> (String, bool) {
    match status {
        307 | 308 => (method.to_string(), true),
        _ if method.eq_ignore_ascii_case("HEAD") => ("HEAD".to_string(), false),
        _ => ("GET".to_string(), false),
    }
}

fn hop(response: &FetchedResponse) -> RedirectHop {
    RedirectHop {
        url: response.url.clone(),
        status_code: response.status,
        location: response.header("location").map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::models::Scheme;
    use crate::pipeline::RateSpec;

    /// Serves canned responses keyed by request URL.
    struct Routes {
        routes: HashMap<String, (u16, Option<String>)>,
        sent: Mutex<Vec<ProbeRequest>>,
    }

    impl Routes {
        fn new(routes: &[(&str, u16, Option<&str>)]) -> Arc<Self> {
            Arc::new(Self {
                routes: routes
                    .iter()
                    .map(|(url, status, location)| {
                        (url.to_string(), (*status, location.map(str::to_string)))
                    })
                    .collect(),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<ProbeRequest> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for Routes {
        async fn send(&self, request: &ProbeRequest) -> Result<FetchedResponse, ProbeError> {
            self.sent.lock().unwrap().push(request.clone());
            let url = request.url();
            let (status, location) = self
                .routes
                .get(&url)
                .cloned()
                .ok_or(ProbeError::ConnectionRefused)?;
            Ok(response(&url, status, location.as_deref()))
        }
    }

    fn response(url: &str, status: u16, location: Option<&str>) -> FetchedResponse {
        FetchedResponse {
            url: url.to_string(),
            status,
            headers: location
                .map(|l| vec![("Location".to_string(), l.to_string())])
                .unwrap_or_default(),
            body: Vec::new(),
            elapsed: Duration::ZERO,
            remote_ip: None,
        }
    }

    fn request(path: &str, method: &str) -> ProbeRequest {
        ProbeRequest {
            scheme: Scheme::Http,
            host: "a.test".into(),
            port: 80,
            path: path.into(),
            method: method.into(),
            headers: Vec::new(),
            body: Some("a=b".into()),
            host_override: None,
            address: None,
        }
    }

    fn follower(routes: Arc<Routes>, policy: RedirectPolicy, max: usize) -> RedirectFollower {
        RedirectFollower::new(
            policy,
            max,
            routes,
            Arc::new(RateLimiter::new(RateSpec::Unlimited)),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_follows_chain_to_final_response() {
        let routes = Routes::new(&[
            ("http://a.test/b", 302, Some("/c")),
            ("http://a.test/c", 200, None),
        ]);
        let start = response("http://a.test/a", 301, Some("http://a.test/b"));
        let outcome = follower(routes, RedirectPolicy::AnyHost, 10)
            .follow(start, &request("/a", "GET"))
            .await;

        assert_eq!(outcome.stop, FollowStop::NotRedirect);
        assert_eq!(outcome.response.status, 200);
        assert_eq!(
            outcome.chain.iter().map(|h| h.status_code).collect::<Vec<_>>(),
            vec![301, 302, 200]
        );
        assert_eq!(outcome.requests, 2);
    }

    #[tokio::test]
    async fn test_self_redirect_is_a_loop() {
        let routes = Routes::new(&[]);
        let start = response("http://a.test/redirect", 302, Some("/redirect"));
        let outcome = follower(routes.clone(), RedirectPolicy::AnyHost, 10)
            .follow(start, &request("/redirect", "GET"))
            .await;

        assert_eq!(outcome.stop, FollowStop::LoopDetected);
        assert_eq!(outcome.response.status, 302);
        assert!(routes.sent().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_reports_first_response() {
        let routes = Routes::new(&[("http://a.test/b", 200, None)]);
        let start = response("http://a.test/a", 302, Some("/b"));
        let outcome = follower(routes.clone(), RedirectPolicy::Off, 10)
            .follow(start, &request("/a", "GET"))
            .await;
        assert_eq!(outcome.stop, FollowStop::Disabled);
        assert_eq!(outcome.chain.len(), 1);
        assert!(routes.sent().is_empty());
    }

    #[tokio::test]
    async fn test_max_hops() {
        let routes = Routes::new(&[
            ("http://a.test/1", 302, Some("/2")),
            ("http://a.test/2", 302, Some("/3")),
        ]);
        let start = response("http://a.test/0", 302, Some("/1"));
        let outcome = follower(routes, RedirectPolicy::AnyHost, 2)
            .follow(start, &request("/0", "GET"))
            .await;
        assert_eq!(outcome.stop, FollowStop::MaxHops);
        assert_eq!(outcome.response.url, "http://a.test/2");
        assert_eq!(outcome.requests, 2);
    }

    #[tokio::test]
    async fn test_same_host_policy_stops_off_host() {
        let routes = Routes::new(&[("http://b.test/", 200, None)]);
        let start = response("http://a.test/", 302, Some("http://b.test/"));
        let outcome = follower(routes.clone(), RedirectPolicy::SameHost, 10)
            .follow(start, &request("/", "GET"))
            .await;
        assert_eq!(outcome.stop, FollowStop::OffHost);
        assert!(routes.sent().is_empty());
    }

    #[tokio::test]
    async fn test_missing_location_and_hop_failure() {
        let routes = Routes::new(&[]);
        let start = response("http://a.test/", 302, None);
        let outcome = follower(routes.clone(), RedirectPolicy::AnyHost, 10)
            .follow(start, &request("/", "GET"))
            .await;
        assert_eq!(outcome.stop, FollowStop::MissingLocation);

        let start = response("http://a.test/", 302, Some("/gone"));
        let outcome = follower(routes, RedirectPolicy::AnyHost, 10)
            .follow(start, &request("/", "GET"))
            .await;
        assert_eq!(outcome.stop, FollowStop::HopFailed(ProbeError::ConnectionRefused));
        assert_eq!(outcome.response.status, 302);
    }

    #[tokio::test]
    async fn test_method_rewrite() {
        let routes = Routes::new(&[
            ("http://a.test/b", 307, Some("/c")),
            ("http://a.test/c", 200, None),
        ]);
        let start = response("http://a.test/a", 303, Some("/b"));
        follower(routes.clone(), RedirectPolicy::AnyHost, 10)
            .follow(start, &request("/a", "POST"))
            .await;

        let sent = routes.sent();
        assert_eq!(sent[0].method, "GET");
        assert!(sent[0].body.is_none());
        assert_eq!(sent[1].method, "GET");

        let routes = Routes::new(&[("http://a.test/b", 200, None)]);
        let start = response("http://a.test/a", 308, Some("/b"));
        follower(routes.clone(), RedirectPolicy::AnyHost, 10)
            .follow(start, &request("/a", "POST"))
            .await;
        let sent = routes.sent();
        assert_eq!(sent[0].method, "POST");
        assert_eq!(sent[0].body.as_deref(), Some("a=b"));
    }
}
