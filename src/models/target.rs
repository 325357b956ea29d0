//! Probe target and scheme types.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Protocol scheme of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// The alternate scheme used for fallback.
    pub fn other(&self) -> Scheme {
        match self {
            Scheme::Http => Scheme::Https,
            Scheme::Https => Scheme::Http,
        }
    }

    pub fn parse(s: &str) -> Option<Scheme> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fully specified probe unit.
///
/// `path` is kept byte-for-byte as supplied (query string included) and may
/// be empty, in which case `/` is requested but nothing is reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Scheme pinned by the input; `None` means "preferred, with fallback"
    pub scheme: Option<Scheme>,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub method: String,
    /// Host header override (vhost input)
    pub vhost: Option<String>,
    /// Address to connect to when probing every resolved IP
    pub address: Option<IpAddr>,
}

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            scheme: None,
            host: host.into(),
            port: None,
            path: String::new(),
            method: "GET".to_string(),
            vhost: None,
            address: None,
        }
    }

    pub fn with_scheme(mut self, scheme: Option<Scheme>) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_vhost(mut self, vhost: Option<String>) -> Self {
        self.vhost = vhost;
        self
    }

    pub fn with_address(mut self, address: Option<IpAddr>) -> Self {
        self.address = address;
        self
    }

    /// `host[:port]` as it appears in the reported URL.
    pub fn authority(&self, scheme: Scheme, leave_default_ports: bool) -> String {
        let host = bracket_host(&self.host);
        match self.port {
            Some(port) if leave_default_ports || port != scheme.default_port() => {
                format!("{host}:{port}")
            }
            _ => host,
        }
    }

    /// Canonical reported URL for the given scheme, path kept verbatim.
    pub fn url(&self, scheme: Scheme, leave_default_ports: bool) -> String {
        format!(
            "{}://{}{}",
            scheme,
            self.authority(scheme, leave_default_ports),
            self.path
        )
    }

    /// Request-target sent on the wire.
    pub fn request_path(&self) -> String {
        if self.path.is_empty() {
            "/".to_string()
        } else if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }

    /// Value of the Host header.
    pub fn host_header(&self, scheme: Scheme, leave_default_ports: bool) -> String {
        match &self.vhost {
            Some(vhost) => vhost.clone(),
            None => self.authority(scheme, leave_default_ports),
        }
    }

    /// Host key used for error budgets.
    pub fn host_key(&self) -> String {
        self.host.to_ascii_lowercase()
    }

    /// Canonical identity used for dedup and resume.
    ///
    /// An unpinned target is keyed under `primary`, the scheme it is probed
    /// with first, so `a.test`, `a.test:443` and `https://a.test` collapse
    /// when https is preferred. Default ports are dropped unless
    /// `leave_default_ports` is set.
    pub fn identity_key(&self, primary: Scheme, leave_default_ports: bool) -> String {
        let scheme = self.scheme.unwrap_or(primary);
        let mut key = format!(
            "{} {}://{}{}",
            self.method.to_ascii_uppercase(),
            scheme,
            self.authority(scheme, leave_default_ports).to_ascii_lowercase(),
            self.path
        );
        if let Some(address) = self.address {
            key.push_str(&format!(" @{address}"));
        }
        if let Some(vhost) = &self.vhost {
            key.push_str(&format!(" #{}", vhost.to_ascii_lowercase()));
        }
        key
    }
}

fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_keeps_non_default_port_and_path() {
        let target = Target::new("127.0.0.1")
            .with_port(Some(8080))
            .with_path("/redirect");
        assert_eq!(
            target.url(Scheme::Http, false),
            "http://127.0.0.1:8080/redirect"
        );
    }

    #[test]
    fn test_url_drops_default_port_unless_asked() {
        let target = Target::new("example.com").with_port(Some(443));
        assert_eq!(target.url(Scheme::Https, false), "https://example.com");
        assert_eq!(target.url(Scheme::Https, true), "https://example.com:443");
        assert_eq!(target.url(Scheme::Http, false), "http://example.com:443");
    }

    #[test]
    fn test_request_path_defaults_to_root() {
        assert_eq!(Target::new("a").request_path(), "/");
        assert_eq!(Target::new("a").with_path("?q=1").request_path(), "/?q=1");
        assert_eq!(
            Target::new("a").with_path("//../x").request_path(),
            "//../x"
        );
    }

    #[test]
    fn test_identity_key_drops_default_port() {
        let bare = Target::new("Example.com").with_scheme(Some(Scheme::Http));
        let explicit = bare.clone().with_port(Some(80));
        assert_eq!(
            bare.identity_key(Scheme::Https, false),
            explicit.identity_key(Scheme::Https, false)
        );
        assert_ne!(
            bare.identity_key(Scheme::Https, true),
            explicit.identity_key(Scheme::Https, true)
        );
    }

    #[test]
    fn test_identity_key_unpinned_uses_primary_scheme() {
        let bare = Target::new("a.test");
        let port = Target::new("a.test").with_port(Some(443));
        let pinned = Target::new("a.test").with_scheme(Some(Scheme::Https));
        let key = bare.identity_key(Scheme::Https, false);
        assert_eq!(key, "GET https://a.test");
        assert_eq!(port.identity_key(Scheme::Https, false), key);
        assert_eq!(pinned.identity_key(Scheme::Https, false), key);

        // :443 is not the default port of a plain-http first attempt
        assert_ne!(
            port.identity_key(Scheme::Http, false),
            bare.identity_key(Scheme::Http, false)
        );
        assert_ne!(pinned.identity_key(Scheme::Http, false), bare.identity_key(Scheme::Http, false));
    }

    #[test]
    fn test_identity_key_distinguishes_method_and_address() {
        let get = Target::new("example.com");
        let post = get.clone().with_method("POST");
        let pinned = get.clone().with_address(Some("10.0.0.1".parse().unwrap()));
        let key = |t: &Target| t.identity_key(Scheme::Https, false);
        assert_ne!(key(&get), key(&post));
        assert_ne!(key(&get), key(&pinned));
    }

    #[test]
    fn test_ipv6_host_is_bracketed() {
        let target = Target::new("::1").with_port(Some(8443));
        assert_eq!(target.url(Scheme::Https, false), "https://[::1]:8443");
    }
}
