// src/services/resolver.rs

//! Host resolution, CDN range detection and address filtering.

use std::net::IpAddr;

use dashmap::DashMap;
use hickory_resolver::TokioResolver;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use ipnetwork::IpNetwork;
use tokio::sync::OnceCell;

/// Published edge ranges of common CDN / reverse-proxy providers.
const CDN_RANGES: &[(&str, &str)] = &[
    // Cloudflare
    ("cloudflare", "173.245.48.0/20"),
    ("cloudflare", "103.21.244.0/22"),
    ("cloudflare", "103.22.200.0/22"),
    ("cloudflare", "103.31.4.0/22"),
    ("cloudflare", "141.101.64.0/18"),
    ("cloudflare", "108.162.192.0/18"),
    ("cloudflare", "190.93.240.0/20"),
    ("cloudflare", "188.114.96.0/20"),
    ("cloudflare", "197.234.240.0/22"),
    ("cloudflare", "198.41.128.0/17"),
    ("cloudflare", "162.158.0.0/15"),
    ("cloudflare", "104.16.0.0/13"),
    ("cloudflare", "104.24.0.0/14"),
    ("cloudflare", "172.64.0.0/13"),
    ("cloudflare", "131.0.72.0/22"),
    ("cloudflare", "2400:cb00::/32"),
    ("cloudflare", "2606:4700::/32"),
    ("cloudflare", "2803:f800::/32"),
    // Fastly
    ("fastly", "23.235.32.0/20"),
    ("fastly", "146.75.0.0/17"),
    ("fastly", "151.101.0.0/16"),
    ("fastly", "199.232.0.0/16"),
    ("fastly", "2a04:4e40::/32"),
    // Amazon CloudFront
    ("cloudfront", "13.32.0.0/15"),
    ("cloudfront", "13.224.0.0/14"),
    ("cloudfront", "52.84.0.0/15"),
    ("cloudfront", "54.230.0.0/16"),
    ("cloudfront", "54.239.128.0/18"),
    ("cloudfront", "99.84.0.0/16"),
    ("cloudfront", "205.251.192.0/19"),
    // Akamai
    ("akamai", "2.16.0.0/13"),
    ("akamai", "23.32.0.0/11"),
    ("akamai", "23.192.0.0/11"),
    ("akamai", "184.24.0.0/13"),
    // Imperva Incapsula
    ("incapsula", "45.60.0.0/16"),
    ("incapsula", "107.154.0.0/16"),
    ("incapsula", "199.83.128.0/21"),
    // Sucuri
    ("sucuri", "185.93.228.0/22"),
    ("sucuri", "192.88.134.0/23"),
];

/// System resolver with a per-run cache and the CDN range table.
///
/// Address lookups go through the system resolver. CNAME lookups need a
/// record-level query and use a DNS client built from the system config on
/// first use.
pub struct Resolver {
    cdn: Vec<(&'static str, IpNetwork)>,
    cache: DashMap<String, Vec<IpAddr>>,
    cnames: DashMap<String, Option<String>>,
    dns: OnceCell<Option<TokioResolver>>,
}

impl Resolver {
    pub fn new() -> Self {
        let cdn = CDN_RANGES
            .iter()
            .filter_map(|(provider, cidr)| cidr.parse().ok().map(|net| (*provider, net)))
            .collect();
        Self {
            cdn,
            cache: DashMap::new(),
            cnames: DashMap::new(),
            dns: OnceCell::new(),
        }
    }

    /// All A/AAAA records of `host`, in resolver order without duplicates.
    ///
    /// IP literals resolve to themselves; lookup failures yield no addresses.
    pub async fn resolve(&self, host: &str) -> Vec<IpAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return vec![ip];
        }

        let key = host.to_ascii_lowercase();
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let mut addresses = Vec::new();
        match tokio::net::lookup_host((host, 0)).await {
            Ok(found) => {
                for addr in found {
                    if !addresses.contains(&addr.ip()) {
                        addresses.push(addr.ip());
                    }
                }
                log::debug!("DNS resolved {} -> {:?}", host, addresses);
            }
            Err(e) => log::debug!("DNS lookup failed for {}: {}", host, e),
        }

        self.cache.insert(key, addresses.clone());
        addresses
    }

    /// Canonical name `host` aliases, without the trailing dot.
    ///
    /// IP literals, hosts without a CNAME record and lookup failures yield
    /// `None`.
    pub async fn cname(&self, host: &str) -> Option<String> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.parse::<IpAddr>().is_ok() {
            return None;
        }

        let key = host.to_ascii_lowercase();
        if let Some(cached) = self.cnames.get(&key) {
            return cached.clone();
        }

        let dns = self
            .dns
            .get_or_init(|| async {
                match TokioResolver::builder(TokioConnectionProvider::default()) {
                    Ok(builder) => Some(builder.build()),
                    Err(e) => {
                        log::warn!("DNS client unavailable, CNAMEs will be empty: {}", e);
                        None
                    }
                }
            })
            .await
            .as_ref()?;

        let cname = match dns.lookup(host, RecordType::CNAME).await {
            Ok(lookup) => lookup
                .iter()
                .filter_map(|record| record.as_cname())
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .next(),
            Err(e) => {
                log::debug!("CNAME lookup failed for {}: {}", host, e);
                None
            }
        };

        self.cnames.insert(key, cname.clone());
        cname
    }

    /// CDN provider owning `ip`, if any.
    pub fn cdn_provider(&self, ip: IpAddr) -> Option<&'static str> {
        self.cdn
            .iter()
            .find(|(_, net)| net.contains(ip))
            .map(|(provider, _)| *provider)
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Allow/deny CIDR filtering of resolved addresses.
#[derive(Debug, Clone, Default)]
pub struct AddressFilter {
    allow: Vec<IpNetwork>,
    deny: Vec<IpNetwork>,
}

impl AddressFilter {
    pub fn new(allow: Vec<IpNetwork>, deny: Vec<IpNetwork>) -> Self {
        Self { allow, deny }
    }

    pub fn is_active(&self) -> bool {
        !self.allow.is_empty() || !self.deny.is_empty()
    }

    /// Outside `allow` (when set) or inside `deny` is refused.
    pub fn permits(&self, ip: IpAddr) -> bool {
        if !self.allow.is_empty() && !self.allow.iter().any(|net| net.contains(ip)) {
            return false;
        }
        !self.deny.iter().any(|net| net.contains(ip))
    }
}
