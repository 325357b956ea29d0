// src/services/normalizer.rs

//! Target normalization.
//!
//! Turns raw input lines into [`Target`]s: parses each line, expands it
//! across ports, paths, methods and (optionally) resolved addresses, applies
//! the CDN port restriction and allow/deny lists, and deduplicates by
//! canonical identity.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ProbeSettings;
use crate::error::Result;
use crate::models::{Scheme, Target};
use crate::services::resolver::{AddressFilter, Resolver};
use crate::utils::parse::PortSpec;
use crate::utils::url::{join_path, split};

/// Where input lines come from.
#[derive(Debug, Clone)]
pub enum TargetInput {
    Lines(Vec<String>),
    File(PathBuf),
    Stdin,
}

impl TargetInput {
    async fn open(self) -> Result<LineSource> {
        let reader: Box<dyn AsyncRead + Send + Unpin> = match self {
            TargetInput::Lines(lines) => return Ok(LineSource::Memory(lines.into_iter())),
            TargetInput::File(path) => Box::new(tokio::fs::File::open(path).await?),
            TargetInput::Stdin => Box::new(tokio::io::stdin()),
        };
        Ok(LineSource::Reader(BufReader::new(reader).lines()))
    }
}

enum LineSource {
    Memory(std::vec::IntoIter<String>),
    Reader(Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>),
}

impl LineSource {
    async fn next_line(&mut self) -> Result<Option<String>> {
        match self {
            LineSource::Memory(lines) => Ok(lines.next()),
            LineSource::Reader(lines) => Ok(lines.next_line().await?),
        }
    }
}

/// Drops targets whose canonical identity was already seen.
#[derive(Debug)]
pub struct Deduper {
    enabled: bool,
    primary: Scheme,
    leave_default_ports: bool,
    seen: HashSet<String>,
}

impl Deduper {
    pub fn new(enabled: bool, primary: Scheme, leave_default_ports: bool) -> Self {
        Self {
            enabled,
            primary,
            leave_default_ports,
            seen: HashSet::new(),
        }
    }

    fn for_settings(settings: &ProbeSettings) -> Self {
        Self::new(
            settings.dedupe(),
            settings.preferred_scheme,
            settings.leave_default_ports,
        )
    }

    /// True the first time a target identity is offered.
    pub fn admit(&mut self, target: &Target) -> bool {
        !self.enabled
            || self
                .seen
                .insert(target.identity_key(self.primary, self.leave_default_ports))
    }
}

/// Expands raw input into probe targets.
pub struct TargetNormalizer {
    settings: Arc<ProbeSettings>,
    resolver: Arc<Resolver>,
    filter: AddressFilter,
}

impl TargetNormalizer {
    pub fn new(settings: Arc<ProbeSettings>, resolver: Arc<Resolver>) -> Self {
        if !settings.resolvers.is_empty() {
            log::warn!(
                "Custom resolvers ({}) are not supported; using the system resolver",
                settings.resolvers.join(",")
            );
        }
        let filter = AddressFilter::new(settings.allow.clone(), settings.deny.clone());
        Self {
            settings,
            resolver,
            filter,
        }
    }

    /// Expand one input line into its targets, in port, path, method,
    /// address order.
    pub async fn expand_line(&self, line: &str) -> Vec<Target> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let (input, vhost) = if self.settings.vhost_input {
            match line.split_once(',') {
                Some((host, vhost)) => (host.trim(), Some(vhost.trim().to_string())),
                None => (line, None),
            }
        } else {
            (line, None)
        };

        let Some(parts) = split(input) else {
            log::debug!("Skipping unparsable input: {}", line);
            return Vec::new();
        };

        // Explicit scheme or port in the input wins over the port list.
        let mut ports: Vec<(Option<Scheme>, Option<u16>)> =
            if parts.scheme.is_some() || parts.port.is_some() || self.settings.ports.is_empty() {
                vec![(parts.scheme, parts.port)]
            } else {
                self.settings
                    .ports
                    .iter()
                    .map(|PortSpec { port, scheme }| (*scheme, Some(*port)))
                    .collect()
            };

        let needs_dns =
            self.settings.probe_all_ips || self.settings.exclude_cdn || self.filter.is_active();
        let mut addresses: Vec<Option<IpAddr>> = vec![None];

        if needs_dns {
            let mut resolved = self.resolver.resolve(&parts.host).await;

            if self.filter.is_active() {
                resolved.retain(|ip| self.filter.permits(*ip));
                if resolved.is_empty() {
                    log::debug!("No permitted address for {}", parts.host);
                    return Vec::new();
                }
            }

            if self.settings.exclude_cdn {
                if let Some(provider) = resolved.iter().find_map(|ip| self.resolver.cdn_provider(*ip)) {
                    log::debug!("{} is behind {}; limiting to ports 80/443", parts.host, provider);
                    ports.retain(|(_, port)| matches!(port, None | Some(80) | Some(443)));
                    if ports.is_empty() {
                        ports = vec![(None, Some(80)), (None, Some(443))];
                    }
                }
            }

            if self.settings.probe_all_ips && !resolved.is_empty() {
                addresses = resolved.into_iter().map(Some).collect();
            }
        }

        let paths: Vec<String> = if self.settings.paths.is_empty() {
            vec![parts.path.clone()]
        } else {
            self.settings
                .paths
                .iter()
                .map(|extra| join_path(&parts.path, extra))
                .collect()
        };

        let mut targets =
            Vec::with_capacity(ports.len() * paths.len() * self.settings.methods.len() * addresses.len());
        for (scheme, port) in &ports {
            for path in &paths {
                for method in &self.settings.methods {
                    for address in &addresses {
                        targets.push(
                            Target::new(parts.host.clone())
                                .with_scheme(*scheme)
                                .with_port(*port)
                                .with_path(path.clone())
                                .with_method(method.clone())
                                .with_vhost(vhost.clone())
                                .with_address(*address),
                        );
                    }
                }
            }
        }
        targets
    }

    /// Expand a complete input list: blank and repeated raw lines are
    /// dropped, then targets are deduplicated when enabled.
    pub async fn normalize(&self, lines: Vec<String>) -> Vec<Target> {
        let mut seen_lines = HashSet::new();
        let mut dedup = Deduper::for_settings(&self.settings);
        let mut targets = Vec::new();

        for line in lines {
            let line = line.trim().to_string();
            if line.is_empty() || !seen_lines.insert(line.clone()) {
                continue;
            }
            for target in self.expand_line(&line).await {
                if dedup.admit(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    /// Feed targets into `tx` from a background task.
    ///
    /// Stream mode forwards targets as lines arrive. Otherwise the whole
    /// input is read first and normalized as a list. Either way targets are
    /// sent in input order and the channel bound provides backpressure.
    /// Resolves to the number of targets sent.
    pub fn spawn_stream(
        self: Arc<Self>,
        input: TargetInput,
        tx: mpsc::Sender<Target>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<usize>> {
        tokio::spawn(async move {
            let mut source = input.open().await?;
            let mut sent = 0;

            if !self.settings.stream {
                let mut lines = Vec::new();
                while let Some(line) = source.next_line().await? {
                    lines.push(line);
                }
                for target in self.normalize(lines).await {
                    if !forward(&tx, target, &cancel).await {
                        return Ok(sent);
                    }
                    sent += 1;
                }
                return Ok(sent);
            }

            let mut dedup = Deduper::for_settings(&self.settings);
            while let Some(line) = source.next_line().await? {
                for target in self.expand_line(&line).await {
                    if !dedup.admit(&target) {
                        continue;
                    }
                    if !forward(&tx, target, &cancel).await {
                        return Ok(sent);
                    }
                    sent += 1;
                }
            }
            Ok(sent)
        })
    }
}

/// Send one target; false once the run is cancelled or the pool is gone.
async fn forward(tx: &mpsc::Sender<Target>, target: Target, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(target) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Config;

    fn normalizer(configure: impl FnOnce(&mut Config)) -> TargetNormalizer {
        let mut config = Config::default();
        configure(&mut config);
        let settings = ProbeSettings::from_config(&config).unwrap();
        TargetNormalizer::new(Arc::new(settings), Arc::new(Resolver::new()))
    }

    #[tokio::test]
    async fn test_bare_host() {
        let targets = normalizer(|_| {}).expand_line("example.com").await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].scheme, None);
        assert_eq!(targets[0].port, None);
        assert_eq!(targets[0].path, "");
    }

    #[tokio::test]
    async fn test_ports_and_paths_expand() {
        let n = normalizer(|c| {
            c.input.ports = "80,https:8443".into();
            c.input.paths = "/a,/b".into();
        });
        let targets = n.expand_line("example.com").await;
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[2].port, Some(8443));
        assert_eq!(targets[2].scheme, Some(Scheme::Https));
        assert_eq!(targets[3].path, "/b");
    }

    #[tokio::test]
    async fn test_explicit_port_skips_port_list() {
        let n = normalizer(|c| c.input.ports = "8000-8010".into());
        let targets = n.expand_line("http://127.0.0.1:4000/x?q=1").await;
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].port, Some(4000));
        assert_eq!(targets[0].path, "/x?q=1");
    }

    #[tokio::test]
    async fn test_path_composition() {
        let n = normalizer(|c| c.input.paths = "/path".into());
        let targets = n.expand_line("http://127.0.0.1:4000").await;
        assert_eq!(targets[0].url(Scheme::Http, false), "http://127.0.0.1:4000/path");
    }

    #[tokio::test]
    async fn test_methods_expand() {
        let n = normalizer(|c| c.request.methods = "all".into());
        let targets = n.expand_line("a.test").await;
        assert_eq!(targets.len(), 9);
        assert!(targets.iter().any(|t| t.method == "TRACE"));
    }

    #[tokio::test]
    async fn test_vhost_input() {
        let n = normalizer(|c| c.input.vhost_input = true);
        let targets = n.expand_line("127.0.0.1:8080,internal.test").await;
        assert_eq!(targets[0].host, "127.0.0.1");
        assert_eq!(targets[0].vhost.as_deref(), Some("internal.test"));
    }

    #[tokio::test]
    async fn test_probe_all_ips_pins_address() {
        let n = normalizer(|c| c.input.probe_all_ips = true);
        let targets = n.expand_line("127.0.0.1").await;
        assert_eq!(targets[0].address, Some("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_deny_list_drops_host() {
        let n = normalizer(|c| c.input.deny = vec!["127.0.0.0/8".into()]);
        assert!(n.expand_line("127.0.0.1:8080").await.is_empty());
    }

    #[tokio::test]
    async fn test_exclude_cdn_limits_ports() {
        let n = normalizer(|c| {
            c.input.exclude_cdn = true;
            c.input.ports = "80,443,8080,8443".into();
        });
        let cdn = n.expand_line("104.16.1.1").await;
        let ports: Vec<_> = cdn.iter().map(|t| t.port).collect();
        assert_eq!(ports, vec![Some(80), Some(443)]);

        let plain = n.expand_line("127.0.0.1").await;
        assert_eq!(plain.len(), 4);
    }

    #[tokio::test]
    async fn test_normalize_dedups_default_ports() {
        let n = normalizer(|_| {});
        let targets = n
            .normalize(vec![
                "http://a.test".into(),
                "http://a.test:80".into(),
                "  http://a.test  ".into(),
                "".into(),
                "https://a.test".into(),
            ])
            .await;
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn test_normalize_dedups_against_primary_scheme() {
        let n = normalizer(|_| {});
        let targets = n
            .normalize(vec!["a.test".into(), "a.test:443".into(), "https://a.test".into()])
            .await;
        assert_eq!(targets.len(), 1);

        // With http preferred, :443 and https:// are distinct from the bare host
        let n = normalizer(|c| c.scheme.preferred = "http".into());
        let targets = n
            .normalize(vec!["a.test".into(), "a.test:80".into(), "https://a.test".into()])
            .await;
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn test_leave_default_ports_keeps_literal_port() {
        let n = normalizer(|c| c.input.leave_default_ports = true);
        let targets = n
            .normalize(vec!["http://a.test".into(), "http://a.test:80".into()])
            .await;
        assert_eq!(targets.len(), 2);
    }

    #[tokio::test]
    async fn test_stream_mode_skip_dedupe() {
        let n = Arc::new(normalizer(|c| {
            c.input.stream = true;
            c.input.skip_dedupe = true;
        }));
        let (tx, mut rx) = mpsc::channel(8);
        let handle = n.spawn_stream(
            TargetInput::Lines(vec!["a.test".into(), "a.test".into()]),
            tx,
            CancellationToken::new(),
        );
        let mut received = Vec::new();
        while let Some(target) = rx.recv().await {
            received.push(target);
        }
        assert_eq!(handle.await.unwrap().unwrap(), 2);
        assert_eq!(received.len(), 2);
    }

    #[tokio::test]
    async fn test_spawn_stream_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        tokio::fs::write(&path, "a.test\nb.test\na.test\n").await.unwrap();

        let n = Arc::new(normalizer(|_| {}));
        let (tx, mut rx) = mpsc::channel(1);
        let handle = n.spawn_stream(TargetInput::File(path), tx, CancellationToken::new());
        let mut hosts = Vec::new();
        while let Some(target) = rx.recv().await {
            hosts.push(target.host);
        }
        assert_eq!(hosts, vec!["a.test".to_string(), "b.test".to_string()]);
        assert_eq!(handle.await.unwrap().unwrap(), 2);
    }
}
