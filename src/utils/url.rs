// src/utils/url.rs

//! URL manipulation utilities.
//!
//! Input URLs are split by hand so the path and query survive byte-for-byte;
//! the `url` crate is only used to resolve redirect locations.

use url::Url;

use crate::models::Scheme;

/// Pieces of an input line or absolute URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: Option<Scheme>,
    pub host: String,
    pub port: Option<u16>,
    /// Everything after the authority, verbatim (may be empty)
    pub path: String,
}

/// Split `[scheme://]host[:port][path]` without normalizing anything.
///
/// Returns `None` for unsupported schemes, empty hosts and invalid ports.
///
/// # Examples
/// ```
/// use webprobe::utils::url::split;
///
/// let parts = split("http://127.0.0.1:8080/hpp/?pp=%22%3E").unwrap();
/// assert_eq!(parts.port, Some(8080));
/// assert_eq!(parts.path, "/hpp/?pp=%22%3E");
/// ```
pub fn split(input: &str) -> Option<UrlParts> {
    let input = input.trim();
    let (scheme, rest) = match input.find("://") {
        Some(idx) => (Some(Scheme::parse(&input[..idx])?), &input[idx + 3..]),
        None => (None, input),
    };

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);

    // userinfo never takes part in probing
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    let (host, port) = split_host_port(authority)?;
    if host.is_empty() {
        return None;
    }

    Some(UrlParts {
        scheme,
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

fn split_host_port(authority: &str) -> Option<(&str, Option<u16>)> {
    if let Some(stripped) = authority.strip_prefix('[') {
        let end = stripped.find(']')?;
        let host = &stripped[..end];
        let port = match &stripped[end + 1..] {
            "" => None,
            rest => Some(parse_port(rest.strip_prefix(':')?)?),
        };
        return Some((host, port));
    }

    match authority.matches(':').count() {
        0 => Some((authority, None)),
        1 => {
            let (host, port) = authority.split_once(':')?;
            Some((host, Some(parse_port(port)?)))
        }
        // bare IPv6 literal
        _ => Some((authority, None)),
    }
}

fn parse_port(value: &str) -> Option<u16> {
    value.parse::<u16>().ok().filter(|p| *p > 0)
}

/// Append a configured path to a base path, joining on exactly one slash
/// and keeping both sides otherwise untouched.
pub fn join_path(base: &str, extra: &str) -> String {
    if base.is_empty() {
        return extra.to_string();
    }
    if extra.is_empty() {
        return base.to_string();
    }
    match (base.ends_with('/'), extra.starts_with('/')) {
        (true, true) => format!("{}{}", base, &extra[1..]),
        (false, false) if !extra.starts_with('?') => format!("{base}/{extra}"),
        _ => format!("{base}{extra}"),
    }
}

/// Resolve a `Location` value against the URL it was received from.
pub fn resolve(base: &str, location: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(location) {
        return Some(absolute.to_string());
    }
    Url::parse(base)
        .and_then(|base| base.join(location))
        .map(|url| url.to_string())
        .ok()
}

/// Comparison form of a URL for redirect loop detection.
pub fn visit_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    }
}

/// Lowercased host of an absolute URL.
pub fn host_of(url: &str) -> Option<String> {
    split(url).map(|parts| parts.host.to_ascii_lowercase())
}
