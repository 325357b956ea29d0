// src/utils/parse.rs

//! Parsers for list-valued settings.
//!
//! Each returns a validated typed value or a configuration error naming the
//! offending item.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::error::{AppError, Result};
use crate::models::Scheme;
use crate::utils::http::ALL_METHODS;

/// One port to probe, optionally pinned to a scheme (`https:8443`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub port: u16,
    pub scheme: Option<Scheme>,
}

/// Split a comma separated list, dropping blanks.
pub fn split_list(spec: &str) -> impl Iterator<Item = &str> {
    spec.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parse an nmap-style port list: `80,443,8000-8010,http:8080,https:8443`.
pub fn parse_ports(spec: &str) -> Result<Vec<PortSpec>> {
    let mut seen = HashSet::new();
    let mut ports = Vec::new();

    for item in split_list(spec) {
        let (scheme, range) = match item.split_once(':') {
            Some((prefix, rest)) => {
                let scheme = Scheme::parse(prefix.trim()).ok_or_else(|| {
                    AppError::config(format!("invalid scheme prefix in port '{item}'"))
                })?;
                (Some(scheme), rest.trim())
            }
            None => (None, item),
        };

        let (start, end) = match range.split_once('-') {
            Some((low, high)) => (parse_port(low, item)?, parse_port(high, item)?),
            None => {
                let port = parse_port(range, item)?;
                (port, port)
            }
        };
        if start > end {
            return Err(AppError::config(format!("invalid port range '{item}'")));
        }

        for port in start..=end {
            let spec = PortSpec { port, scheme };
            if seen.insert(spec) {
                ports.push(spec);
            }
        }
    }

    Ok(ports)
}

fn parse_port(value: &str, item: &str) -> Result<u16> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(AppError::config(format!("invalid port '{item}'"))),
    }
}

/// Parse a comma separated list of integers.
pub fn parse_int_list<T: FromStr>(spec: &str, what: &str) -> Result<Vec<T>> {
    split_list(spec)
        .map(|item| {
            item.parse::<T>()
                .map_err(|_| AppError::config(format!("invalid {what} value '{item}'")))
        })
        .collect()
}

/// Paths come from a file (one per line) when `spec` names one, otherwise
/// from a comma separated list. Path bytes are otherwise kept as given.
pub fn parse_paths(spec: &str) -> Result<Vec<String>> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    let path = Path::new(spec);
    if path.is_file() {
        let content = fs::read_to_string(path)?;
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect());
    }

    Ok(split_list(spec).map(String::from).collect())
}

/// Parse a `Name: value` header line.
pub fn parse_header(line: &str) -> Result<(String, String)> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| AppError::config(format!("invalid header '{line}'")))?;
    let name = name.trim();
    if name.is_empty() || name.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(AppError::config(format!("invalid header name in '{line}'")));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse the method list; `all` expands to every standard method.
pub fn parse_methods(spec: &str) -> Result<Vec<String>> {
    let mut methods: Vec<String> = Vec::new();
    for item in split_list(spec) {
        if item.eq_ignore_ascii_case("all") {
            for method in ALL_METHODS {
                if !methods.iter().any(|m| m == method) {
                    methods.push(method.to_string());
                }
            }
            continue;
        }

        let method = item.to_ascii_uppercase();
        if !ALL_METHODS.contains(&method.as_str()) {
            return Err(AppError::config(format!("unknown method '{item}'")));
        }
        if !methods.contains(&method) {
            methods.push(method);
        }
    }

    if methods.is_empty() {
        methods.push("GET".to_string());
    }
    Ok(methods)
}

/// A request template read from a raw HTTP request file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub method: String,
    /// Request-target, verbatim
    pub path: String,
    /// Headers other than Host and the framing headers
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Host header value, used as the target when no input is given
    pub host: Option<String>,
}

/// Parse a raw HTTP/1.x request (`METHOD target HTTP/1.1`, headers, blank
/// line, optional body). Bare `\n` line endings are accepted.
pub fn parse_raw_request(bytes: &[u8]) -> Result<RawRequest> {
    let mut slots = [httparse::EMPTY_HEADER; 128];
    let mut request = httparse::Request::new(&mut slots);
    let head_len = match request.parse(bytes) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            return Err(AppError::config("raw request is missing the blank line after its headers"));
        }
        Err(e) => return Err(AppError::config(format!("invalid raw request: {e}"))),
    };

    let method = request.method.unwrap_or("GET").to_ascii_uppercase();
    if !ALL_METHODS.contains(&method.as_str()) {
        return Err(AppError::config(format!("unknown method '{method}' in raw request")));
    }

    let mut host = None;
    let mut headers = Vec::new();
    for header in request.headers.iter() {
        let value = String::from_utf8_lossy(header.value).trim().to_string();
        if header.name.eq_ignore_ascii_case("host") {
            host = Some(value);
        } else if !["content-length", "transfer-encoding", "connection"]
            .iter()
            .any(|framing| header.name.eq_ignore_ascii_case(framing))
        {
            headers.push((header.name.to_string(), value));
        }
    }

    let body = String::from_utf8_lossy(&bytes[head_len..]).into_owned();
    Ok(RawRequest {
        method,
        path: request.path.unwrap_or("/").to_string(),
        headers,
        body: (!body.trim().is_empty()).then_some(body),
        host,
    })
}

/// Parse CIDRs or bare addresses (treated as single-host networks).
pub fn parse_cidrs(items: &[String]) -> Result<Vec<IpNetwork>> {
    items
        .iter()
        .flat_map(|item| split_list(item))
        .map(|item| {
            item.parse::<IpNetwork>()
                .map_err(|e| AppError::config(format!("invalid CIDR '{item}': {e}")))
        })
        .collect()
}
