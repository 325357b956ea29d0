// src/services/classifier.rs

//! Response decoding, metadata extraction and match/filter evaluation.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use scraper::{Html, Selector};

use crate::config::ProbeSettings;
use crate::models::{CriteriaSubject, MatchFilterCriteria, ProbeResult, Scheme, Target};
use crate::services::redirects::{FollowOutcome, FollowStop};
use crate::services::resolver::Resolver;
use crate::utils::hash::favicon_hash;

pub struct ResponseClassifier {
    settings: Arc<ProbeSettings>,
    resolver: Arc<Resolver>,
}

impl ResponseClassifier {
    pub fn new(settings: Arc<ProbeSettings>, resolver: Arc<Resolver>) -> Self {
        Self { settings, resolver }
    }

    /// Build the result for a target whose probe produced a response.
    ///
    /// The reported URL is always the target's own; the followed chain only
    /// contributes the final response and its status codes.
    pub fn classify(
        &self,
        target: &Target,
        scheme: Scheme,
        attempts: u32,
        follow: FollowOutcome,
    ) -> ProbeResult {
        let settings = &self.settings;
        let mut result = ProbeResult::new(target, scheme, settings.leave_default_ports);
        let response = follow.response;

        if let FollowStop::HopFailed(error) = &follow.stop {
            log::debug!("{}: stopped following redirects: {}", result.url, error);
        }

        let body = decode_body(
            response.header("content-encoding"),
            &response.body,
            settings.max_body_read,
        );
        let text = String::from_utf8_lossy(&body);

        result.attempts = attempts;
        result.final_url = response.url.clone();
        result.status_code = Some(response.status);
        result.chain_status_codes = follow.chain.iter().map(|hop| hop.status_code).collect();
        result.content_length = Some(body.len());
        result.content_type = response.header("content-type").map(content_type);
        result.location = response.header("location").map(str::to_string);
        result.server = response.header("server").map(str::to_string);
        result.title = extract_title(&text);
        result.lines = text.lines().count();
        result.words = text.split_whitespace().count();
        result.response_time = response.elapsed;
        result.headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
            .collect::<BTreeMap<_, _>>();
        result.hashes = settings
            .hashes
            .iter()
            .map(|kind| (kind.name().to_string(), kind.digest(&body)))
            .collect();

        let favicon_criteria =
            !settings.matchers.favicon_hashes.is_empty() || !settings.filters.favicon_hashes.is_empty();
        if (settings.favicon || favicon_criteria) && !body.is_empty() {
            result.favicon_hash = Some(favicon_hash(&body));
        }
        if let Some(re) = &settings.extract_regex {
            result.extracts = re
                .find_iter(&text)
                .map(|m| m.as_str().to_string())
                .collect();
        }

        if let Some(ip) = response.remote_ip.or(target.address) {
            result.ip = Some(ip);
            result.cdn = self.resolver.cdn_provider(ip).is_some();
        }
        if settings.include_chain {
            result.chain = follow.chain;
        }
        if needs_body(&settings.matchers) || needs_body(&settings.filters) {
            result.inspected_body = text.to_string();
        }
        if settings.include_response {
            let saved = &body[..body.len().min(settings.max_body_save)];
            result.body = Some(String::from_utf8_lossy(saved).into_owned());
        }

        result
    }

    /// Match/filter predicate. Only successful results are subject to it.
    pub fn accepts(&self, result: &ProbeResult) -> bool {
        let (matchers, filters) = (&self.settings.matchers, &self.settings.filters);
        if !result.is_success() || (matchers.is_empty() && filters.is_empty()) {
            return true;
        }

        let subject = CriteriaSubject {
            status_code: result.status_code.unwrap_or(0),
            content_length: result.content_length.unwrap_or(0),
            lines: result.lines,
            words: result.words,
            favicon_hash: result.favicon_hash.as_deref(),
            body: &result.inspected_body,
        };

        matchers.matches_all(&subject) && !filters.matches_any(&subject)
    }
}

fn needs_body(criteria: &MatchFilterCriteria) -> bool {
    !criteria.strings.is_empty() || !criteria.regexes.is_empty()
}

/// Undo `Content-Encoding`, producing at most `cap` bytes. Unknown
/// encodings and decode failures yield the bytes as received.
pub fn decode_body(encoding: Option<&str>, raw: &[u8], cap: usize) -> Vec<u8> {
    let Some(encoding) = encoding else {
        return raw.to_vec();
    };

    let decoded = match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => read_capped(GzDecoder::new(raw), cap),
        "deflate" => read_capped(ZlibDecoder::new(raw), cap)
            .or_else(|| read_capped(DeflateDecoder::new(raw), cap)),
        "br" => read_capped(brotli::Decompressor::new(raw, 4096), cap),
        _ => None,
    };

    match decoded {
        Some(bytes) => bytes,
        None => {
            log::debug!("Content-Encoding '{}' did not decode; using raw body", encoding);
            raw.to_vec()
        }
    }
}

fn read_capped(reader: impl Read, cap: usize) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.take(cap as u64).read_to_end(&mut out).ok()?;
    Some(out)
}

/// Text of the first `<title>`, flattened to one line.
pub fn extract_title(html: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(html);
    let raw = document.select(&selector).next()?.text().collect::<String>();

    let title = raw.replace(['\r', '\n'], "");
    let title = title.trim();
    (!title.is_empty()).then(|| title.to_string())
}

/// Media type without parameters.
fn content_type(value: &str) -> String {
    value
        .split(';')
        .next()
        .unwrap_or(value)
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use flate2::Compression;
    use flate2::write::{GzEncoder, ZlibEncoder};

    use super::*;
    use crate::models::{Config, RedirectHop};
    use crate::services::transport::FetchedResponse;

    const CAP: usize = 1024 * 1024;

    fn settings(configure: impl FnOnce(&mut Config)) -> Arc<ProbeSettings> {
        let mut config = Config::default();
        configure(&mut config);
        Arc::new(ProbeSettings::from_config(&config).unwrap())
    }

    fn classifier(configure: impl FnOnce(&mut Config)) -> ResponseClassifier {
        ResponseClassifier::new(settings(configure), Arc::new(Resolver::new()))
    }

    fn outcome(status: u16, headers: &[(&str, &str)], body: &[u8]) -> FollowOutcome {
        let response = FetchedResponse {
            url: "http://127.0.0.1:8080/".into(),
            status,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: body.to_vec(),
            elapsed: Duration::from_millis(12),
            remote_ip: Some("127.0.0.1".parse().unwrap()),
        };
        FollowOutcome {
            chain: vec![RedirectHop {
                url: response.url.clone(),
                status_code: status,
                location: None,
            }],
            response,
            stop: FollowStop::NotRedirect,
            requests: 0,
        }
    }

    fn target() -> Target {
        Target::new("127.0.0.1").with_port(Some(8080))
    }

    #[test]
    fn test_decode_gzip_and_deflate() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(b"hello").unwrap();
        assert_eq!(decode_body(Some("gzip"), &gz.finish().unwrap(), CAP), b"hello");

        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"hello").unwrap();
        assert_eq!(decode_body(Some("deflate"), &zlib.finish().unwrap(), CAP), b"hello");
    }

    #[test]
    fn test_decoded_body_is_capped() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::best());
        gz.write_all(&vec![b'a'; 4 * 1024 * 1024]).unwrap();
        let compressed = gz.finish().unwrap();
        assert!(compressed.len() < 64 * 1024);

        let decoded = decode_body(Some("gzip"), &compressed, 64 * 1024);
        assert_eq!(decoded.len(), 64 * 1024);
        assert!(decoded.iter().all(|b| *b == b'a'));
    }

    #[test]
    fn test_classify_caps_decoded_body() {
        let c = classifier(|c| c.response.max_body_read = 1024);
        let mut gz = GzEncoder::new(Vec::new(), Compression::best());
        gz.write_all(&vec![b' '; 1024 * 1024]).unwrap();
        let result = c.classify(
            &target(),
            Scheme::Http,
            1,
            outcome(200, &[("Content-Encoding", "gzip")], &gz.finish().unwrap()),
        );
        assert_eq!(result.content_length, Some(1024));
    }

    #[test]
    fn test_mislabeled_encoding_falls_back_to_raw() {
        let body = b"<html><body>plain</body></html>";
        assert_eq!(decode_body(Some("gzip"), body, CAP), body);
        assert_eq!(decode_body(Some("br"), body, CAP), body);
        assert_eq!(decode_body(Some("zstd"), body, CAP), body);
    }

    #[test]
    fn test_title_newlines_removed() {
        let html = "<html><head><title>\nTitle\r\n with\n breaks\r</title></head></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Title with breaks"));
        assert_eq!(extract_title("<p>no title</p>"), None);
    }

    #[test]
    fn test_classify_metadata() {
        let c = classifier(|c| c.response.hashes = "md5".into());
        let body = b"<title>Object moved</title>\none two";
        let result = c.classify(
            &target(),
            Scheme::Http,
            1,
            outcome(
                302,
                &[
                    ("Content-Type", "text/html; charset=utf-8"),
                    ("Location", "/login"),
                    ("Server", "nginx"),
                ],
                body,
            ),
        );

        assert!(result.is_success());
        assert_eq!(result.url, "http://127.0.0.1:8080");
        assert_eq!(result.status_code, Some(302));
        assert_eq!(result.title.as_deref(), Some("Object moved"));
        assert_eq!(result.content_type.as_deref(), Some("text/html"));
        assert_eq!(result.location.as_deref(), Some("/login"));
        assert_eq!(result.server.as_deref(), Some("nginx"));
        assert_eq!(result.content_length, Some(body.len()));
        assert_eq!(result.lines, 2);
        assert_eq!(result.words, 4);
        assert!(result.hashes.contains_key("md5"));
        assert_eq!(result.headers.get("server").map(String::as_str), Some("nginx"));
        assert!(result.chain.is_empty());
        assert!(result.body.is_none());
    }

    #[test]
    fn test_body_save_cap_and_chain() {
        let c = classifier(|c| {
            c.response.include_response = true;
            c.response.max_body_save = 4;
            c.redirects.include_chain = true;
        });
        let result = c.classify(&target(), Scheme::Http, 1, outcome(200, &[], b"abcdefgh"));
        assert_eq!(result.body.as_deref(), Some("abcd"));
        assert_eq!(result.content_length, Some(8));
        assert_eq!(result.chain.len(), 1);
    }

    #[test]
    fn test_extract_and_cdn() {
        let c = classifier(|c| c.response.extract_regex = r"v\d+".into());
        let mut follow = outcome(200, &[], b"v1 and v22");
        follow.response.remote_ip = Some("104.16.1.1".parse().unwrap());
        let result = c.classify(&target(), Scheme::Http, 1, follow);
        assert_eq!(result.extracts, vec!["v1".to_string(), "v22".to_string()]);
        assert!(result.cdn);
    }

    #[test]
    fn test_favicon_criteria_hash_without_favicon_mode() {
        let body = b"icon-bytes";
        let hash = favicon_hash(body);
        let c = classifier(|c| c.filters.favicon_hashes = vec![hash.clone()]);

        let result = c.classify(&target(), Scheme::Http, 1, outcome(200, &[], body));
        assert_eq!(result.favicon_hash.as_deref(), Some(hash.as_str()));
        assert!(!c.accepts(&result));

        let other = c.classify(&target(), Scheme::Http, 1, outcome(200, &[], b"other"));
        assert!(c.accepts(&other));
    }

    #[test]
    fn test_accepts_match_and_filter() {
        let c = classifier(|c| {
            c.matchers.status_codes = "200".into();
            c.filters.strings = vec!["forbidden".into()];
        });
        let ok = c.classify(&target(), Scheme::Http, 1, outcome(200, &[], b"welcome"));
        assert!(c.accepts(&ok));

        let filtered = c.classify(&target(), Scheme::Http, 1, outcome(200, &[], b"forbidden"));
        assert!(!c.accepts(&filtered));

        let unmatched = c.classify(&target(), Scheme::Http, 1, outcome(404, &[], b"welcome"));
        assert!(!c.accepts(&unmatched));
    }
}
