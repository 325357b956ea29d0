// src/services/transport.rs

//! Network transports.
//!
//! [`ReqwestTransport`] is used for normal probing. [`RawTransport`] writes
//! the HTTP/1.1 request by hand over TCP (or TLS) so the request-target is
//! sent exactly as configured, which the `url` crate would otherwise
//! normalize.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{AppError, ProbeError, Result};
use crate::models::Scheme;
use crate::utils::url::split;

/// Largest response head accepted by the raw transport.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// One HTTP request as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Request-target, never empty
    pub path: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    /// Host header override (vhost input)
    pub host_override: Option<String>,
    /// Connect to this address instead of resolving `host`
    pub address: Option<IpAddr>,
}

impl ProbeRequest {
    /// `host[:port]`, dropping the scheme's default port.
    pub fn authority(&self) -> String {
        let host = bracket(&self.host);
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Logical URL of this request.
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority(), self.path)
    }

    pub fn host_header(&self) -> String {
        self.host_override
            .clone()
            .unwrap_or_else(|| self.authority())
    }

    fn connect_host(&self) -> String {
        match self.address {
            Some(address) => address.to_string(),
            None => self.host.clone(),
        }
    }

    /// URL handed to reqwest; points at the pinned address when there is one.
    fn wire_url(&self) -> String {
        match self.address {
            Some(address) => format!(
                "{}://{}:{}{}",
                self.scheme,
                bracket(&address.to_string()),
                self.port,
                self.path
            ),
            None => self.url(),
        }
    }

    fn overrides_host(&self) -> bool {
        self.host_override.is_some() || self.address.is_some()
    }

    /// The follow-up request for a redirect to `url`.
    ///
    /// Headers are kept. The pinned address and Host override only survive
    /// while the redirect stays on the same host.
    pub fn redirected(&self, url: &str, method: &str, keep_body: bool) -> Option<ProbeRequest> {
        let parts = split(url)?;
        let scheme = parts.scheme?;
        let same_host = parts.host.eq_ignore_ascii_case(&self.host);

        Some(ProbeRequest {
            scheme,
            port: parts.port.unwrap_or_else(|| scheme.default_port()),
            path: if parts.path.is_empty() {
                "/".to_string()
            } else {
                parts.path
            },
            host: parts.host,
            method: method.to_string(),
            headers: self.headers.clone(),
            body: if keep_body { self.body.clone() } else { None },
            host_override: if same_host {
                self.host_override.clone()
            } else {
                None
            },
            address: if same_host { self.address } else { None },
        })
    }

    /// Serialized request head and body, as the raw transport sends it.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        head.push_str(&format!("Host: {}\r\n", self.host_header()));

        let has = |name: &str| self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name));
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("host") || name.eq_ignore_ascii_case("connection") {
                continue;
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if !has("accept") {
            head.push_str("Accept: */*\r\n");
        }
        if let Some(body) = &self.body {
            if !has("content-length") {
                head.push_str(&format!("Content-Length: {}\r\n", body.len()));
            }
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut wire = head.into_bytes();
        if let Some(body) = &self.body {
            wire.extend_from_slice(body.as_bytes());
        }
        wire
    }
}

fn bracket(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// A received response with its body read up to the configured cap.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Logical URL the response was received from
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub elapsed: Duration,
    pub remote_ip: Option<IpAddr>,
}

impl FetchedResponse {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }
}

/// Sends one request and returns the response or a per-attempt error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ProbeRequest) -> std::result::Result<FetchedResponse, ProbeError>;
}

/// Wraps a transport and logs each request and/or response in full.
pub struct DumpingTransport {
    inner: Arc<dyn Transport>,
    requests: bool,
    responses: bool,
}

impl DumpingTransport {
    pub fn new(inner: Arc<dyn Transport>, requests: bool, responses: bool) -> Self {
        Self {
            inner,
            requests,
            responses,
        }
    }
}

#[async_trait]
impl Transport for DumpingTransport {
    async fn send(&self, request: &ProbeRequest) -> std::result::Result<FetchedResponse, ProbeError> {
        if self.requests {
            log::info!(
                "Dumped request for {}\n{}",
                request.url(),
                String::from_utf8_lossy(&request.to_wire())
            );
        }
        let result = self.inner.send(request).await;
        if self.responses {
            match &result {
                Ok(response) => log::info!("Dumped response for {}\n{}", response.url, dump_response(response)),
                Err(e) => log::info!("No response for {}: {}", request.url(), e),
            }
        }
        result
    }
}

/// Status line, headers and (lossy) body of a response.
pub fn dump_response(response: &FetchedResponse) -> String {
    let mut dump = format!("HTTP/1.1 {}\r\n", response.status);
    for (name, value) in &response.headers {
        dump.push_str(&format!("{name}: {value}\r\n"));
    }
    dump.push_str("\r\n");
    dump.push_str(&String::from_utf8_lossy(&response.body));
    dump
}

/// Accumulates body bytes up to a cap, discarding the rest.
struct CappedBody {
    bytes: Vec<u8>,
    cap: usize,
    discarded: usize,
}

impl CappedBody {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            discarded: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        let keep = room.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..keep]);
        self.discarded += chunk.len() - keep;
    }
}

// ============================================================================
// reqwest
// ============================================================================

/// Transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
    max_body_read: usize,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client, max_body_read: usize) -> Self {
        Self {
            client,
            max_body_read,
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ProbeRequest) -> std::result::Result<FetchedResponse, ProbeError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ProbeError::InvalidTarget(e.to_string()))?;

        let mut builder = self.client.request(method, request.wire_url());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.overrides_host() {
            builder = builder.header(reqwest::header::HOST, request.host_header());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let mut response = builder
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let remote_ip = response.remote_addr().map(|addr| addr.ip());
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        // Read up to the cap, then keep draining so the connection closes cleanly.
        let mut body = CappedBody::new(self.max_body_read);
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => body.push(&chunk),
                Ok(None) => break,
                Err(e) => {
                    log::debug!("Body read for {} ended early: {}", request.url(), e);
                    break;
                }
            }
        }
        if body.discarded > 0 {
            log::debug!(
                "Discarded {} body bytes beyond cap for {}",
                body.discarded,
                request.url()
            );
        }

        Ok(FetchedResponse {
            url: request.url(),
            status,
            headers,
            body: body.bytes,
            elapsed: started.elapsed(),
            remote_ip,
        })
    }
}

// ============================================================================
// raw
// ============================================================================

/// Certificate verifier that accepts any server certificate while still
/// checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Hand-written HTTP/1.1 over TCP/TLS, one connection per request.
pub struct RawTransport {
    connector: TlsConnector,
    timeout: Duration,
    max_body_read: usize,
}

impl RawTransport {
    pub fn new(timeout: Duration, max_body_read: usize) -> Result<Self> {
        let provider = Arc::new(ring::default_provider());
        let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| AppError::config(format!("TLS setup failed: {e}")))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            timeout,
            max_body_read,
        })
    }

    async fn exchange(&self, request: &ProbeRequest) -> std::result::Result<RawResponse, ProbeError> {
        let stream = TcpStream::connect((request.connect_host().as_str(), request.port))
            .await
            .map_err(|e| ProbeError::from_io(&e))?;
        let remote_ip = stream.peer_addr().ok().map(|addr| addr.ip());

        let wire = request.to_wire();
        let head_only = request.method.eq_ignore_ascii_case("HEAD");

        let mut response = match request.scheme {
            Scheme::Http => roundtrip(stream, &wire, head_only, self.max_body_read).await,
            Scheme::Https => {
                let name = ServerName::try_from(request.host.clone())
                    .map_err(|e| ProbeError::InvalidTarget(e.to_string()))?;
                let tls = self
                    .connector
                    .connect(name, stream)
                    .await
                    .map_err(|e| ProbeError::Tls(e.to_string()))?;
                roundtrip(tls, &wire, head_only, self.max_body_read).await
            }
        }
        .map_err(|e| ProbeError::from_io(&e))?;

        response.remote_ip = remote_ip;
        Ok(response)
    }
}

#[async_trait]
impl Transport for RawTransport {
    async fn send(&self, request: &ProbeRequest) -> std::result::Result<FetchedResponse, ProbeError> {
        let started = Instant::now();
        let response = tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| ProbeError::Timeout)??;

        Ok(FetchedResponse {
            url: request.url(),
            status: response.status,
            headers: response.headers,
            body: response.body,
            elapsed: started.elapsed(),
            remote_ip: response.remote_ip,
        })
    }
}

#[derive(Debug)]
struct RawResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    remote_ip: Option<IpAddr>,
}

/// Write `wire`, then read one response, honoring chunked, length-delimited
/// and close-delimited bodies.
async fn roundtrip<S>(mut stream: S, wire: &[u8], head_only: bool, cap: usize) -> io::Result<RawResponse>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(wire).await?;
    stream.flush().await?;

    let mut buf = Vec::with_capacity(8 * 1024);
    let mut chunk = [0u8; 8 * 1024];
    let (status, headers, head_len) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response head",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut header_slots = [httparse::EMPTY_HEADER; 128];
        let mut parsed = httparse::Response::new(&mut header_slots);
        match parsed.parse(&buf) {
            Ok(httparse::Status::Complete(len)) => {
                let headers: Vec<(String, String)> = parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect();
                break (parsed.code.unwrap_or(0), headers, len);
            }
            Ok(httparse::Status::Partial) if buf.len() > MAX_HEAD_BYTES => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "response head too large",
                ));
            }
            Ok(httparse::Status::Partial) => {}
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        }
    };

    let header = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim().to_string())
    };
    let chunked = header("transfer-encoding").is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    let content_length = header("content-length").and_then(|v| v.parse::<u64>().ok());
    let bodiless = head_only || status == 204 || status == 304 || (100..200).contains(&status);

    let leftover = io::Cursor::new(buf.split_off(head_len));
    let mut reader = BufReader::new(leftover.chain(stream));
    let mut body = CappedBody::new(cap);

    if !bodiless {
        let outcome = if chunked {
            read_chunked(&mut reader, &mut body).await
        } else {
            read_limited(&mut reader, content_length, &mut body).await
        };
        // Whatever arrived before a body error is still a usable response.
        if let Err(e) = outcome {
            log::debug!("Raw body read ended early: {}", e);
        }
    }

    Ok(RawResponse {
        status,
        headers,
        body: body.bytes,
        remote_ip: None,
    })
}

async fn read_limited<R>(reader: &mut R, limit: Option<u64>, body: &mut CappedBody) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8 * 1024];
    let mut limited = reader.take(limit.unwrap_or(u64::MAX));
    loop {
        let n = limited.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        body.push(&chunk[..n]);
    }
}

async fn read_chunked<R>(reader: &mut R, body: &mut CappedBody) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line);
        let size_field = text.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_field, 16)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size"))?;
        if size == 0 {
            return Ok(());
        }

        read_limited(reader, Some(size), body).await?;
        line.clear();
        reader.read_until(b'\n', &mut line).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str) -> ProbeRequest {
        ProbeRequest {
            scheme: Scheme::Http,
            host: "127.0.0.1".into(),
            port: 8080,
            path: path.into(),
            method: "GET".into(),
            headers: vec![("User-Agent".into(), "test".into())],
            body: None,
            host_override: None,
            address: None,
        }
    }

    /// Serve one canned response over an in-memory pipe, returning the
    /// request bytes the server saw.
    async fn serve(request: &ProbeRequest, response: &'static [u8], cap: usize) -> (RawResponse, String) {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let wire = request.to_wire();
        let expected = wire.len();
        let server_task = tokio::spawn(async move {
            let mut seen = vec![0u8; expected];
            server.read_exact(&mut seen).await.unwrap();
            server.write_all(response).await.unwrap();
            server.shutdown().await.unwrap();
            String::from_utf8(seen).unwrap()
        });
        let head_only = request.method == "HEAD";
        let parsed = roundtrip(client, &wire, head_only, cap).await.unwrap();
        (parsed, server_task.await.unwrap())
    }

    #[test]
    fn test_wire_keeps_path_bytes() {
        let wire = String::from_utf8(request("////../../etc/passwd").to_wire()).unwrap();
        assert!(wire.starts_with("GET ////../../etc/passwd HTTP/1.1\r\n"));
        assert!(wire.contains("Host: 127.0.0.1:8080\r\n"));
        assert!(wire.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_wire_body_and_vhost() {
        let mut req = request("/receive");
        req.method = "POST".into();
        req.body = Some("a=b".into());
        req.host_override = Some("internal.test".into());
        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert!(wire.contains("Host: internal.test\r\n"));
        assert!(wire.contains("Content-Length: 3\r\n"));
        assert!(wire.ends_with("\r\n\r\na=b"));
    }

    #[test]
    fn test_redirected_drops_pin_off_host() {
        let mut req = request("/a");
        req.address = Some("10.0.0.1".parse().unwrap());
        req.body = Some("x".into());

        let same = req.redirected("http://127.0.0.1:8080/b", "GET", false).unwrap();
        assert_eq!(same.address, req.address);
        assert_eq!(same.body, None);
        assert_eq!(same.path, "/b");

        let other = req.redirected("https://other.test", "POST", true).unwrap();
        assert_eq!(other.address, None);
        assert_eq!(other.port, 443);
        assert_eq!(other.path, "/");
        assert_eq!(other.body.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_roundtrip_content_length() {
        let req = request("/%invalid");
        let (response, seen) = serve(
            &req,
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nServer: t\r\n\r\nhello",
            1024,
        )
        .await;
        assert!(seen.starts_with("GET /%invalid HTTP/1.1"));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
    }

    #[tokio::test]
    async fn test_roundtrip_chunked() {
        let (response, _) = serve(
            &request("/"),
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n",
            1024,
        )
        .await;
        assert_eq!(response.body, b"Wikipedia");
    }

    #[tokio::test]
    async fn test_roundtrip_caps_body_and_reads_to_eof() {
        let (response, _) = serve(&request("/"), b"HTTP/1.0 200 OK\r\n\r\n0123456789", 4).await;
        assert_eq!(response.body, b"0123");
    }

    #[tokio::test]
    async fn test_roundtrip_head_has_no_body() {
        let mut req = request("/");
        req.method = "HEAD".into();
        let (response, _) = serve(&req, b"HTTP/1.1 200 OK\r\nContent-Length: 50\r\n\r\n", 1024).await;
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }

    /// Answers every request with an empty 204.
    struct NoContent;

    #[async_trait]
    impl Transport for NoContent {
        async fn send(&self, request: &ProbeRequest) -> std::result::Result<FetchedResponse, ProbeError> {
            Ok(FetchedResponse {
                url: request.url(),
                status: 204,
                headers: vec![("Server".into(), "t".into())],
                body: Vec::new(),
                elapsed: Duration::ZERO,
                remote_ip: None,
            })
        }
    }

    #[tokio::test]
    async fn test_dumping_transport_passes_through() {
        let dumping = DumpingTransport::new(Arc::new(NoContent), true, true);
        let response = dumping.send(&request("/x")).await.unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(response.url, "http://127.0.0.1:8080/x");
        assert_eq!(dump_response(&response), "HTTP/1.1 204\r\nServer: t\r\n\r\n");
    }

    #[test]
    fn test_raw_transport_builds() {
        assert!(RawTransport::new(Duration::from_secs(1), 1024).is_ok());
    }
}
