//! Data types for captured HTTP request and response information.
//!
//! This module contains the snapshots taken of each exchange, the timing
//! attached to them, and the request extensions that upstream layers use to
//! hand information to the middleware.

use axum::{
    extract::{ConnectInfo, OriginalUri, Request},
    http::{header, HeaderMap, Method, StatusCode, Version},
    response::Response,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::{Duration, Instant},
};

/// Address used when no layer of the connection reports a peer.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Severity of a logged exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Classify an exchange from its status code and whether an upstream
    /// error accompanied it.
    ///
    /// Any error, or a status of 500 and above, is [`Severity::Error`]. Client
    /// errors (400..500) are [`Severity::Warn`]. Everything else, including
    /// codes outside the usual HTTP range, is [`Severity::Info`].
    pub fn classify(status: u16, has_error: bool) -> Self {
        if has_error || status >= 500 {
            Severity::Error
        } else if status >= 400 {
            Severity::Warn
        } else {
            Severity::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit client address, set by an upstream layer that knows better than
/// the socket (e.g. one that trusts a proxy protocol header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// A request body already decoded by an upstream layer.
///
/// When present in the request extensions it is logged instead of the raw
/// captured request bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBody(pub Value);

/// An error produced by an upstream error-handling stage.
///
/// Insert it into the request extensions (or, from a handler, the response
/// extensions) and the error-aware middleware records it under `err` and
/// logs the exchange at [`Severity::Error`]. It is never removed, so later
/// stages still see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl UpstreamError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            causes: Vec::new(),
        }
    }

    /// Capture an error together with its chain of sources.
    pub fn from_error<E>(name: impl Into<String>, error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            name: name.into(),
            message: error.to_string(),
            causes,
        }
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for UpstreamError {}

/// Every place a peer address may be found, in lookup order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteAddrChain {
    /// Explicit request IP ([`ClientIp`] extension).
    pub explicit: Option<IpAddr>,
    /// Connection-layer peer ([`ConnectInfo`] extension).
    pub connection: Option<IpAddr>,
    /// Socket-layer peer reported by the fronting proxy (`x-real-ip`).
    pub socket: Option<IpAddr>,
    /// Peer of the socket nested behind the proxy chain (first `x-forwarded-for` hop).
    pub nested_socket: Option<IpAddr>,
}

impl RemoteAddrChain {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers();
        Self {
            explicit: request.extensions().get::<ClientIp>().map(|ip| ip.0),
            connection: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip()),
            socket: header_str(headers, "x-real-ip").and_then(|v| v.trim().parse().ok()),
            nested_socket: header_str(headers, "x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok()),
        }
    }

    /// First address found, falling back to loopback.
    pub fn resolve(&self) -> IpAddr {
        self.explicit
            .or(self.connection)
            .or(self.socket)
            .or(self.nested_socket)
            .unwrap_or(LOOPBACK)
    }
}

/// Metadata captured from the request when the middleware is installed.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: String,
    /// Original path and query, including any prefix stripped by nesting.
    pub url: String,
    pub referer: String,
    /// Raw `user-agent` header.
    pub user_agent: Option<String>,
    pub http_version: String,
    pub headers: Map<String, Value>,
    pub remote_addr: RemoteAddrChain,
    /// Decoded body, [`Value::Null`] until a body is attached.
    pub body: Value,
}

impl RequestSnapshot {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers();
        let uri = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or_else(|| request.uri());

        Self {
            method: request.method().to_string(),
            url: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_owned())
                .unwrap_or_else(|| "-".to_owned()),
            referer: header_str(headers, header::REFERER.as_str())
                .or_else(|| header_str(headers, "referrer"))
                .unwrap_or("-")
                .to_owned(),
            user_agent: header_str(headers, header::USER_AGENT.as_str()).map(str::to_owned),
            http_version: version_string(request.version()).to_owned(),
            headers: headers_to_map(headers),
            remote_addr: RemoteAddrChain::from_request(request),
            body: request
                .extensions()
                .get::<DecodedBody>()
                .map(|decoded| decoded.0.clone())
                .unwrap_or(Value::Null),
        }
    }

    /// Fill the body from captured request bytes, unless an upstream decoder
    /// already provided one.
    pub fn attach_body(&mut self, captured: Option<Bytes>) {
        if self.body.is_null() {
            if let Some(bytes) = captured {
                self.body = decode_body_bytes(&bytes);
            }
        }
    }
}

/// Metadata captured from the response once the inner service produced it.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Map<String, Value>,
}

impl ResponseSnapshot {
    pub fn from_response<B>(response: &Response<B>) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: headers_to_map(response.headers()),
        }
    }
}

/// Whether a response to `method` with `status` carries a body on the wire.
///
/// `HEAD` responses and `1xx`, `204` and `304` statuses never do.
pub fn body_on_wire(method: &Method, status: StatusCode) -> bool {
    *method != Method::HEAD
        && !status.is_informational()
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Per-request timer, started when the middleware sees the request.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    start: Instant,
}

impl Timing {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Elapsed {
        Elapsed(self.start.elapsed())
    }
}

/// Elapsed time of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elapsed(pub Duration);

impl Elapsed {
    /// `(seconds, nanoseconds)` pair.
    pub fn hrtime(&self) -> (u64, u32) {
        (self.0.as_secs(), self.0.subsec_nanos())
    }

    pub fn as_millis_f64(&self) -> f64 {
        let (secs, nanos) = self.hrtime();
        (secs as f64 * 1e3) + (nanos as f64 / 1e6)
    }
}

/// Decode captured request bytes: JSON when it parses, text otherwise.
pub fn decode_body_bytes(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Convert a header map to a JSON object. Repeated headers are joined with `, `.
pub fn headers_to_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut result = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        result.insert(name.as_str().to_owned(), Value::String(joined));
    }
    result
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn version_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "-",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http};

    #[test]
    fn test_severity_classification() {
        assert_eq!(Severity::classify(503, false), Severity::Error);
        assert_eq!(Severity::classify(404, false), Severity::Warn);
        assert_eq!(Severity::classify(200, false), Severity::Info);
        assert_eq!(Severity::classify(200, true), Severity::Error);
    }

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(Severity::classify(500, false), Severity::Error);
        assert_eq!(Severity::classify(499, false), Severity::Warn);
        assert_eq!(Severity::classify(400, false), Severity::Warn);
        assert_eq!(Severity::classify(399, false), Severity::Info);
        assert_eq!(Severity::classify(0, false), Severity::Info);
        assert_eq!(Severity::classify(404, true), Severity::Error);
    }

    #[test]
    fn test_remote_addr_falls_back_to_loopback() {
        assert_eq!(RemoteAddrChain::default().resolve(), LOOPBACK);
    }

    #[test]
    fn test_remote_addr_nested_socket_only() {
        let chain = RemoteAddrChain {
            nested_socket: Some("10.1.2.3".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(chain.resolve(), "10.1.2.3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_remote_addr_order() {
        let request = http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "10.0.0.9, 10.0.0.1")
            .header("x-real-ip", "10.0.0.7")
            .extension(ConnectInfo(SocketAddr::from(([192, 168, 1, 5], 4242))))
            .body(Body::empty())
            .unwrap();

        let chain = RemoteAddrChain::from_request(&request);
        assert_eq!(chain.nested_socket, Some("10.0.0.9".parse().unwrap()));
        assert_eq!(chain.socket, Some("10.0.0.7".parse().unwrap()));
        assert_eq!(chain.resolve(), "192.168.1.5".parse::<IpAddr>().unwrap());

        let mut request = request;
        request
            .extensions_mut()
            .insert(ClientIp("203.0.113.4".parse().unwrap()));
        assert_eq!(
            RemoteAddrChain::from_request(&request).resolve(),
            "203.0.113.4".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_request_snapshot_defaults() {
        let request = http::Request::builder()
            .method("GET")
            .uri("/widgets/42?color=red")
            .body(Body::empty())
            .unwrap();

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.method, "GET");
        assert_eq!(snapshot.url, "/widgets/42?color=red");
        assert_eq!(snapshot.referer, "-");
        assert_eq!(snapshot.user_agent, None);
        assert_eq!(snapshot.http_version, "1.1");
        assert!(snapshot.body.is_null());
    }

    #[test]
    fn test_request_snapshot_prefers_original_uri_and_referrer_spelling() {
        let request = http::Request::builder()
            .uri("/42")
            .header("referrer", "https://example.com/")
            .extension(OriginalUri("/widgets/42".parse().unwrap()))
            .body(Body::empty())
            .unwrap();

        let snapshot = RequestSnapshot::from_request(&request);
        assert_eq!(snapshot.url, "/widgets/42");
        assert_eq!(snapshot.referer, "https://example.com/");
    }

    #[test]
    fn test_attach_body_keeps_upstream_decoded_body() {
        let request = http::Request::builder()
            .uri("/")
            .extension(DecodedBody(serde_json::json!({"from": "upstream"})))
            .body(Body::empty())
            .unwrap();

        let mut snapshot = RequestSnapshot::from_request(&request);
        snapshot.attach_body(Some(Bytes::from_static(b"{\"from\":\"wire\"}")));
        assert_eq!(snapshot.body, serde_json::json!({"from": "upstream"}));
    }

    #[test]
    fn test_decode_body_bytes() {
        assert_eq!(decode_body_bytes(b""), Value::Null);
        assert_eq!(decode_body_bytes(b"{\"a\":1}"), serde_json::json!({"a": 1}));
        assert_eq!(decode_body_bytes(b"plain text"), Value::String("plain text".into()));
    }

    #[test]
    fn test_headers_to_map_joins_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("accept", "text/html".parse().unwrap());
        headers.append("accept", "application/json".parse().unwrap());

        let map = headers_to_map(&headers);
        assert_eq!(map["accept"], "text/html, application/json");
    }

    #[test]
    fn test_elapsed_formats() {
        let elapsed = Elapsed(Duration::new(1, 500_000));
        assert_eq!(elapsed.hrtime(), (1, 500_000));
        assert!((elapsed.as_millis_f64() - 1000.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_upstream_error_collects_sources() {
        #[derive(Debug, thiserror::Error)]
        #[error("query failed")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let captured = UpstreamError::from_error("DatabaseError", &err);
        assert_eq!(captured.message, "query failed");
        assert_eq!(captured.causes, vec!["disk gone".to_string()]);
    }

    #[test]
    fn test_body_on_wire() {
        assert!(body_on_wire(&Method::GET, StatusCode::OK));
        assert!(body_on_wire(&Method::POST, StatusCode::NOT_FOUND));
        assert!(!body_on_wire(&Method::HEAD, StatusCode::OK));
        assert!(!body_on_wire(&Method::GET, StatusCode::SWITCHING_PROTOCOLS));
        assert!(!body_on_wire(&Method::GET, StatusCode::NO_CONTENT));
        assert!(!body_on_wire(&Method::GET, StatusCode::NOT_MODIFIED));
    }
}
