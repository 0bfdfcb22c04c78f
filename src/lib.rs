//! # reqtap
//!
//! An Axum middleware that logs every request/response exchange as one
//! structured, redacted record, emitted once the response body has been fully
//! written to the client.
//!
//! ## Features
//!
//! - **Transparent capture**: the response body is observed chunk by chunk
//!   while every frame is passed on unchanged
//! - **Exactly one record per request**, however many chunks the body has
//! - **Severity classification**: `error` for 5xx or upstream errors, `warn`
//!   for 4xx, `info` otherwise
//! - **Redaction** of sensitive keys (`password`, `cvv` by default) at any depth
//! - **Correlation**: a request id is generated per request, exposed to
//!   handlers as a [`RequestId`] extension and attached to the record
//! - **Extensible**: custom [`LogSink`]s, id generators and user-agent parsers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use reqtap::{request_logger, TracingSink};
//!
//! async fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     tracing_subscriber::fmt().json().init();
//!
//!     let app = Router::new()
//!         .route("/hello", get(hello))
//!         .layer(request_logger(TracingSink));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! ## Upstream errors
//!
//! The error-aware layer built by [`error_logger`] records an
//! [`UpstreamError`] found in the request extensions (put there by an
//! earlier error-handling stage) or in the response extensions (put there by
//! a handler), and logs the exchange at error severity.
//!
//! ```rust
//! use axum::{http::StatusCode, response::{IntoResponse, Response}};
//! use reqtap::UpstreamError;
//!
//! struct AppError(std::io::Error);
//!
//! impl IntoResponse for AppError {
//!     fn into_response(self) -> Response {
//!         let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
//!         response
//!             .extensions_mut()
//!             .insert(UpstreamError::from_error("IoError", &self.0));
//!         response
//!     }
//! }
//! ```

use axum::{body::Body, extract::Request, response::Response};
use bytes::Bytes;
use serde::Deserialize;
use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};
use tower::{Layer, Service};
use tracing::{debug, error, instrument};

pub mod types;
use types::{body_on_wire, RequestSnapshot, ResponseSnapshot, Timing};
pub use types::{ClientIp, DecodedBody, Severity, UpstreamError};

pub mod body_wrapper;
use body_wrapper::{BodyCaptureError, CaptureBody};

pub mod assembler;
pub use assembler::{AssembleError, Assembler, LogRecord};

pub mod redact;
pub use redact::SensitiveFields;

pub mod request_id;
pub use request_id::{IdGenerator, RequestId, UuidGenerator};

pub mod sink;
pub use sink::LogSink;

pub mod multi_sink;
pub use multi_sink::MultiSink;

pub mod tracing_sink;
pub use tracing_sink::TracingSink;

pub mod user_agent;
pub use user_agent::{BrowserUserAgentParser, UserAgentParser};

/// Configuration for the request logging middleware.
///
/// Controls what data is captured and what is kept out of the record. It can
/// be deserialized, so it fits in an application's own config file; missing
/// fields take their defaults.
///
/// # Examples
///
/// ```rust
/// use reqtap::{RequestLoggerConfig, SensitiveFields};
///
/// // Default configuration
/// let config = RequestLoggerConfig::default();
///
/// // Custom configuration
/// let config = RequestLoggerConfig {
///     capture_response_body: false,
///     sensitive_fields: SensitiveFields::new(["password", "cvv", "ssn"]),
///     ..Default::default()
/// };
/// ```
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RequestLoggerConfig {
    /// Whether to capture request bodies
    pub capture_request_body: bool,
    /// Whether to capture response bodies
    pub capture_response_body: bool,
    /// Keys removed from the record at any depth
    pub sensitive_fields: SensitiveFields,
    /// Whether to add the raw `req`/`res` objects to the record
    pub include_raw_exchange: bool,
}

impl Default for RequestLoggerConfig {
    fn default() -> Self {
        Self {
            capture_request_body: true,
            capture_response_body: true,
            sensitive_fields: SensitiveFields::default(),
            include_raw_exchange: false,
        }
    }
}

/// Build a [`RequestLoggerLayer`] with the default configuration.
///
/// Exchanges are logged without an upstream error.
pub fn request_logger<L: LogSink>(sink: L) -> RequestLoggerLayer {
    RequestLoggerLayer::new(RequestLoggerConfig::default(), sink)
}

/// Build an error-aware [`RequestLoggerLayer`] with the default configuration.
///
/// See [`RequestLoggerLayer::error_aware`].
pub fn error_logger<L: LogSink>(sink: L) -> RequestLoggerLayer {
    RequestLoggerLayer::new(RequestLoggerConfig::default(), sink).error_aware()
}

/// Tower layer for the request logging middleware.
///
/// This is the main entry point. It implements the Tower [`Layer`] trait and
/// can be used with Axum's layering system. One sink is shared by every
/// request; each request gets its own timer, id and capture buffers.
///
/// # Examples
///
/// ```rust,no_run
/// use reqtap::{RequestLoggerLayer, RequestLoggerConfig, TracingSink};
/// use axum::{routing::get, Router};
/// use tower::ServiceBuilder;
///
/// # async fn hello() -> &'static str { "Hello" }
/// # #[tokio::main]
/// # async fn main() {
/// let config = RequestLoggerConfig::default();
/// let layer = RequestLoggerLayer::new(config, TracingSink)
///     .with_id_generator(|| Some(format!("req-{}", std::process::id())));
///
/// let app = Router::new()
///     .route("/hello", get(hello))
///     .layer(ServiceBuilder::new().layer(layer));
///
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
/// axum::serve(listener, app).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct RequestLoggerLayer {
    config: RequestLoggerConfig,
    sink: Arc<dyn LogSink>,
    user_agents: Arc<dyn UserAgentParser>,
    ids: Arc<dyn IdGenerator>,
    error_aware: bool,
}

impl RequestLoggerLayer {
    /// Create a new request logger layer with the given configuration and sink.
    ///
    /// Request ids are random UUIDs and user agents are parsed with
    /// [`BrowserUserAgentParser`] until replaced.
    pub fn new<L: LogSink>(config: RequestLoggerConfig, sink: L) -> Self {
        Self {
            config,
            sink: Arc::new(sink),
            user_agents: Arc::new(BrowserUserAgentParser),
            ids: Arc::new(UuidGenerator),
            error_aware: false,
        }
    }

    /// Record [`UpstreamError`]s.
    ///
    /// The request extensions are checked first, then the response
    /// extensions. The error is left in place for later stages.
    pub fn error_aware(mut self) -> Self {
        self.error_aware = true;
        self
    }

    pub fn with_id_generator<G: IdGenerator>(mut self, ids: G) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn with_user_agent_parser<P: UserAgentParser>(mut self, parser: P) -> Self {
        self.user_agents = Arc::new(parser);
        self
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        let assembler = Assembler::new(
            self.sink.clone(),
            self.user_agents.clone(),
            self.config.sensitive_fields.clone(),
            self.config.include_raw_exchange,
        );
        RequestLoggerService {
            inner,
            shared: Arc::new(Shared {
                capture_request_body: self.config.capture_request_body,
                capture_response_body: self.config.capture_response_body,
                assembler,
                ids: self.ids.clone(),
                error_aware: self.error_aware,
            }),
        }
    }
}

struct Shared {
    capture_request_body: bool,
    capture_response_body: bool,
    assembler: Assembler,
    ids: Arc<dyn IdGenerator>,
    error_aware: bool,
}

/// Tower service implementation for the request logging middleware.
///
/// This service wraps an inner service. It calls the inner service exactly
/// once per request and wraps the response body so that the record is
/// assembled and emitted when the body completes. A response whose body is
/// dropped before it completes produces no record.
///
/// Users typically don't interact with this type directly - it's created by [`RequestLoggerLayer`].
#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> Service<Request> for RequestLoggerService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        let timing = Timing::start();
        let shared = self.shared.clone();

        let request_id = shared.ids.generate().map(RequestId::new);
        if let Some(id) = &request_id {
            request.extensions_mut().insert(id.clone());
        }

        let upstream_error = if shared.error_aware {
            request.extensions().get::<UpstreamError>().cloned()
        } else {
            None
        };

        let method = request.method().clone();
        let mut snapshot = RequestSnapshot::from_request(&request);
        debug!(
            req_id = ?request_id,
            method = %snapshot.method,
            url = %snapshot.url,
            "Extracted request metadata"
        );

        // Filled in if the handler reads the whole request body
        let request_body: Arc<Mutex<Option<Bytes>>> = Arc::new(Mutex::new(None));
        if shared.capture_request_body {
            let slot = request_body.clone();
            let body = std::mem::replace(request.body_mut(), Body::empty());
            *request.body_mut() = Body::new(CaptureBody::new(body, move |captured| {
                if let (Ok(bytes), Ok(mut guard)) = (captured, slot.lock()) {
                    *guard = Some(bytes);
                }
            }));
        }

        let future = self.inner.call(request);

        Box::pin(async move {
            let mut response = match future.await {
                Ok(response) => response,
                Err(e) => return Err(e),
            };

            let error = upstream_error.or_else(|| {
                shared
                    .error_aware
                    .then(|| response.extensions().get::<UpstreamError>().cloned())
                    .flatten()
            });
            let response_snapshot = ResponseSnapshot::from_response(&response);
            let capture_response_body = shared.capture_response_body;

            let on_complete = move |captured: Result<Bytes, BodyCaptureError>| {
                let body = match captured {
                    Ok(body) => body,
                    Err(BodyCaptureError::Aborted) => {
                        debug!(
                            req_id = ?request_id,
                            "Response aborted before completion, nothing logged"
                        );
                        return;
                    }
                    Err(e) => {
                        error!(req_id = ?request_id, error = %e, "Error capturing response body");
                        return;
                    }
                };

                let captured_request = request_body.lock().ok().and_then(|mut slot| slot.take());
                snapshot.attach_body(captured_request);

                if let Err(e) = shared.assembler.assemble(
                    &timing,
                    snapshot,
                    response_snapshot,
                    capture_response_body.then_some(body),
                    request_id.as_ref(),
                    error.as_ref(),
                ) {
                    error!(req_id = ?request_id, error = %e, "Failed to emit request log record");
                }
            };

            let body = std::mem::replace(response.body_mut(), Body::empty());
            let capture = CaptureBody::new(body, on_complete);
            let capture = if capture_response_body {
                capture
            } else {
                capture.discard_chunks()
            };
            // Bodiless responses are discarded unpolled by the router or the server
            let capture = if body_on_wire(&method, response.status()) {
                capture
            } else {
                capture.complete_on_drop()
            };
            *response.body_mut() = Body::new(capture);
            debug!("Response body wrapped for capture");

            Ok(response)
        })
    }
}
