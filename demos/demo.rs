use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use reqtap::{
    LogSink, MultiSink, RequestId, RequestLoggerConfig, RequestLoggerLayer, Severity,
    TracingSink, UpstreamError,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sink that counts records per severity, for the `/stats` endpoint
#[derive(Debug, Clone, Default)]
struct StatsSink {
    counts: Arc<Mutex<HashMap<&'static str, u64>>>,
    slowest_ms: Arc<Mutex<f64>>,
}

#[derive(Debug, Serialize)]
struct Stats {
    by_severity: HashMap<&'static str, u64>,
    slowest_ms: f64,
}

impl StatsSink {
    fn snapshot(&self) -> Stats {
        Stats {
            by_severity: self.counts.lock().unwrap().clone(),
            slowest_ms: *self.slowest_ms.lock().unwrap(),
        }
    }
}

impl LogSink for StatsSink {
    fn emit(&self, _req_id: Option<&RequestId>, severity: Severity, record: &Value) {
        *self
            .counts
            .lock()
            .unwrap()
            .entry(severity.as_str())
            .or_insert(0) += 1;

        if let Some(ms) = record["response-time"].as_f64() {
            let mut slowest = self.slowest_ms.lock().unwrap();
            if ms > *slowest {
                *slowest = ms;
            }
        }
    }
}

// Test handlers for our demo server
async fn hello_handler(Extension(id): Extension<RequestId>) -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    format!("Hello, World! (request {id})")
}

async fn login_handler(Json(body): Json<Value>) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await;
    let user = body["user"].as_str().unwrap_or("anonymous").to_owned();
    Json(serde_json::json!({ "welcome": user }))
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn missing_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "nothing here")
}

async fn broken_handler() -> Response {
    let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "inventory service down");
    let mut response = (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
    response
        .extensions_mut()
        .insert(UpstreamError::from_error("InventoryError", &err));
    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing: JSON lines so req_id appears alongside each record
    tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,reqtap=debug".into()),
        )
        .init();

    info!("Starting request logging demo server");

    let stats = StatsSink::default();
    let stats_for_route = stats.clone();

    let config = RequestLoggerConfig {
        include_raw_exchange: false,
        ..Default::default()
    };
    let sink = MultiSink::new().with(TracingSink).with(stats);

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/login", post(login_handler))
        .route("/streaming", get(streaming_handler))
        .route("/missing", get(missing_handler))
        .route("/broken", get(broken_handler))
        .route(
            "/stats",
            get(move || {
                let stats = stats_for_route.clone();
                async move { Json(stats.snapshot()) }
            }),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestLoggerLayer::new(config, sink).error_aware())
                .into_inner(),
        );

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting");
    info!("  POST /login      - JSON body with a password that is redacted in the log");
    info!("  GET  /streaming  - Streaming response, logged once");
    info!("  GET  /missing    - 404, logged as warn");
    info!("  GET  /broken     - 502 with an upstream error, logged as error");
    info!("  GET  /stats      - Records per severity");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello");
    info!(r#"  curl --json '{{"user":"ada","password":"s3cret"}}' http://localhost:3000/login"#);
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/stats");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(listener, app).await?;

    Ok(())
}
