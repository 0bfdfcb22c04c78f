//! Correlation identifiers.
//!
//! Each request gets a fresh identifier from an [`IdGenerator`]. The
//! middleware stores it in the request extensions as a [`RequestId`] so
//! handlers can read it, and attaches it to the log record as `req_id`.

use std::fmt;
use uuid::Uuid;

/// Correlation identifier of the request currently being served.
///
/// ```rust
/// use axum::Extension;
/// use reqtap::RequestId;
///
/// async fn handler(Extension(id): Extension<RequestId>) -> String {
///     format!("your request id is {id}")
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Produces one identifier per request.
///
/// Returning `None` is allowed: the exchange is then logged without a
/// correlation scope.
pub trait IdGenerator: Send + Sync + 'static {
    fn generate(&self) -> Option<String>;
}

impl<F> IdGenerator for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn generate(&self) -> Option<String> {
        self()
    }
}

/// Random (v4) UUIDs, rendered hyphenated.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Option<String> {
        Some(Uuid::new_v4().to_string())
    }
}
