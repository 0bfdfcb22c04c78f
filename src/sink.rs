//! Destination of assembled log records.
//!
//! A [`LogSink`] receives one redacted record per completed request, the
//! [`Severity`] it was classified at, and the request's correlation id (the
//! scope every record of that request is bound to).

use serde_json::Value;
use std::sync::Arc;

use crate::{RequestId, Severity};

/// Trait for emitting assembled request log records.
///
/// # Examples
///
/// ```rust
/// use reqtap::{LogSink, RequestId, Severity};
/// use serde_json::Value;
///
/// #[derive(Debug)]
/// struct StdoutSink;
///
/// impl LogSink for StdoutSink {
///     fn emit(&self, req_id: Option<&RequestId>, severity: Severity, record: &Value) {
///         println!("[{severity}] req_id={req_id:?} {record}");
///     }
/// }
/// ```
pub trait LogSink: Send + Sync + 'static {
    /// Whether this sink has an emission operation for `severity`.
    ///
    /// Records classified at a level the sink does not support are emitted
    /// at [`Severity::Info`] instead.
    fn has_level(&self, severity: Severity) -> bool {
        let _ = severity;
        true
    }

    /// Emit one record. `req_id` is `None` when no identifier was generated.
    fn emit(&self, req_id: Option<&RequestId>, severity: Severity, record: &Value);
}

impl<T: LogSink> LogSink for Arc<T> {
    fn has_level(&self, severity: Severity) -> bool {
        (**self).has_level(severity)
    }

    fn emit(&self, req_id: Option<&RequestId>, severity: Severity, record: &Value) {
        (**self).emit(req_id, severity, record)
    }
}

/// Emit `record` through `sink` at `severity`, or at info when the sink has
/// no operation for that level.
pub fn dispatch(
    sink: &dyn LogSink,
    req_id: Option<&RequestId>,
    severity: Severity,
    record: &Value,
) {
    let severity = if sink.has_level(severity) {
        severity
    } else {
        Severity::Info
    };
    sink.emit(req_id, severity, record);
}
