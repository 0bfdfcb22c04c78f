//! Default sink built on `tracing`.
//!
//! This module provides [`TracingSink`], which emits every record as a
//! `tracing` event on the `reqtap::access` target. The correlation id is
//! carried by a surrounding `request` span, so a subscriber that prints span
//! fields (the JSON formatter of `tracing-subscriber`, for instance) attaches
//! `req_id` to the record.

use serde_json::Value;
use tracing::{error, info, info_span, warn, Span};

use crate::{LogSink, RequestId, Severity};

/// Sink emitting records as `tracing` events.
///
/// [`Severity`] maps to the `tracing` level of the same name. The record is
/// recorded in the `record` field as JSON text.
///
/// # Examples
///
/// ```rust,no_run
/// use reqtap::{request_logger, TracingSink};
///
/// # #[tokio::main]
/// # async fn main() {
/// let layer = request_logger(TracingSink);
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, req_id: Option<&RequestId>, severity: Severity, record: &Value) {
        let span = match req_id {
            Some(req_id) => info_span!("request", req_id = %req_id),
            None => Span::none(),
        };
        let _entered = span.enter();

        let method = record.get("method").and_then(Value::as_str).unwrap_or("-");
        let url = record.get("url").and_then(Value::as_str).unwrap_or("-");
        let status = record.get("status-code").and_then(Value::as_u64).unwrap_or(0);

        match severity {
            Severity::Info => {
                info!(
                    target: "reqtap::access",
                    %method,
                    %url,
                    status,
                    record = %record,
                    "request completed"
                )
            }
            Severity::Warn => {
                warn!(
                    target: "reqtap::access",
                    %method,
                    %url,
                    status,
                    record = %record,
                    "request completed"
                )
            }
            Severity::Error => {
                error!(
                    target: "reqtap::access",
                    %method,
                    %url,
                    status,
                    record = %record,
                    "request completed"
                )
            }
        }
    }
}
