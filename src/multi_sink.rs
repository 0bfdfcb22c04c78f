//! Composite sink for combining multiple log sinks.
//!
//! This module provides [`MultiSink`], which fans every record out to an
//! arbitrary number of [`LogSink`] implementations, in the order they were
//! added.
//!
//! # Example
//!
//! ```rust
//! use reqtap::{MultiSink, TracingSink};
//!
//! let sink = MultiSink::new().with(TracingSink);
//!
//! // let layer = reqtap::request_logger(sink);
//! ```

use serde_json::Value;
use std::sync::Arc;

use crate::{sink::dispatch, LogSink, RequestId, Severity};

/// A sink that delegates to multiple inner sinks.
///
/// Each inner sink applies its own level fallback, so a sink without a
/// `warn` operation still receives warnings at info.
#[derive(Clone, Default)]
pub struct MultiSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a sink to the chain. Returns self for builder pattern.
    pub fn with<S: LogSink>(mut self, sink: S) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl LogSink for MultiSink {
    fn emit(&self, req_id: Option<&RequestId>, severity: Severity, record: &Value) {
        for sink in &self.sinks {
            dispatch(sink.as_ref(), req_id, severity, record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Test sink that keeps what it receives
    #[derive(Default)]
    struct CapturingSink {
        received: Mutex<Vec<(Option<String>, Severity, Value)>>,
        supports_warn: bool,
    }

    impl LogSink for CapturingSink {
        fn has_level(&self, severity: Severity) -> bool {
            severity != Severity::Warn || self.supports_warn
        }

        fn emit(&self, req_id: Option<&RequestId>, severity: Severity, record: &Value) {
            self.received.lock().unwrap().push((
                req_id.map(|id| id.to_string()),
                severity,
                record.clone(),
            ));
        }
    }

    #[test]
    fn test_multi_sink_empty() {
        let sink = MultiSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.len(), 0);

        // Should not panic with no sinks
        sink.emit(None, Severity::Error, &json!({}));
    }

    #[test]
    fn test_multi_sink_fans_out() {
        let first = Arc::new(CapturingSink {
            supports_warn: true,
            ..Default::default()
        });
        let second = Arc::new(CapturingSink::default());

        let sink = MultiSink::new().with(first.clone()).with(second.clone());
        assert_eq!(sink.len(), 2);

        let id = RequestId::new("abc");
        sink.emit(Some(&id), Severity::Warn, &json!({ "status-code": 404 }));

        let first = first.received.lock().unwrap();
        let second = second.received.lock().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);

        assert_eq!(first[0].0.as_deref(), Some("abc"));
        assert_eq!(first[0].1, Severity::Warn);
        // second sink has no warn operation
        assert_eq!(second[0].1, Severity::Info);
        assert_eq!(second[0].2, json!({ "status-code": 404 }));
    }
}
