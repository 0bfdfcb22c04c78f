//! Assembly of the per-request log record.
//!
//! Once a response body has been fully written, the middleware hands the two
//! snapshots, the captured body, the timing and any upstream error to an
//! [`Assembler`]. It builds a [`LogRecord`], redacts it, classifies the
//! exchange and emits it through the configured [`LogSink`].

use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::{
    redact::SensitiveFields,
    sink::dispatch,
    types::{Elapsed, RequestSnapshot, ResponseSnapshot, Timing},
    LogSink, RequestId, Severity, UpstreamError, UserAgentParser,
};

/// Direction marker of response-phase records.
pub const OUTGOING: &str = "<--";

/// Request body field carrying a JSON document encoded as a string.
pub const VARIABLES_FIELD: &str = "variables";

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("Failed to serialize log record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One exchange, as handed to the sink (before redaction).
///
/// Field names are fixed for downstream log consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogRecord {
    pub remote_address: String,
    pub ip: String,
    pub method: String,
    pub url: String,
    pub referer: String,
    pub user_agent: Value,
    pub body: Value,
    pub http_version: String,
    /// Milliseconds.
    pub response_time: f64,
    /// `[seconds, nanoseconds]`.
    pub response_hrtime: (u64, u32),
    pub status_code: u16,
    pub req_headers: Map<String, Value>,
    pub res_headers: Map<String, Value>,
    pub res_body: Option<String>,
    pub incoming: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<UpstreamError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub res: Option<Value>,
}

/// Builds, redacts, classifies and emits log records.
#[derive(Clone)]
pub struct Assembler {
    sink: Arc<dyn LogSink>,
    user_agents: Arc<dyn UserAgentParser>,
    sensitive_fields: SensitiveFields,
    include_raw_exchange: bool,
}

impl Assembler {
    pub fn new(
        sink: Arc<dyn LogSink>,
        user_agents: Arc<dyn UserAgentParser>,
        sensitive_fields: SensitiveFields,
        include_raw_exchange: bool,
    ) -> Self {
        Self {
            sink,
            user_agents,
            sensitive_fields,
            include_raw_exchange,
        }
    }

    /// Build the record for one exchange and emit it.
    ///
    /// `res_body` is `None` when response body capture is disabled.
    pub fn assemble(
        &self,
        timing: &Timing,
        request: RequestSnapshot,
        response: ResponseSnapshot,
        res_body: Option<Bytes>,
        req_id: Option<&RequestId>,
        error: Option<&UpstreamError>,
    ) -> Result<(), AssembleError> {
        let record = self.record(timing.elapsed(), request, response, res_body, error);
        let (severity, record) = self.finalize(record)?;
        dispatch(self.sink.as_ref(), req_id, severity, &record);
        Ok(())
    }

    /// Merge snapshots, timing and error into a record.
    pub fn record(
        &self,
        elapsed: Elapsed,
        request: RequestSnapshot,
        response: ResponseSnapshot,
        res_body: Option<Bytes>,
        error: Option<&UpstreamError>,
    ) -> LogRecord {
        let ip = request.remote_addr.resolve().to_string();
        let user_agent = match request.user_agent {
            Some(raw) => self.user_agents.parse(&raw).unwrap_or(Value::String(raw)),
            None => Value::Null,
        };

        let (req, res) = if self.include_raw_exchange {
            (
                Some(json!({
                    "method": request.method,
                    "url": request.url,
                    "httpVersion": request.http_version,
                    "headers": request.headers,
                    "remoteAddress": ip,
                })),
                Some(json!({
                    "statusCode": response.status,
                    "headers": response.headers,
                })),
            )
        } else {
            (None, None)
        };

        let mut body = request.body;
        decode_variables(&mut body);

        LogRecord {
            remote_address: ip.clone(),
            ip,
            method: request.method,
            url: request.url,
            referer: request.referer,
            user_agent,
            body,
            http_version: request.http_version,
            response_time: elapsed.as_millis_f64(),
            response_hrtime: elapsed.hrtime(),
            status_code: response.status,
            req_headers: request.headers,
            res_headers: response.headers,
            res_body: res_body.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            incoming: OUTGOING,
            err: error.cloned(),
            req,
            res,
        }
    }

    /// Classify the record and turn it into its redacted JSON form.
    ///
    /// Redaction runs on the fully merged record, after everything else. A
    /// JSON response body is redacted too and kept as text.
    pub fn finalize(&self, record: LogRecord) -> Result<(Severity, Value), AssembleError> {
        let severity = Severity::classify(record.status_code, record.err.is_some());
        let mut value = serde_json::to_value(&record)?;
        self.sensitive_fields.redact(&mut value);
        if let Some(Value::String(res_body)) = value.get_mut("res-body") {
            if let Some(redacted) = self.sensitive_fields.redact_text(res_body) {
                *res_body = redacted;
            }
        }
        Ok((severity, value))
    }
}

/// Parse a JSON-encoded `variables` string in a request body in place.
///
/// A value that does not parse is dropped from the body. Non-string values
/// are left alone.
pub fn decode_variables(body: &mut Value) {
    let Some(fields) = body.as_object_mut() else {
        return;
    };
    let Some(Value::String(encoded)) = fields.get(VARIABLES_FIELD) else {
        return;
    };
    match serde_json::from_str::<Value>(encoded) {
        Ok(decoded) => {
            fields.insert(VARIABLES_FIELD.to_owned(), decoded);
        }
        Err(_) => {
            fields.remove(VARIABLES_FIELD);
        }
    }
}
