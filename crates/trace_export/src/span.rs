use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// A single completed span as handed over by instrumentation.
///
/// Exporters only read spans; nothing in this crate mutates one after it
/// has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Span {
    /// Trace identifier shared by every span of one trace
    pub trace_id: u64,
    /// Span identifier
    pub span_id: u64,
    /// Parent span identifier (0 for the root span)
    pub parent_id: u64,
    /// Operation name
    pub name: String,
    /// Resource the operation acted on (endpoint, query, ...)
    pub resource: String,
    /// Service that produced the span
    pub service: String,
    /// Non-zero when the operation failed
    pub error: i32,
    /// String tags
    pub meta: HashMap<String, String>,
    /// Numeric tags
    pub metrics: HashMap<String, f64>,
    /// Start time (Unix nanoseconds)
    pub start: i64,
    /// Duration in nanoseconds
    pub duration: i64,
}

/// An ordered sequence of spans sharing one trace identifier.
pub type Trace = Vec<Span>;

impl Span {
    /// Creates a span starting now with zero duration and no tags.
    pub fn new(trace_id: u64, span_id: u64, parent_id: u64, name: impl Into<String>) -> Self {
        let start = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as i64);

        Self {
            trace_id,
            span_id,
            parent_id,
            name: name.into(),
            resource: String::new(),
            service: String::new(),
            error: 0,
            meta: HashMap::new(),
            metrics: HashMap::new(),
            start,
            duration: 0,
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_error(mut self, error: i32) -> Self {
        self.error = error;
        self
    }

    /// Adds a string tag
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Adds a numeric tag
    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Overrides start time (Unix nanoseconds) and duration.
    pub fn with_timing(mut self, start: i64, duration: Duration) -> Self {
        self.start = start;
        self.duration = duration.as_nanos() as i64;
        self
    }

    /// Returns true for the local root of a trace
    pub fn is_root(&self) -> bool {
        self.parent_id == 0
    }
}
