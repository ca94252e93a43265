//! Log Exporter - traces as size-bounded JSON log lines
//!
//! For environments without a collector next to the process. Each flush
//! writes one JSON object to the log sink:
//!
//! ```text
//! {"traces": [[{span}, {span}], [{span}]]}
//! ```
//!
//! No payload ever exceeds [`LOG_PAYLOAD_LIMIT`]. A trace that does not fit
//! in the current payload is split at span boundaries: the spans that fit
//! are closed as one trace array, the payload is flushed, and the rest
//! continues as a new trace array in the next payload. The pieces share the
//! trace id and nothing else links them.
//!
//! Everything runs on the caller's thread, including the sink write.

use crate::buffer::{AppendBuffer, Mark};
use crate::error::{DropReason, EncodingError};
use crate::exporter::TraceExporter;
use crate::metrics::{self, MetricsSink};
use crate::span::Span;
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;

/// Hard ceiling for one flushed payload (a single log line).
pub const LOG_PAYLOAD_LIMIT: usize = 256 * 1024;

const BATCH_OPEN: &[u8] = br#"{"traces": ["#;
const BATCH_CLOSE: &[u8] = b"]}";
/// Bytes still owed after the last span: the trace array close plus the batch close.
const CLOSING_LEN: usize = 1 + BATCH_CLOSE.len();

/// Destination for flushed log payloads.
pub trait LogSink: Send + Sync {
    /// Writes one complete payload. Assumed to succeed.
    fn write(&self, payload: &[u8]);
}

/// Writes each payload as one line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for StdoutSink {
    fn write(&self, payload: &[u8]) {
        let mut out = io::stdout().lock();
        if let Err(e) = write_line(&mut out, payload) {
            tracing::warn!(error = %e, bytes = payload.len(), "failed to write trace payload");
        }
    }
}

fn write_line(out: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    out.write_all(payload)?;
    out.write_all(b"\n")?;
    out.flush()
}

/// Span id rendered as a lowercase hex string.
struct HexId(u64);

impl Serialize for HexId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:x}", self.0))
    }
}

#[derive(Serialize)]
struct JsonSpan<'a> {
    trace_id: HexId,
    span_id: HexId,
    parent_id: HexId,
    name: &'a str,
    resource: &'a str,
    error: i32,
    meta: &'a HashMap<String, String>,
    #[serde(serialize_with = "finite_metrics")]
    metrics: &'a HashMap<String, f64>,
    start: i64,
    duration: i64,
    service: &'a str,
}

impl<'a> From<&'a Span> for JsonSpan<'a> {
    fn from(span: &'a Span) -> Self {
        Self {
            trace_id: HexId(span.trace_id),
            span_id: HexId(span.span_id),
            parent_id: HexId(span.parent_id),
            name: &span.name,
            resource: &span.resource,
            error: span.error,
            meta: &span.meta,
            metrics: &span.metrics,
            start: span.start,
            duration: span.duration,
            service: &span.service,
        }
    }
}

/// JSON has no NaN or infinity; refuse instead of silently writing `null`.
fn finite_metrics<S: Serializer>(
    metrics: &&HashMap<String, f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if let Some((key, value)) = metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(S::Error::custom(format!(
            "numeric tag {:?} is not finite ({})",
            key, value
        )));
    }
    metrics.serialize(serializer)
}

/// The open JSON batch: `{"traces": [` followed by closed trace arrays.
struct LogBatch {
    buf: AppendBuffer,
    has_traces: bool,
}

impl LogBatch {
    fn new() -> Self {
        let mut batch = Self {
            buf: AppendBuffer::with_capacity(LOG_PAYLOAD_LIMIT),
            has_traces: false,
        };
        batch.reset();
        batch
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.buf.extend(BATCH_OPEN);
        self.has_traces = false;
    }

    fn fits(&self) -> bool {
        self.buf.len() + CLOSING_LEN <= LOG_PAYLOAD_LIMIT
    }

    /// Writes as many leading spans of `spans` as fit into one new trace
    /// array and returns how many were written.
    ///
    /// Zero means nothing fit next to the traces already in the batch; the
    /// batch is left untouched so the caller can flush and retry.
    fn append_trace(&mut self, spans: &[Span]) -> Result<usize, EncodingError> {
        let trace_start = self.buf.mark();
        let open: &[u8] = if self.has_traces { b", [" } else { b"[" };
        self.buf.extend(open);

        let mut written = 0;
        for (i, span) in spans.iter().enumerate() {
            let span_start = self.buf.mark();
            if i != 0 {
                self.buf.push(b',');
            }
            if let Err(e) = serde_json::to_writer(&mut self.buf, &JsonSpan::from(span)) {
                self.buf.rollback(trace_start);
                return Err(EncodingError::new(DropReason::EncodingFailed, e));
            }
            if !self.fits() {
                if i == 0 && !self.has_traces {
                    // Alone in an empty payload and still too big.
                    let size = self.buf.written_since(span_start);
                    self.buf.rollback(trace_start);
                    return Err(EncodingError::too_large(size, LOG_PAYLOAD_LIMIT));
                }
                self.buf.rollback(span_start);
                break;
            }
            written += 1;
        }

        if written == 0 {
            self.buf.rollback(trace_start);
            return Ok(0);
        }
        self.buf.push(b']');
        self.has_traces = true;
        debug_assert!(
            self.buf.len() + BATCH_CLOSE.len() <= LOG_PAYLOAD_LIMIT,
            "batch of {} bytes cannot be closed within the payload limit",
            self.buf.len()
        );
        Ok(written)
    }

    /// Closes the batch and returns the finished payload.
    fn close(&mut self) -> &[u8] {
        self.buf.extend(BATCH_CLOSE);
        self.buf.as_bytes()
    }

    fn mark(&self) -> Mark {
        self.buf.mark()
    }
}

/// Exporter writing traces as JSON payloads to a log sink.
pub struct LogExporter {
    batch: LogBatch,
    sink: Arc<dyn LogSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl LogExporter {
    pub fn new(sink: Arc<dyn LogSink>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            batch: LogBatch::new(),
            sink,
            metrics,
        }
    }

    /// Exporter writing to stdout.
    pub fn stdout(metrics: Arc<dyn MetricsSink>) -> Self {
        Self::new(Arc::new(StdoutSink::new()), metrics)
    }

    /// Adds a trace, flushing as often as needed to fit all of its spans.
    ///
    /// A span that does not fit even in an empty payload drops the rest of
    /// the trace with reason `trace_too_large`; a span that cannot be
    /// encoded drops it with reason `encoding_failed`.
    pub fn push_trace(&mut self, trace: &[Span]) {
        let mut remaining = trace;
        while !remaining.is_empty() {
            match self.batch.append_trace(remaining) {
                Ok(written) => {
                    remaining = &remaining[written..];
                    if !remaining.is_empty() {
                        self.flush_batch();
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, spans = remaining.len(), "lost a trace");
                    self.metrics
                        .increment(metrics::TRACES_DROPPED, &[err.reason().tag()], 1);
                    return;
                }
            }
        }
    }

    /// Writes the pending batch as one payload; no-op when nothing is pending.
    pub fn flush_batch(&mut self) {
        if !self.batch.has_traces {
            return;
        }
        let payload = self.batch.close();
        tracing::debug!(bytes = payload.len(), "writing trace payload");
        self.sink.write(payload);
        self.batch.reset();
    }

    /// Bytes in the open batch, including the `{"traces": [` prefix.
    pub fn pending_bytes(&self) -> usize {
        self.batch.mark().offset()
    }

    /// Whether any trace is waiting for a flush
    pub fn has_traces(&self) -> bool {
        self.batch.has_traces
    }
}

impl TraceExporter for LogExporter {
    async fn accept(&mut self, trace: &[Span]) {
        self.push_trace(trace);
    }

    async fn flush(&mut self) {
        self.flush_batch();
    }

    /// Nothing is ever in flight.
    async fn stop(&mut self) {}

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetrics;
    use serde_json::Value;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    impl MemorySink {
        fn payloads(&self) -> Vec<Vec<u8>> {
            self.payloads.lock().unwrap().clone()
        }

        /// Every written payload parsed, as its list of trace arrays.
        fn traces(&self) -> Vec<Vec<Vec<Value>>> {
            self.payloads()
                .iter()
                .map(|p| {
                    let v: Value = serde_json::from_slice(p).unwrap();
                    v["traces"]
                        .as_array()
                        .unwrap()
                        .iter()
                        .map(|t| t.as_array().unwrap().clone())
                        .collect()
                })
                .collect()
        }
    }

    impl LogSink for MemorySink {
        fn write(&self, payload: &[u8]) {
            self.payloads.lock().unwrap().push(payload.to_vec());
        }
    }

    fn setup() -> (LogExporter, Arc<MemorySink>, Arc<InMemoryMetrics>) {
        let sink = Arc::new(MemorySink::default());
        let metrics = Arc::new(InMemoryMetrics::new());
        let exporter = LogExporter::new(sink.clone(), metrics.clone());
        (exporter, sink, metrics)
    }

    /// A span whose `meta` carries roughly `padding` bytes.
    fn padded_span(trace_id: u64, span_id: u64, padding: usize) -> Span {
        Span::new(trace_id, span_id, 0, "op").with_meta("pad", "p".repeat(padding))
    }

    #[test]
    fn test_flush_empty_is_noop() {
        let (mut exporter, sink, metrics) = setup();
        exporter.flush_batch();
        assert!(sink.payloads().is_empty());
        assert!(metrics.is_empty());
        assert_eq!(exporter.pending_bytes(), BATCH_OPEN.len());
    }

    #[test]
    fn test_three_small_spans_single_payload() {
        let (mut exporter, sink, _) = setup();
        let trace: Vec<Span> = (1..=3).map(|i| padded_span(1, i, 1024)).collect();

        exporter.push_trace(&trace);
        assert!(sink.payloads().is_empty());
        exporter.flush_batch();

        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].len(), 1);
        assert_eq!(traces[0][0].len(), 3);
        assert!(!exporter.has_traces());
        assert_eq!(exporter.pending_bytes(), BATCH_OPEN.len());
    }

    #[test]
    fn test_span_schema_uses_hex_ids() {
        let (mut exporter, sink, _) = setup();
        let span = Span::new(255, 4096, 10, "db.query")
            .with_resource("SELECT 1")
            .with_service("billing")
            .with_error(1)
            .with_meta("db.type", "postgres")
            .with_metric("rows", 3.0)
            .with_timing(1_700_000_000, std::time::Duration::from_nanos(42));

        exporter.push_trace(&[span]);
        exporter.flush_batch();

        let payload = &sink.payloads()[0];
        assert!(payload.starts_with(
            br#"{"traces": [[{"trace_id":"ff","span_id":"1000","parent_id":"a","#
        ));
        let s = &sink.traces()[0][0][0];
        assert_eq!(s["name"], "db.query");
        assert_eq!(s["resource"], "SELECT 1");
        assert_eq!(s["service"], "billing");
        assert_eq!(s["error"], 1);
        assert_eq!(s["meta"]["db.type"], "postgres");
        assert_eq!(s["metrics"]["rows"], 3.0);
        assert_eq!(s["start"], 1_700_000_000_i64);
        assert_eq!(s["duration"], 42);
    }

    #[test]
    fn test_multiple_traces_share_payload() {
        let (mut exporter, sink, _) = setup();
        exporter.push_trace(&[padded_span(1, 1, 10)]);
        exporter.push_trace(&[padded_span(2, 1, 10), padded_span(2, 2, 10)]);
        exporter.flush_batch();

        let payload = String::from_utf8(sink.payloads()[0].clone()).unwrap();
        assert!(payload.contains("}], [{"));
        let traces = sink.traces();
        assert_eq!(traces[0].len(), 2);
        assert_eq!(traces[0][1].len(), 2);
    }

    #[test]
    fn test_large_trace_split_across_payloads() {
        let (mut exporter, sink, metrics) = setup();
        // ~300 KiB in 30 spans
        let trace: Vec<Span> = (1..=30).map(|i| padded_span(9, i, 10 * 1024)).collect();

        exporter.push_trace(&trace);
        assert!(!sink.payloads().is_empty(), "accept must flush at least once");
        exporter.flush_batch();

        let payloads = sink.payloads();
        assert!(payloads.len() >= 2);
        assert!(payloads.iter().all(|p| p.len() <= LOG_PAYLOAD_LIMIT));

        let span_ids: Vec<String> = sink
            .traces()
            .into_iter()
            .flatten()
            .flatten()
            .map(|s| s["span_id"].as_str().unwrap().to_string())
            .collect();
        let expected: Vec<String> = (1..=30u64).map(|i| format!("{:x}", i)).collect();
        assert_eq!(span_ids, expected);
        assert_eq!(metrics.counter_total(metrics::TRACES_DROPPED), 0);
    }

    #[test]
    fn test_oversized_first_span_dropped() {
        let (mut exporter, sink, metrics) = setup();
        let before = exporter.pending_bytes();

        exporter.push_trace(&[padded_span(1, 1, LOG_PAYLOAD_LIMIT), padded_span(1, 2, 10)]);

        assert_eq!(exporter.pending_bytes(), before);
        assert!(!exporter.has_traces());
        assert!(sink.payloads().is_empty());
        assert_eq!(
            metrics.counter(metrics::TRACES_DROPPED, &[DropReason::TraceTooLarge.tag()]),
            1
        );
    }

    #[test]
    fn test_no_room_flushes_before_next_trace() {
        let (mut exporter, sink, _) = setup();
        exporter.push_trace(&[padded_span(1, 1, 200 * 1024)]);
        exporter.push_trace(&[padded_span(2, 1, 100 * 1024)]);

        // The first trace went out alone, without an empty trace array.
        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].len(), 1);
        assert_eq!(traces[0][0][0]["trace_id"], "1");

        exporter.flush_batch();
        let traces = sink.traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1][0][0]["trace_id"], "2");
    }

    #[test]
    fn test_non_finite_metric_is_encoding_failure() {
        let (mut exporter, sink, metrics) = setup();
        exporter.push_trace(&[padded_span(1, 1, 10)]);
        let before = exporter.pending_bytes();

        let bad = vec![
            padded_span(2, 1, 10),
            Span::new(2, 2, 1, "op").with_metric("ratio", f64::NAN),
        ];
        exporter.push_trace(&bad);

        assert_eq!(exporter.pending_bytes(), before);
        assert_eq!(
            metrics.counter(metrics::TRACES_DROPPED, &[DropReason::EncodingFailed.tag()]),
            1
        );

        exporter.flush_batch();
        assert_eq!(sink.traces()[0].len(), 1);
    }

    #[tokio::test]
    async fn test_trait_methods_delegate() {
        let (mut exporter, sink, _) = setup();
        exporter.accept(&[padded_span(1, 1, 10)]).await;
        exporter.stop().await;
        assert!(sink.payloads().is_empty());

        exporter.flush().await;
        assert_eq!(sink.payloads().len(), 1);
        assert_eq!(TraceExporter::name(&exporter), "log");
    }

    #[test]
    fn test_write_line_appends_newline() {
        let mut out = Vec::new();
        write_line(&mut out, br#"{"traces": []}"#).unwrap();
        assert_eq!(out, b"{\"traces\": []}\n");
    }
}
