//! Property tests for the log exporter's payload bound and span ordering.

use proptest::prelude::*;
use std::sync::{Arc, Mutex};
use trace_export::{InMemoryMetrics, LogExporter, LogSink, Span, LOG_PAYLOAD_LIMIT};

#[derive(Default)]
struct MemorySink {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl LogSink for MemorySink {
    fn write(&self, payload: &[u8]) {
        self.payloads.lock().unwrap().push(payload.to_vec());
    }
}

/// (trace_id, span_id) of every span written, in write order.
fn written_spans(sink: &MemorySink) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for payload in sink.payloads.lock().unwrap().iter() {
        let value: serde_json::Value = serde_json::from_slice(payload).unwrap();
        for trace in value["traces"].as_array().unwrap() {
            let spans = trace.as_array().unwrap();
            assert!(!spans.is_empty(), "empty trace array in payload");
            for span in spans {
                out.push((
                    span["trace_id"].as_str().unwrap().to_string(),
                    span["span_id"].as_str().unwrap().to_string(),
                ));
            }
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Traces of spans up to 64 KiB each: nothing is dropped, no payload
    /// exceeds the limit, and spans come out in the order they went in.
    #[test]
    fn prop_payloads_bounded_and_ordered(
        traces in prop::collection::vec(
            prop::collection::vec(0usize..64 * 1024, 1..12),
            1..8,
        )
    ) {
        let sink = Arc::new(MemorySink::default());
        let metrics = Arc::new(InMemoryMetrics::new());
        let mut exporter = LogExporter::new(sink.clone(), metrics.clone());

        let mut expected = Vec::new();
        for (t, sizes) in traces.iter().enumerate() {
            let trace_id = t as u64 + 1;
            let trace: Vec<Span> = sizes
                .iter()
                .enumerate()
                .map(|(s, size)| {
                    Span::new(trace_id, s as u64 + 1, 0, "op").with_meta("pad", "x".repeat(*size))
                })
                .collect();
            expected.extend(
                trace
                    .iter()
                    .map(|s| (format!("{:x}", s.trace_id), format!("{:x}", s.span_id))),
            );
            exporter.push_trace(&trace);
        }
        exporter.flush_batch();

        for payload in sink.payloads.lock().unwrap().iter() {
            prop_assert!(payload.len() <= LOG_PAYLOAD_LIMIT);
        }
        prop_assert_eq!(written_spans(&sink), expected);
        prop_assert!(metrics.is_empty());
    }
}
