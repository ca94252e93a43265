//! # Trace Export Demo
//!
//! Drives both exporters end to end:
//!
//! 1. **Push mode** against a simulated collector with random latency and a
//!    configurable failure rate. Shows threshold flushes, bounded concurrent
//!    deliveries, drop accounting and sampling-rate feedback.
//! 2. **Log mode** writing JSON payloads to an in-memory log stream. Shows
//!    trace splitting at the 256 KiB payload limit.
//!
//! ## Running
//!
//! ```bash
//! # Quick mode
//! cargo run -p trace_export --features demo --bin demo --release -- --quick
//!
//! # With exporter debug logs
//! RUST_LOG=trace_export=debug cargo run -p trace_export --features demo --bin demo
//! ```

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use trace_export::metrics::{
    DECODE_ERROR, FLUSH_BYTES, FLUSH_DURATION, FLUSH_TRACES, FLUSH_TRIGGERED, TRACES_DROPPED,
};
use trace_export::{
    ExportMode, ExporterBuilder, ExporterConfig, InMemoryMetrics, LogSink, Payload, PushConfig,
    RateTable, Span, TraceExporter, Transport, TransportError, LOG_PAYLOAD_LIMIT,
};
use tracing_subscriber::EnvFilter;

// =============================================================================
// SIMULATED COLLECTOR
// =============================================================================

/// Collector stand-in with random latency and failures.
struct SimulatedCollector {
    failure_rate: f64,
    max_latency: Duration,
    sends: AtomicU64,
    failures: AtomicU64,
}

impl SimulatedCollector {
    fn new(failure_rate: f64, max_latency: Duration) -> Self {
        Self {
            failure_rate,
            max_latency,
            sends: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

impl Transport for SimulatedCollector {
    async fn send(&self, payload: Payload) -> Result<Vec<u8>, TransportError> {
        self.sends.fetch_add(1, Ordering::Relaxed);
        let (latency, fail) = {
            let mut rng = rand::thread_rng();
            let max = self.max_latency.as_millis() as u64;
            (
                Duration::from_millis(rng.gen_range(0..=max)),
                rng.gen_bool(self.failure_rate),
            )
        };
        tokio::time::sleep(latency).await;

        if fail {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Io(format!(
                "connection reset after {} bytes",
                payload.len()
            )));
        }
        Ok(br#"{"rate_by_service":{"service:checkout,env:demo":0.75,"service:,env:":1}}"#.to_vec())
    }

    fn name(&self) -> &str {
        "simulated-collector"
    }
}

/// Log stream stand-in that keeps payload sizes.
#[derive(Default)]
struct CapturedLog {
    lines: Mutex<Vec<usize>>,
}

impl LogSink for CapturedLog {
    fn write(&self, payload: &[u8]) {
        self.lines.lock().unwrap().push(payload.len());
    }
}

// =============================================================================
// TRACE GENERATION
// =============================================================================

fn generate_trace(trace_id: u64, spans: u64, tag_bytes: usize) -> Vec<Span> {
    let mut rng = rand::thread_rng();
    (0..spans)
        .map(|i| {
            let parent = if i == 0 { 0 } else { trace_id << 16 | i };
            Span::new(trace_id, trace_id << 16 | (i + 1), parent, "http.request")
                .with_resource(format!("GET /cart/{}", rng.gen_range(1..100)))
                .with_service("checkout")
                .with_error(i32::from(rng.gen_bool(0.1)))
                .with_meta("payload", "x".repeat(tag_bytes))
                .with_metric("_sampling_priority_v1", 1.0)
                .with_timing(
                    1_700_000_000_000_000_000,
                    Duration::from_micros(rng.gen_range(10..5_000)),
                )
        })
        .collect()
}

// =============================================================================
// MAIN APPLICATION
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let quick = std::env::args().any(|a| a == "--quick");
    let traces = if quick { 200 } else { 2_000 };

    println!("Trace Export Demo ({} traces)\n", traces);

    // =========================================================================
    // PHASE 1: Push mode
    // =========================================================================

    println!("Phase 1: push mode");

    let collector = Arc::new(SimulatedCollector::new(0.1, Duration::from_millis(20)));
    let rates = Arc::new(RateTable::new());
    let metrics = Arc::new(InMemoryMetrics::new());
    let config = ExporterConfig::default().with_mode(ExportMode::Push).with_push(
        PushConfig::default()
            .with_payload_size_limit(64 * 1024)
            .with_concurrency_limit(4),
    );

    let mut exporter = ExporterBuilder::new(config)
        .with_transport(collector.clone())
        .with_rate_feedback(rates.clone())
        .with_metrics(metrics.clone())
        .build()?;

    let start = Instant::now();
    for trace_id in 1..=traces {
        exporter.accept(&generate_trace(trace_id, 8, 64)).await;
    }
    exporter.flush().await;
    exporter.stop().await;
    let elapsed = start.elapsed();

    let flushes = metrics.timings(FLUSH_DURATION);
    println!("   elapsed:            {:?}", elapsed);
    println!("   deliveries:         {}", collector.sends.load(Ordering::Relaxed));
    println!("   size flushes:       {}", metrics.counter_total(FLUSH_TRIGGERED));
    println!("   traces delivered:   {}", metrics.counter(FLUSH_TRACES, &[]));
    println!("   bytes delivered:    {}", metrics.counter(FLUSH_BYTES, &[]));
    println!("   traces dropped:     {}", metrics.counter_total(TRACES_DROPPED));
    println!("   failed deliveries:  {}", collector.failures.load(Ordering::Relaxed));
    println!("   decode errors:      {}", metrics.counter(DECODE_ERROR, &[]));
    if let Some(max) = flushes.iter().max() {
        println!("   slowest delivery:   {:?}", max);
    }
    println!("   checkout rate:      {:?}", rates.rate_for("checkout", "demo"));
    println!();

    // =========================================================================
    // PHASE 2: Log mode
    // =========================================================================

    println!("Phase 2: log mode");

    let log = Arc::new(CapturedLog::default());
    let log_metrics = Arc::new(InMemoryMetrics::new());
    let mut exporter = ExporterBuilder::new(ExporterConfig::default().with_mode(ExportMode::Log))
        .with_log_sink(log.clone())
        .with_metrics(log_metrics.clone())
        .build()?;

    // A handful of regular traces, one that needs splitting, one that can't fit at all.
    for trace_id in 1..=10 {
        exporter.accept(&generate_trace(trace_id, 5, 256)).await;
    }
    exporter.accept(&generate_trace(11, 40, 10 * 1024)).await;
    exporter.accept(&generate_trace(12, 1, LOG_PAYLOAD_LIMIT)).await;
    exporter.flush().await;
    exporter.stop().await;

    let lines = log.lines.lock().unwrap().clone();
    println!("   log lines written:  {}", lines.len());
    println!(
        "   largest line:       {} bytes (limit {})",
        lines.iter().max().unwrap_or(&0),
        LOG_PAYLOAD_LIMIT
    );
    println!("   traces dropped:     {}", log_metrics.counter_total(TRACES_DROPPED));

    Ok(())
}
