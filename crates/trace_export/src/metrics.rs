//! Metrics sink abstraction.
//!
//! Exporters report through an injected [`MetricsSink`] instead of a process
//! global client. Sinks are fire-and-forget: they never fail towards the
//! caller.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Traces lost, tagged with a `reason:*` tag
pub const TRACES_DROPPED: &str = "tracer.traces_dropped";
/// Flushes started because the buffer crossed its size threshold
pub const FLUSH_TRIGGERED: &str = "tracer.flush_triggered";
/// Wall time of one delivery task
pub const FLUSH_DURATION: &str = "tracer.flush_duration";
/// Bytes delivered to the collector
pub const FLUSH_BYTES: &str = "tracer.flush_bytes";
/// Traces delivered to the collector
pub const FLUSH_TRACES: &str = "tracer.flush_traces";
/// Collector responses whose rate table could not be applied
pub const DECODE_ERROR: &str = "tracer.decode_error";

/// Tag attached to threshold-triggered flushes.
pub const REASON_SIZE: &str = "reason:size";

/// Destination for exporter counters and timers.
pub trait MetricsSink: Send + Sync {
    /// Adds `value` to the counter `name`.
    fn increment(&self, name: &str, tags: &[&str], value: i64);

    /// Records one timing sample.
    fn timing(&self, name: &str, duration: Duration, tags: &[&str], rate: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _tags: &[&str], _value: i64) {}

    fn timing(&self, _name: &str, _duration: Duration, _tags: &[&str], _rate: f64) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    name: String,
    tags: Vec<String>,
}

impl MetricKey {
    fn new(name: &str, tags: &[&str]) -> Self {
        let mut tags: Vec<String> = tags.iter().map(|t| (*t).to_string()).collect();
        tags.sort_unstable();
        Self {
            name: name.to_string(),
            tags,
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<MetricKey, i64>,
    timings: HashMap<String, Vec<Duration>>,
    events: u64,
}

/// Aggregates metrics in memory.
///
/// Counters are keyed by name plus tag set (tag order does not matter).
/// Useful for tests and for surfacing exporter statistics locally.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<Recorded>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter with exactly this tag set.
    pub fn counter(&self, name: &str, tags: &[&str]) -> i64 {
        let key = MetricKey::new(name, tags);
        self.lock().counters.get(&key).copied().unwrap_or(0)
    }

    /// Sum of a counter over every tag set.
    pub fn counter_total(&self, name: &str) -> i64 {
        self.lock()
            .counters
            .iter()
            .filter(|(k, _)| k.name == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// All timing samples recorded under `name`.
    pub fn timings(&self, name: &str) -> Vec<Duration> {
        self.lock().timings.get(name).cloned().unwrap_or_default()
    }

    /// Number of increment/timing calls received so far.
    pub fn event_count(&self) -> u64 {
        self.lock().events
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        // A panic while holding the lock cannot leave the maps half-updated.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str, tags: &[&str], value: i64) {
        let mut recorded = self.lock();
        recorded.events += 1;
        *recorded.counters.entry(MetricKey::new(name, tags)).or_insert(0) += value;
    }

    fn timing(&self, name: &str, duration: Duration, _tags: &[&str], _rate: f64) {
        let mut recorded = self.lock();
        recorded.events += 1;
        recorded
            .timings
            .entry(name.to_string())
            .or_default()
            .push(duration);
    }
}
