//! Trace Export
//!
//! The delivery end of a tracing client: completed traces go in, and come
//! out either as batched network payloads for a collector or as
//! size-bounded JSON lines on the process log stream.
//!
//! - [`PushExporter`] encodes traces into a MessagePack [`Buffer`], flushes
//!   at a size threshold, and delivers on spawned tasks gated by a
//!   concurrency limit. Collector responses feed sampling rates back through
//!   [`RateFeedback`].
//! - [`LogExporter`] renders traces as JSON into payloads of at most
//!   [`LOG_PAYLOAD_LIMIT`] bytes, splitting traces at span boundaries when
//!   they do not fit, and writes synchronously to a [`LogSink`].
//!
//! Failures never reach trace producers. Every dropped trace is counted on
//! the injected [`MetricsSink`] with a `reason:*` tag and logged through
//! `tracing`.
//!
//! Traits use native async fn (no `#[async_trait]` macro).

pub mod buffer;
pub mod config;
pub mod error;
pub mod exporter;
pub mod log_exporter;
pub mod metrics;
pub mod push_exporter;
pub mod sampler;
pub mod span;
pub mod transport;

// Re-export main types
pub use buffer::{AppendBuffer, Buffer, Mark, MsgpackBuffer, Payload, PAYLOAD_MAX_SIZE};
pub use config::{ExportMode, ExporterConfig, PushConfig};
pub use error::{ConfigError, DecodeError, DropReason, EncodeCause, EncodingError, TransportError};
pub use exporter::{Exporter, ExporterBuilder, TraceExporter};
pub use log_exporter::{LogExporter, LogSink, StdoutSink, LOG_PAYLOAD_LIMIT};
pub use metrics::{InMemoryMetrics, MetricsSink, NoopMetrics};
pub use push_exporter::PushExporter;
pub use sampler::{RateFeedback, RateTable, SamplingRates};
pub use span::{Span, Trace};
pub use transport::{NullTransport, Transport, TransportBoxed};
