//! Push Exporter - batched delivery to a collector
//!
//! Traces are encoded into a [`Buffer`] as they arrive. A flush detaches the
//! buffer (a fresh one is installed in the same step) and hands it to a
//! spawned delivery task, so producers never wait on network I/O.
//!
//! # Concurrency
//!
//! - A `Semaphore` with `concurrency_limit` permits gates the start of every
//!   delivery. When all permits are taken, `flush()` waits for one, and that
//!   wait is the only backpressure producers ever see. It surfaces wherever
//!   the flush was triggered, including a threshold flush inside `accept()`.
//! - A `JoinSet` tracks deliveries; `stop()` joins all of them. Dropping
//!   the exporter detaches them instead, so flushed batches still go out.
//! - The exporter is single-writer: `accept`/`flush` take `&mut self`, and a
//!   detached buffer is owned solely by its delivery task.
//!
//! Failed deliveries are counted and logged, never retried.

use crate::buffer::{Buffer, MsgpackBuffer, Payload};
use crate::config::PushConfig;
use crate::error::{ConfigError, DropReason};
use crate::exporter::TraceExporter;
use crate::metrics::{self, MetricsSink};
use crate::sampler::RateFeedback;
use crate::span::Span;
use crate::transport::TransportBoxed;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;

/// Collaborators every delivery task needs.
#[derive(Clone)]
struct Delivery {
    transport: Arc<dyn TransportBoxed>,
    feedback: Arc<dyn RateFeedback>,
    metrics: Arc<dyn MetricsSink>,
}

impl Delivery {
    async fn run(self, payload: Payload) {
        let start = Instant::now();
        let size = payload.len();
        let count = payload.trace_count();
        tracing::debug!(
            size,
            traces = count,
            transport = self.transport.name(),
            "sending payload"
        );

        match self.transport.send_boxed(payload).await {
            Ok(body) => {
                self.metrics.increment(metrics::FLUSH_BYTES, &[], size as i64);
                self.metrics.increment(metrics::FLUSH_TRACES, &[], count as i64);
                // Delivery already succeeded; a bad rate table only costs the update.
                if let Err(e) = self.feedback.apply_rates(&body) {
                    self.metrics.increment(metrics::DECODE_ERROR, &[], 1);
                    tracing::debug!(error = %e, "could not apply sampling rates");
                }
            }
            Err(e) => {
                self.metrics.increment(
                    metrics::TRACES_DROPPED,
                    &[DropReason::SendFailed.tag()],
                    count as i64,
                );
                tracing::error!(error = %e, "lost {} traces", count);
            }
        }

        self.metrics.timing(metrics::FLUSH_DURATION, start.elapsed(), &[], 1.0);
    }
}

/// Exporter that batches traces and pushes them to a collector.
///
/// Must be used from within a Tokio runtime: deliveries are spawned tasks.
pub struct PushExporter<B: Buffer = MsgpackBuffer> {
    config: PushConfig,
    buffer: B,
    delivery: Delivery,
    /// Delivery slots; one permit per in-flight send
    slots: Arc<Semaphore>,
    /// Deliveries not yet joined
    deliveries: JoinSet<()>,
    /// Trace count of each unjoined delivery, for drop accounting on panic
    in_flight: HashMap<task::Id, usize>,
}

impl PushExporter {
    /// Creates a MessagePack-encoding exporter.
    pub fn new(
        config: PushConfig,
        transport: Arc<dyn TransportBoxed>,
        feedback: Arc<dyn RateFeedback>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        Self::with_encoding(config, transport, feedback, metrics)
    }
}

impl<B: Buffer> PushExporter<B> {
    /// Creates an exporter that accumulates traces in `B`.
    pub fn with_encoding(
        config: PushConfig,
        transport: Arc<dyn TransportBoxed>,
        feedback: Arc<dyn RateFeedback>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let slots = Arc::new(Semaphore::new(config.concurrency_limit));
        Ok(Self {
            config,
            buffer: B::default(),
            delivery: Delivery {
                transport,
                feedback,
                metrics,
            },
            slots,
            deliveries: JoinSet::new(),
            in_flight: HashMap::new(),
        })
    }

    /// Encodes a trace into the current batch.
    ///
    /// A trace that cannot be encoded is dropped and counted. When the batch
    /// grows past the configured size limit it is flushed right away, which
    /// may wait for a free delivery slot.
    pub async fn push_trace(&mut self, trace: &[Span]) {
        if let Err(err) = self.buffer.push(trace) {
            self.delivery
                .metrics
                .increment(metrics::TRACES_DROPPED, &[err.reason().tag()], 1);
            tracing::error!(error = %err, spans = trace.len(), "dropped trace");
            return;
        }

        if self.buffer.size() > self.config.payload_size_limit {
            self.delivery
                .metrics
                .increment(metrics::FLUSH_TRIGGERED, &[metrics::REASON_SIZE], 1);
            self.flush_buffer().await;
        }
    }

    /// Starts delivery of the current batch; no-op when it is empty.
    ///
    /// Returns once a delivery slot has been acquired and the send spawned,
    /// not when the send completes.
    pub async fn flush_buffer(&mut self) {
        if self.buffer.trace_count() == 0 {
            return;
        }
        // New batch is in place before any I/O starts.
        let batch = std::mem::take(&mut self.buffer);
        self.reap_finished();

        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .expect("delivery slots are never closed");

        let count = batch.trace_count();
        let delivery = self.delivery.clone();
        let handle = self.deliveries.spawn(async move {
            delivery.run(batch.finish()).await;
            drop(permit);
        });
        self.in_flight.insert(handle.id(), count);
    }

    /// Waits for every delivery started so far. No timeout: a stuck send
    /// stalls this call.
    pub async fn drain(&mut self) {
        while let Some(result) = self.deliveries.join_next_with_id().await {
            self.joined(result);
        }
    }

    /// Encoded size of the current batch
    pub fn buffered_size(&self) -> usize {
        self.buffer.size()
    }

    /// Traces in the current batch
    pub fn buffered_traces(&self) -> usize {
        self.buffer.trace_count()
    }

    /// Deliveries spawned and not yet joined (finished ones included until
    /// the next flush or drain reaps them).
    pub fn pending_deliveries(&self) -> usize {
        self.deliveries.len()
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.deliveries.try_join_next_with_id() {
            self.joined(result);
        }
    }

    fn joined(&mut self, result: Result<(task::Id, ()), JoinError>) {
        match result {
            Ok((id, ())) => {
                self.in_flight.remove(&id);
            }
            Err(e) => {
                // The task died before it could count its own outcome.
                let count = self.in_flight.remove(&e.id()).unwrap_or(0);
                self.delivery.metrics.increment(
                    metrics::TRACES_DROPPED,
                    &[DropReason::SendFailed.tag()],
                    count as i64,
                );
                tracing::error!(error = %e, "delivery task failed, lost {} traces", count);
            }
        }
    }
}

impl<B: Buffer> Drop for PushExporter<B> {
    fn drop(&mut self) {
        self.deliveries.detach_all();
    }
}

impl<B: Buffer> TraceExporter for PushExporter<B> {
    async fn accept(&mut self, trace: &[Span]) {
        self.push_trace(trace).await;
    }

    async fn flush(&mut self) {
        self.flush_buffer().await;
    }

    async fn stop(&mut self) {
        self.drain().await;
    }

    fn name(&self) -> &str {
        "push"
    }
}
