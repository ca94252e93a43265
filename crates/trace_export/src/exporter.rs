use crate::config::{ExportMode, ExporterConfig};
use crate::error::ConfigError;
use crate::log_exporter::{LogExporter, LogSink, StdoutSink};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::push_exporter::PushExporter;
use crate::sampler::RateFeedback;
use crate::span::Span;
use crate::transport::TransportBoxed;
use std::future::Future;
use std::sync::Arc;

/// Contract shared by every delivery strategy.
///
/// Methods take `&mut self`: accepts and flushes on one exporter must be
/// serialized, and the borrow checker enforces it.
///
/// Uses native async fn in traits (no `#[async_trait]` macro).
pub trait TraceExporter: Send {
    /// Buffers one trace. Never fails towards the caller: traces that cannot
    /// be exported are dropped and counted.
    fn accept(&mut self, trace: &[Span]) -> impl Future<Output = ()> + Send;

    /// Delivers whatever is buffered. No I/O and no metrics when empty.
    fn flush(&mut self) -> impl Future<Output = ()> + Send;

    /// Waits until every delivery started before the call has completed.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;

    /// Returns the exporter name for debugging.
    fn name(&self) -> &str;
}

/// Either exporter, chosen at runtime.
pub enum Exporter {
    Push(PushExporter),
    Log(LogExporter),
}

impl Exporter {
    pub fn mode(&self) -> ExportMode {
        match self {
            Self::Push(_) => ExportMode::Push,
            Self::Log(_) => ExportMode::Log,
        }
    }
}

impl TraceExporter for Exporter {
    async fn accept(&mut self, trace: &[Span]) {
        match self {
            Self::Push(exporter) => exporter.push_trace(trace).await,
            Self::Log(exporter) => exporter.push_trace(trace),
        }
    }

    async fn flush(&mut self) {
        match self {
            Self::Push(exporter) => exporter.flush_buffer().await,
            Self::Log(exporter) => exporter.flush_batch(),
        }
    }

    async fn stop(&mut self) {
        match self {
            Self::Push(exporter) => exporter.drain().await,
            Self::Log(_) => {}
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Push(_) => "push",
            Self::Log(_) => "log",
        }
    }
}

/// Assembles an [`Exporter`] from configuration and collaborators.
///
/// # Example
///
/// ```ignore
/// let exporter = ExporterBuilder::new(ExporterConfig::from_env())
///     .with_transport(Arc::new(my_transport))
///     .with_rate_feedback(Arc::new(RateTable::new()))
///     .with_metrics(metrics)
///     .build()?;
/// ```
pub struct ExporterBuilder {
    config: ExporterConfig,
    metrics: Arc<dyn MetricsSink>,
    transport: Option<Arc<dyn TransportBoxed>>,
    feedback: Option<Arc<dyn RateFeedback>>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl ExporterBuilder {
    pub fn new(config: ExporterConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetrics),
            transport: None,
            feedback: None,
            log_sink: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn TransportBoxed>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_rate_feedback(mut self, feedback: Arc<dyn RateFeedback>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Log destination for log mode. Defaults to stdout.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(self) -> Result<Exporter, ConfigError> {
        match self.config.mode {
            ExportMode::Push => {
                let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
                let feedback = self.feedback.ok_or(ConfigError::MissingRateFeedback)?;
                let exporter =
                    PushExporter::new(self.config.push, transport, feedback, self.metrics)?;
                Ok(Exporter::Push(exporter))
            }
            ExportMode::Log => {
                let sink: Arc<dyn LogSink> = match self.log_sink {
                    Some(sink) => sink,
                    None => Arc::new(StdoutSink::new()),
                };
                Ok(Exporter::Log(LogExporter::new(sink, self.metrics)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::RateTable;
    use crate::transport::NullTransport;

    #[test]
    fn test_push_requires_transport() {
        let result = ExporterBuilder::new(ExporterConfig::default()).build();
        assert!(matches!(result, Err(ConfigError::MissingTransport)));

        let result = ExporterBuilder::new(ExporterConfig::default())
            .with_transport(Arc::new(NullTransport::new()))
            .build();
        assert!(matches!(result, Err(ConfigError::MissingRateFeedback)));
    }

    #[test]
    fn test_log_mode_needs_no_transport() {
        let exporter = ExporterBuilder::new(ExporterConfig::default().with_mode(ExportMode::Log))
            .build()
            .unwrap();
        assert_eq!(exporter.mode(), ExportMode::Log);
        assert_eq!(exporter.name(), "log");
    }

    #[tokio::test]
    async fn test_push_mode_round_trip() {
        let rates = Arc::new(RateTable::new());
        let mut exporter = ExporterBuilder::new(ExporterConfig::default())
            .with_transport(Arc::new(NullTransport::new()))
            .with_rate_feedback(rates.clone())
            .build()
            .unwrap();
        assert_eq!(exporter.mode(), ExportMode::Push);

        exporter.accept(&[Span::new(1, 1, 0, "op")]).await;
        exporter.flush().await;
        exporter.stop().await;

        match &exporter {
            Exporter::Push(push) => {
                assert_eq!(push.buffered_traces(), 0);
                assert_eq!(push.pending_deliveries(), 0);
            }
            Exporter::Log(_) => panic!("expected push exporter"),
        }
    }
}
