//! Exporter configuration.

use crate::buffer::PAYLOAD_MAX_SIZE;
use crate::error::ConfigError;
use tokio::sync::Semaphore;

/// Environment variable present in AWS Lambda execution environments.
const LAMBDA_FUNCTION_ENV: &str = "AWS_LAMBDA_FUNCTION_NAME";

/// Configuration for the push (collector) exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConfig {
    /// Buffered payload size that triggers an immediate flush.
    ///
    /// Default: half of [`PAYLOAD_MAX_SIZE`]
    pub payload_size_limit: usize,

    /// Maximum number of deliveries in flight at once, at most
    /// `Semaphore::MAX_PERMITS`.
    ///
    /// Default: 100
    pub concurrency_limit: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            payload_size_limit: PAYLOAD_MAX_SIZE / 2,
            concurrency_limit: 100,
        }
    }
}

impl PushConfig {
    /// Sets the flush threshold.
    pub fn with_payload_size_limit(mut self, limit: usize) -> Self {
        self.payload_size_limit = limit;
        self
    }

    /// Sets the concurrent delivery limit.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency_limit == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.concurrency_limit > Semaphore::MAX_PERMITS {
            return Err(ConfigError::ConcurrencyTooLarge {
                limit: self.concurrency_limit,
                max: Semaphore::MAX_PERMITS,
            });
        }
        if self.payload_size_limit == 0 {
            return Err(ConfigError::ZeroPayloadLimit);
        }
        Ok(())
    }
}

/// Where traces go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportMode {
    /// Network delivery to a collector process
    #[default]
    Push,
    /// JSON lines on the process log stream
    Log,
}

impl ExportMode {
    /// Picks [`ExportMode::Log`] inside AWS Lambda, where no collector runs
    /// next to the process, and [`ExportMode::Push`] everywhere else.
    pub fn detect() -> Self {
        Self::from_lambda_name(std::env::var_os(LAMBDA_FUNCTION_ENV).as_deref())
    }

    fn from_lambda_name(name: Option<&std::ffi::OsStr>) -> Self {
        match name {
            Some(name) if !name.is_empty() => Self::Log,
            _ => Self::Push,
        }
    }
}

/// Top-level exporter configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExporterConfig {
    pub mode: ExportMode,
    pub push: PushConfig,
}

impl ExporterConfig {
    /// Configuration with the mode detected from the environment.
    pub fn from_env() -> Self {
        Self {
            mode: ExportMode::detect(),
            push: PushConfig::default(),
        }
    }

    pub fn with_mode(mut self, mode: ExportMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_push(mut self, push: PushConfig) -> Self {
        self.push = push;
        self
    }
}
