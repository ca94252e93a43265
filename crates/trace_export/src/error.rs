//! Error types for the export pipeline.
//!
//! None of these ever reach trace producers. Exporters turn every failure
//! into a drop counter and a log line; the types exist so the reason travels
//! intact from where the failure happens to where it is counted.

use std::fmt;
use thiserror::Error;

/// Why a trace (or a whole batch) was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// A trace could not be encoded into the network payload
    EncodingError,
    /// A span could not be rendered as JSON on the log path
    EncodingFailed,
    /// A single trace (network) or span (log) cannot fit in any payload
    TraceTooLarge,
    /// The transport failed; the whole batch is lost
    SendFailed,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EncodingError => "encoding_error",
            Self::EncodingFailed => "encoding_failed",
            Self::TraceTooLarge => "trace_too_large",
            Self::SendFailed => "send_failed",
        }
    }

    /// Metric tag form, e.g. `reason:send_failed`.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::EncodingError => "reason:encoding_error",
            Self::EncodingFailed => "reason:encoding_failed",
            Self::TraceTooLarge => "reason:trace_too_large",
            Self::SendFailed => "reason:send_failed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying cause of an [`EncodingError`].
#[derive(Debug, Error)]
pub enum EncodeCause {
    #[error("msgpack: {0}")]
    Msgpack(#[from] rmp_serde::encode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{size} bytes exceeds the {limit} byte payload limit")]
    TooLarge { size: usize, limit: usize },
}

/// A trace or span that could not be appended to a buffer.
#[derive(Debug, Error)]
#[error("{reason}: {cause}")]
pub struct EncodingError {
    reason: DropReason,
    #[source]
    cause: EncodeCause,
}

impl EncodingError {
    pub fn new(reason: DropReason, cause: impl Into<EncodeCause>) -> Self {
        Self {
            reason,
            cause: cause.into(),
        }
    }

    pub fn too_large(size: usize, limit: usize) -> Self {
        Self::new(DropReason::TraceTooLarge, EncodeCause::TooLarge { size, limit })
    }

    pub fn reason(&self) -> DropReason {
        self.reason
    }

    pub fn cause(&self) -> &EncodeCause {
        &self.cause
    }
}

/// Transport-layer failure. The in-flight batch is always lost.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    /// Connection or I/O failure
    #[error("transport error: {0}")]
    Io(String),
    /// The collector answered with a non-success status
    #[error("collector responded with status {0}")]
    Status(u16),
    /// The send did not complete in time
    #[error("send timed out")]
    Timeout,
}

/// A rate table in a collector response could not be applied.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid rate table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rate {rate} for {key:?} is outside [0, 1]")]
    RateOutOfRange { key: String, rate: f64 },
}

/// Invalid or incomplete exporter configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,
    #[error("concurrency limit {limit} exceeds the maximum of {max}")]
    ConcurrencyTooLarge { limit: usize, max: usize },
    #[error("payload size limit must be non-zero")]
    ZeroPayloadLimit,
    #[error("push mode requires a transport")]
    MissingTransport,
    #[error("push mode requires a rate feedback sink")]
    MissingRateFeedback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_tags() {
        assert_eq!(DropReason::EncodingError.tag(), "reason:encoding_error");
        assert_eq!(DropReason::TraceTooLarge.tag(), "reason:trace_too_large");
        assert_eq!(DropReason::SendFailed.to_string(), "send_failed");
    }

    #[test]
    fn test_encoding_error_display() {
        let err = EncodingError::too_large(300, 256);
        assert_eq!(err.reason(), DropReason::TraceTooLarge);
        assert_eq!(
            err.to_string(),
            "trace_too_large: 300 bytes exceeds the 256 byte payload limit"
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
