//! Error types for the logging pipeline.
//!
//! One enum covers every failure kind the crate can produce. Sink failures
//! never propagate out of a `log` call; they flow through registered
//! callbacks while counters increment. Only configuration and allocation
//! failures surface to the logging caller directly.

use std::fmt;
use std::io;

/// Every failure kind the logging pipeline can report.
#[derive(Debug)]
pub enum LogError {
    /// Allocation failed while building a record, formatting, or growing a
    /// buffer.
    OutOfMemory,
    /// A bounded queue (ring buffer or pool submission queue) rejected work
    /// under a non-blocking policy.
    QueueFull,
    /// An underlying write/flush/open failed. Carries the sink name and the
    /// OS error.
    SinkIo { sink: String, source: io::Error },
    /// Rename or directory creation failed mid-rotation. The sink reverts to
    /// its pre-rotation state and keeps writing to the active file.
    Rotation { sink: String, message: String },
    /// Codec failure or CRC mismatch on verification.
    Compression(String),
    /// A scheduled task callback returned an error.
    Scheduler(String),
    /// A subsystem failed to drain within its shutdown bound.
    ShutdownTimeout(&'static str),
    /// Invalid configuration (zero buffer size, bad rotation interval, ...).
    Configuration(String),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::OutOfMemory => write!(f, "allocation failed while building log record"),
            LogError::QueueFull => write!(f, "queue full: entry rejected under non-blocking policy"),
            LogError::SinkIo { sink, source } => {
                write!(f, "sink '{}' I/O error: {}", sink, source)
            }
            LogError::Rotation { sink, message } => {
                write!(f, "rotation failed on sink '{}': {}", sink, message)
            }
            LogError::Compression(message) => write!(f, "compression failed: {}", message),
            LogError::Scheduler(message) => write!(f, "scheduled task failed: {}", message),
            LogError::ShutdownTimeout(subsystem) => {
                write!(f, "{} failed to drain before the shutdown timeout", subsystem)
            }
            LogError::Configuration(message) => write!(f, "configuration error: {}", message),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::SinkIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl LogError {
    /// Wraps an I/O error with the sink it occurred on.
    pub fn sink_io(sink: impl Into<String>, source: io::Error) -> Self {
        LogError::SinkIo {
            sink: sink.into(),
            source,
        }
    }

    /// Wraps a rotation failure with the sink it occurred on.
    pub fn rotation(sink: impl Into<String>, message: impl Into<String>) -> Self {
        LogError::Rotation {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

impl From<std::collections::TryReserveError> for LogError {
    fn from(_: std::collections::TryReserveError) -> Self {
        LogError::OutOfMemory
    }
}

/// Convenient result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, LogError>;
