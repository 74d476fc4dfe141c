//! # Blazelog - High-Throughput Structured Logging Pipeline
//!
//! Blazelog is a structured logging library built around a pluggable record
//! pipeline: records flow through filtering, sampling, and redaction, pick
//! up rule annotations, and fan out to multiple concurrent sinks with
//! per-sink ordering and back-pressure guarantees.
//!
//! ## Architecture
//!
//! The crate is organized into focused modules:
//! - `logger`: the public façade owning sinks, pipeline, and workers
//! - `pipeline`: filter / sampler / redactor / rules stages
//! - `sink`: console, file, rotating, network, event-log, and custom sinks
//! - `format`: text templates, JSON rendering, ANSI colors
//! - `ring` + `dispatch`: the bounded queue and its background drain worker
//! - `pool`: work-stealing thread pool with priority classes
//! - `parallel`: per-sink serial queues feeding the pool
//! - `compress`: gzip/zlib/deflate/zstd/RLE with CRC32 verification
//! - `scheduler`: cron-like maintenance tasks with retries
//!
//! ## Features
//!
//! - Blocking and non-blocking logging with four overflow policies
//! - Size- and time-triggered file rotation with retention and archiving
//! - Background compression of rotated files
//! - Scoped loggers, spans, and copy-on-write context bindings
//! - Thread-safe throughout; hot paths are lock-free pointer loads
//!
//! ## Example
//!
//! ```no_run
//! use blazelog::{Config, Logger};
//!
//! let logger = Logger::init(Config::default()).unwrap();
//! logger.info("service started").unwrap();
//! logger.bind("request_id", "r-42");
//! logger.warning("cache miss rate above threshold").unwrap();
//! logger.flush().unwrap();
//! ```

pub mod compress;
pub mod config;
pub mod diag;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod levels;
pub mod logger;
pub mod parallel;
pub mod pipeline;
pub mod pool;
pub mod record;
pub mod ring;
pub mod scheduler;
pub mod sink;

#[cfg(test)]
mod tests;

pub use config::{
    AsyncConfig, ColorPolicy, Config, FormatStructureConfig, Highlighters, LevelColors,
    NamingStrategy, RotationConfig, RotationInterval, SchedulerConfig, SinkConfig, SinkFormat,
    SinkTarget, ThreadPoolConfig, WriteMode,
};
pub use config::CompressionConfig;
pub use error::{LogError, Result};
pub use levels::{CustomLevel, Level, LevelRegistry};
pub use logger::{Logger, LoggerMetrics, SpanGuard, TraceContext, clear_default, default_logger, set_default};
pub use pipeline::filter::{Filter, FilterAction, FilterConfig, FilterRule};
pub use pipeline::redactor::{PatternKind, RedactionStyle, Redactor};
pub use pipeline::rules::{RuleMatch, RuleSpec, RulesConfig};
pub use pipeline::sampler::Sampler;
pub use record::{ContextValue, Record, RuleCategory, RuleNote, SourceLocation};
pub use ring::OverflowPolicy;
pub use scheduler::{CronExpr, Schedule, ScheduledTask, TaskKind};
pub use sink::{CustomSink, SinkId};

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::config::{Config, RotationConfig, SinkConfig, SinkFormat};
    pub use crate::error::Result;
    pub use crate::levels::Level;
    pub use crate::logger::Logger;
    pub use crate::record::SourceLocation;
}
