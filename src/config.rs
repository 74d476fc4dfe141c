//! Configuration value types for the logger and its subsystems.
//!
//! Everything here is plain data: the [`Logger`](crate::logger::Logger) owns
//! the live state built from these structs. Invalid combinations are rejected
//! with [`LogError::Configuration`] at construction time, never mid-pipeline.

use std::path::PathBuf;

use ahash::AHashMap;

use crate::error::{LogError, Result};
use crate::levels::Level;
use crate::ring::OverflowPolicy;

/// Parse a human-readable size string ("500 B", "1 KiB", "10 MB") into bytes.
///
/// Decimal units (KB, MB) are powers of 1000; binary units (KiB, MiB) are
/// powers of 1024, per `byte-unit` semantics.
pub fn parse_size(s: &str) -> Result<u64> {
    byte_unit::Byte::parse_str(s, true)
        .map(|b| b.as_u64())
        .map_err(|_| LogError::Configuration(format!("invalid size string: '{}'", s)))
}

/// When a rotating sink rolls over on the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationInterval {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RotationInterval {
    /// Parses an interval name (case-insensitive).
    pub fn from_str(s: &str) -> Result<RotationInterval> {
        match s.to_ascii_lowercase().as_str() {
            "minutely" => Ok(RotationInterval::Minutely),
            "hourly" => Ok(RotationInterval::Hourly),
            "daily" => Ok(RotationInterval::Daily),
            "weekly" => Ok(RotationInterval::Weekly),
            "monthly" => Ok(RotationInterval::Monthly),
            "yearly" => Ok(RotationInterval::Yearly),
            other => Err(LogError::Configuration(format!(
                "invalid rotation interval: '{}'",
                other
            ))),
        }
    }
}

/// How rotated files are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingStrategy {
    /// `app.<unix-ms>.log`
    TimestampMs,
    /// `app.<YYYY-MM-DD>.log`
    Date,
    /// `app.<YYYY-MM-DDTHH-MM-SS>.log`
    IsoDateTime,
    /// `app.<N>.log` with a monotonically increasing index.
    Index,
    /// User template with `{base} {ext} {date} {time} {iso} {YYYY} {MM} {DD}
    /// {HH} {mm} {ss}` placeholders.
    Template(String),
}

impl Default for NamingStrategy {
    fn default() -> Self {
        NamingStrategy::Date
    }
}

/// Whether a file sink appends to or truncates an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Append,
    Truncate,
}

/// Per-sink color switch. `Auto` defers to terminal detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorPolicy {
    On,
    Off,
    #[default]
    Auto,
}

/// Rotation policy for a rotating file sink.
///
/// Size and interval triggers are OR-combined; either being crossed rotates
/// the file.
#[derive(Debug, Clone, Default)]
pub struct RotationConfig {
    /// Rotate when the active file would exceed this many bytes.
    pub size_limit: Option<u64>,
    /// Rotate when the wall clock crosses an interval boundary.
    pub interval: Option<RotationInterval>,
    /// Naming of rotated files.
    pub naming: NamingStrategy,
    /// Keep at most this many rotated files (newest by modification time).
    pub retention_count: Option<usize>,
    /// Delete rotated files older than this many seconds.
    pub max_age_seconds: Option<u64>,
    /// Move rotated files into this directory (created when absent).
    pub archive_dir: Option<PathBuf>,
    /// Remove the archive directory when retention leaves it empty.
    pub clean_empty_dirs: bool,
    /// Hand rotated files to the compression subsystem.
    pub compress_on_rotation: bool,
    /// Compression settings for rotated files.
    pub compression: CompressionConfig,
}

impl RotationConfig {
    /// Sets the size limit from a human-readable string.
    pub fn with_size_str(mut self, s: &str) -> Result<Self> {
        self.size_limit = Some(parse_size(s)?);
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(0) = self.size_limit {
            return Err(LogError::Configuration(
                "rotation size_limit must be non-zero".into(),
            ));
        }
        if self.size_limit.is_none() && self.interval.is_none() {
            return Err(LogError::Configuration(
                "rotation requires a size limit or an interval".into(),
            ));
        }
        Ok(())
    }
}

/// Compression settings used by rotation handoff and scheduled tasks.
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Codec selection; see [`crate::compress::Algorithm`].
    pub algorithm: crate::compress::Algorithm,
    /// Speed/ratio tradeoff.
    pub level: crate::compress::CompressionLevel,
    /// Extension appended to compressed files.
    pub extension: String,
    /// Keep the source file after a successful compression.
    pub keep_original: bool,
    /// Run `compress_file` on the thread pool instead of inline.
    pub background: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: crate::compress::Algorithm::Gzip,
            level: crate::compress::CompressionLevel::Default,
            extension: "gz".to_string(),
            keep_original: false,
            background: true,
        }
    }
}

/// Settings for the bounded ring buffer and its drain worker.
#[derive(Debug, Clone)]
pub struct AsyncConfig {
    /// Ring capacity; rounded up to a power of two. Zero is rejected.
    pub capacity: usize,
    /// What to do when the ring is full.
    pub overflow: OverflowPolicy,
    /// Upper bound on entries drained per batch.
    pub batch_size: usize,
    /// The drain worker wakes at least this often.
    pub flush_interval_ms: u64,
    /// Force a drain when the oldest pending entry is older than this.
    pub max_latency_ms: Option<u64>,
    /// Ceiling for `OverflowPolicy::Expand`; reverts to drop-oldest beyond it.
    pub expand_ceiling: Option<usize>,
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            capacity: 8192,
            overflow: OverflowPolicy::Block,
            batch_size: 256,
            flush_interval_ms: 100,
            max_latency_ms: None,
            expand_ceiling: None,
        }
    }
}

impl AsyncConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(LogError::Configuration(
                "ring buffer capacity must be non-zero".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(LogError::Configuration("batch_size must be non-zero".into()));
        }
        Ok(())
    }
}

/// Settings for the work-stealing thread pool.
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Worker thread count; 0 means available parallelism.
    pub workers: usize,
    /// Bound on queued tasks across the global submission queue.
    pub max_queued: usize,
    /// Capacity of each worker's scratch-string arena.
    pub arena_strings: usize,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_queued: 4096,
            arena_strings: 64,
        }
    }
}

impl ThreadPoolConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_queued == 0 {
            return Err(LogError::Configuration("max_queued must be non-zero".into()));
        }
        Ok(())
    }

    pub(crate) fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
        }
    }
}

/// Settings for the maintenance scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// The driver wakes at least this often even with no due task.
    pub check_interval_ms: u64,
    /// Bound on concurrently executing scheduled tasks.
    pub max_concurrent_tasks: usize,
    /// Fixed offset from UTC in seconds; daily/weekly boundaries are
    /// computed in this offset.
    pub utc_offset_secs: i32,
    /// Re-run failing tasks after `retry_delay_ms`, up to `max_retries`.
    pub retry_failed: bool,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1000,
            max_concurrent_tasks: 4,
            utc_offset_secs: 0,
            retry_failed: true,
            retry_delay_ms: 5000,
            max_retries: 3,
        }
    }
}

/// Which record fields the text formatter renders when no explicit template
/// overrides it, plus JSON timestamp shape.
#[derive(Debug, Clone)]
pub struct FormatStructureConfig {
    pub show_time: bool,
    pub show_module: bool,
    pub show_function: bool,
    pub show_filename: bool,
    pub show_lineno: bool,
    pub show_thread: bool,
    /// Emit JSON timestamps as Unix milliseconds instead of ISO-8601.
    pub json_timestamp_unix_ms: bool,
}

impl Default for FormatStructureConfig {
    fn default() -> Self {
        Self {
            show_time: true,
            show_module: true,
            show_function: true,
            show_filename: false,
            show_lineno: false,
            show_thread: false,
            json_timestamp_unix_ms: true,
        }
    }
}

/// Map of level names to color names or ANSI codes.
#[derive(Debug, Clone)]
pub struct LevelColors {
    pub colors: AHashMap<String, String>,
}

impl Default for LevelColors {
    fn default() -> Self {
        let mut colors = AHashMap::new();
        colors.insert("TRACE".to_string(), "36".to_string()); // Cyan
        colors.insert("DEBUG".to_string(), "35".to_string()); // Magenta
        colors.insert("INFO".to_string(), "32".to_string()); // Green
        colors.insert("NOTICE".to_string(), "34".to_string()); // Blue
        colors.insert("SUCCESS".to_string(), "92".to_string()); // Bright Green
        colors.insert("WARNING".to_string(), "33".to_string()); // Yellow
        colors.insert("ERROR".to_string(), "31".to_string()); // Red
        colors.insert("FAIL".to_string(), "91".to_string()); // Bright Red
        colors.insert("CRITICAL".to_string(), "91".to_string()); // Bright Red
        colors.insert("FATAL".to_string(), "95".to_string()); // Bright Magenta
        Self { colors }
    }
}

impl LevelColors {
    pub fn get(&self, level_name: &str) -> Option<&str> {
        self.colors.get(level_name).map(|s| s.as_str())
    }

    pub fn set(&mut self, level_name: &str, color: &str) {
        self.colors
            .insert(level_name.to_ascii_uppercase(), color.to_string());
    }
}

/// A substring highlight applied to rendered lines when colors are active.
#[derive(Debug, Clone)]
pub struct Highlight {
    pub needle: String,
    /// Color name or ANSI code.
    pub style: String,
}

/// Ordered substring highlighters.
#[derive(Debug, Clone, Default)]
pub struct Highlighters {
    pub rules: Vec<Highlight>,
}

impl Highlighters {
    pub fn add(&mut self, needle: &str, style: &str) {
        self.rules.push(Highlight {
            needle: needle.to_string(),
            style: style.to_string(),
        });
    }
}

/// Output format of one sink.
#[derive(Debug, Clone)]
pub enum SinkFormat {
    /// Text rendering through a template; `None` uses the logger default.
    Text { template: Option<String> },
    /// One JSON object per record.
    Json { pretty: bool },
}

impl Default for SinkFormat {
    fn default() -> Self {
        SinkFormat::Text { template: None }
    }
}

/// Where a sink writes.
#[derive(Debug, Clone)]
pub enum SinkTarget {
    /// Standard error.
    Console,
    /// A single file.
    File { path: PathBuf },
    /// A file with rotation, retention, and optional compression.
    RotatingFile { path: PathBuf, rotation: RotationConfig },
    /// Newline-framed TCP.
    NetworkTcp { addr: String },
    /// One datagram per record.
    NetworkUdp { addr: String },
    /// In-process bounded buffer of recent events.
    EventLog { capacity: usize },
}

/// Configuration for one sink.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Human-readable name; surfaced in errors and callbacks.
    pub name: String,
    pub target: SinkTarget,
    /// Minimum level this sink accepts.
    pub min_level: Option<Level>,
    /// Maximum level this sink accepts.
    pub max_level: Option<Level>,
    /// Optional per-sink admission filter.
    pub filter: Option<crate::pipeline::filter::FilterConfig>,
    pub write_mode: WriteMode,
    pub color: ColorPolicy,
    pub format: SinkFormat,
    /// Buffered-writer capacity for file-backed sinks.
    pub buffer_size: usize,
    /// Call fsync after every flush.
    pub fsync: bool,
    /// Time format for `{time}`; `None` uses the logger default.
    pub time_format: Option<String>,
}

impl SinkConfig {
    pub fn console() -> Self {
        Self::named_target("console", SinkTarget::Console)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::named_target("file", SinkTarget::File { path: path.into() })
    }

    pub fn rotating_file(path: impl Into<PathBuf>, rotation: RotationConfig) -> Self {
        Self::named_target(
            "rotating",
            SinkTarget::RotatingFile {
                path: path.into(),
                rotation,
            },
        )
    }

    fn named_target(name: &str, target: SinkTarget) -> Self {
        Self {
            name: name.to_string(),
            target,
            min_level: None,
            max_level: None,
            filter: None,
            write_mode: WriteMode::Append,
            color: ColorPolicy::Auto,
            format: SinkFormat::default(),
            buffer_size: 8192,
            fsync: false,
            time_format: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn with_format(mut self, format: SinkFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_color(mut self, policy: ColorPolicy) -> Self {
        self.color = policy;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(LogError::Configuration("sink name must be non-empty".into()));
        }
        if let SinkTarget::RotatingFile { rotation, .. } = &self.target {
            rotation.validate()?;
        }
        if let SinkTarget::EventLog { capacity: 0 } = self.target {
            return Err(LogError::Configuration(
                "event log capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level logger configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Global minimum level gate, applied before the filter stage.
    pub min_level: Level,
    /// Auto-add a console sink on `init`.
    pub console: bool,
    /// Master color switch; ANDed with each sink's policy.
    pub color_display: bool,
    /// Default text template. `{time} {level} {message} ...` placeholders.
    pub log_format: String,
    /// Default time format for `{time}`.
    pub time_format: String,
    /// Reject messages longer than this many bytes.
    pub max_message_size: Option<usize>,
    /// Capture a backtrace for records at error and above.
    pub capture_backtrace: bool,
    /// Bound for drains on `flush` and drop.
    pub shutdown_timeout_ms: u64,
    /// Structured-field toggles and JSON timestamp shape.
    pub structure: FormatStructureConfig,
    /// Level color table.
    pub level_colors: LevelColors,
    /// Substring highlighters for rendered lines.
    pub highlighters: Highlighters,
    /// Ring buffer + drain worker; `None` logs synchronously.
    pub async_mode: Option<AsyncConfig>,
    /// Work-stealing pool; `None` writes on the dispatcher thread.
    pub thread_pool: Option<ThreadPoolConfig>,
    /// Fan-out policy used when a thread pool is attached.
    pub parallel_write: crate::parallel::ParallelWriteConfig,
    /// Maintenance scheduler; `None` disables timed tasks.
    pub scheduler: Option<SchedulerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_level: Level::Info,
            console: true,
            color_display: true,
            log_format: "[{time}] [{level}] {message}".to_string(),
            time_format: "ISO8601".to_string(),
            max_message_size: None,
            capture_backtrace: false,
            shutdown_timeout_ms: 5000,
            structure: FormatStructureConfig::default(),
            level_colors: LevelColors::default(),
            highlighters: Highlighters::default(),
            async_mode: None,
            thread_pool: None,
            parallel_write: crate::parallel::ParallelWriteConfig::default(),
            scheduler: None,
        }
    }
}

impl Config {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(async_cfg) = &self.async_mode {
            async_cfg.validate()?;
        }
        if let Some(pool_cfg) = &self.thread_pool {
            pool_cfg.validate()?;
        }
        if let Some(0) = self.max_message_size {
            return Err(LogError::Configuration(
                "max_message_size must be non-zero when set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("500 B").unwrap(), 500);
        assert_eq!(parse_size("1 KiB").unwrap(), 1024);
        assert_eq!(parse_size("1 KB").unwrap(), 1000);
        assert_eq!(parse_size("2 MiB").unwrap(), 2 * 1024 * 1024);
        assert!(parse_size("wat").is_err());
    }

    #[test]
    fn test_rotation_interval_from_str() {
        assert_eq!(
            RotationInterval::from_str("daily").unwrap(),
            RotationInterval::Daily
        );
        assert_eq!(
            RotationInterval::from_str("YEARLY").unwrap(),
            RotationInterval::Yearly
        );
        assert!(RotationInterval::from_str("fortnightly").is_err());
    }

    #[test]
    fn test_rotation_config_validation() {
        let empty = RotationConfig::default();
        assert!(empty.validate().is_err());

        let sized = RotationConfig {
            size_limit: Some(1024),
            ..Default::default()
        };
        assert!(sized.validate().is_ok());

        let zero = RotationConfig {
            size_limit: Some(0),
            ..Default::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_async_config_rejects_zero_capacity() {
        let cfg = AsyncConfig {
            capacity: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_default_template() {
        let cfg = Config::default();
        assert_eq!(cfg.log_format, "[{time}] [{level}] {message}");
        assert_eq!(cfg.min_level, Level::Info);
        assert!(cfg.console);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_level_colors_defaults() {
        let colors = LevelColors::default();
        assert_eq!(colors.get("INFO"), Some("32"));
        assert_eq!(colors.get("ERROR"), Some("31"));
        assert!(colors.get("NOPE").is_none());
    }

    #[test]
    fn test_sink_config_builders() {
        let sink = SinkConfig::console()
            .with_name("stderr")
            .with_min_level(Level::Warning)
            .with_color(ColorPolicy::Off);
        assert_eq!(sink.name, "stderr");
        assert_eq!(sink.min_level, Some(Level::Warning));
        assert!(sink.validate().is_ok());
    }
}
