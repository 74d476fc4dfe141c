//! Sink variants and the shared capability surface.
//!
//! Dispatch is over a tagged variant rather than trait objects so the hot
//! write path stays a jump table; user extensibility comes in through the
//! `Custom` variant's opaque callbacks. Every sink answers write / flush /
//! accepts / name / enabled, and file-backed sinks add rotation.

pub mod console;
pub mod file;
pub mod network;
pub mod rotating;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::{ColorPolicy, Config, SinkConfig, SinkTarget};
use crate::error::{LogError, Result};
use crate::format::Formatter;
use crate::levels::Level;
use crate::pipeline::filter::Filter;
use crate::record::Record;

use console::ConsoleSink;
use file::FileSink;
use network::{TcpSink, UdpSink};
use rotating::{RotatingFileSink, RotationEvent};

/// Stable sink identity handed back by `Logger::add`.
pub type SinkId = usize;

/// Record metadata a sink may consult when writing formatted bytes.
#[derive(Debug, Clone, Copy)]
pub struct WriteMeta {
    pub level: Level,
}

/// Signature for custom sink write callbacks.
pub type CustomWriteFn = dyn Fn(&[u8], &WriteMeta) -> io::Result<()> + Send + Sync;
/// Signature for custom sink flush callbacks.
pub type CustomFlushFn = dyn Fn() -> io::Result<()> + Send + Sync;

/// User-supplied sink: opaque write and optional flush callbacks. Callbacks
/// may run on dispatcher or pool threads and must be thread-safe.
pub struct CustomSink {
    pub write_fn: Box<CustomWriteFn>,
    pub flush_fn: Option<Box<CustomFlushFn>>,
}

/// In-process bounded buffer of recent formatted events, usable as a cheap
/// flight recorder; the platform event-log transport stays external.
pub struct EventLogSink {
    capacity: usize,
    events: Mutex<std::collections::VecDeque<(Level, String)>>,
}

impl EventLogSink {
    pub fn new(capacity: usize) -> EventLogSink {
        EventLogSink {
            capacity: capacity.max(1),
            events: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn write(&self, bytes: &[u8], meta: &WriteMeta) {
        let line = String::from_utf8_lossy(bytes).trim_end().to_string();
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back((meta.level, line));
    }

    /// Most recent events, oldest first.
    pub fn recent(&self) -> Vec<(Level, String)> {
        self.events.lock().iter().cloned().collect()
    }
}

enum SinkKind {
    Console(ConsoleSink),
    File(FileSink),
    Rotating(RotatingFileSink),
    NetworkTcp(TcpSink),
    NetworkUdp(UdpSink),
    EventLog(EventLogSink),
    Custom(CustomSink),
}

/// One configured output destination.
pub struct Sink {
    id: SinkId,
    name: String,
    enabled: AtomicBool,
    min_level: Option<Level>,
    max_level: Option<Level>,
    filter: Option<Filter>,
    color: ColorPolicy,
    formatter: Formatter,
    kind: SinkKind,
    bytes_written: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicUsize,
}

impl Sink {
    /// Builds a sink from its config, layering logger-level format defaults.
    pub fn from_config(id: SinkId, config: &SinkConfig, logger: &Config) -> Result<Sink> {
        config.validate()?;
        let kind = match &config.target {
            SinkTarget::Console => SinkKind::Console(ConsoleSink::new()),
            SinkTarget::File { path } => SinkKind::File(FileSink::new(
                &config.name,
                path.clone(),
                config.write_mode,
                config.buffer_size,
                config.fsync,
            )?),
            SinkTarget::RotatingFile { path, rotation } => {
                SinkKind::Rotating(RotatingFileSink::new(
                    &config.name,
                    path.clone(),
                    rotation.clone(),
                    config.write_mode,
                    config.buffer_size,
                    config.fsync,
                )?)
            }
            SinkTarget::NetworkTcp { addr } => SinkKind::NetworkTcp(TcpSink::new(addr)),
            SinkTarget::NetworkUdp { addr } => SinkKind::NetworkUdp(UdpSink::new(addr)),
            SinkTarget::EventLog { capacity } => SinkKind::EventLog(EventLogSink::new(*capacity)),
        };
        Ok(Sink {
            id,
            name: config.name.clone(),
            enabled: AtomicBool::new(true),
            min_level: config.min_level,
            max_level: config.max_level,
            filter: config.filter.clone().map(Filter::new),
            color: config.color,
            formatter: Formatter::from_config(logger, config),
            kind,
            bytes_written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Wraps user callbacks as a custom sink.
    pub fn custom(id: SinkId, name: &str, logger: &Config, custom: CustomSink) -> Sink {
        let config = SinkConfig::console().with_name(name);
        Sink {
            id,
            name: name.to_string(),
            enabled: AtomicBool::new(true),
            min_level: None,
            max_level: None,
            filter: None,
            color: ColorPolicy::Off,
            formatter: Formatter::from_config(logger, &config),
            kind: SinkKind::Custom(custom),
            bytes_written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn formatter(&self) -> &Formatter {
        &self.formatter
    }

    /// Level acceptance: min/max gates only.
    pub fn accepts(&self, level: Level) -> bool {
        if let Some(min) = self.min_level {
            if level.priority() < min.priority() {
                return false;
            }
        }
        if let Some(max) = self.max_level {
            if level.priority() > max.priority() {
                return false;
            }
        }
        true
    }

    /// Full admission: enabled, level gates, and the per-sink filter.
    pub fn admits(&self, record: &Record) -> bool {
        self.enabled()
            && self.accepts(record.level)
            && self.filter.as_ref().is_none_or(|f| f.admit(record))
    }

    fn supports_ansi(&self) -> bool {
        matches!(self.kind, SinkKind::Console(_))
    }

    /// Whether rendered lines should carry ANSI styling: the sink policy
    /// AND the global switch AND (native ANSI support OR an explicit On).
    pub fn color_active(&self, global_color: bool) -> bool {
        match self.color {
            ColorPolicy::Off => false,
            ColorPolicy::On => global_color,
            ColorPolicy::Auto => global_color && self.supports_ansi(),
        }
    }

    /// Writes formatted bytes. Buffering is allowed; durability comes from
    /// `flush`. Sink failures bump the error counter and return to the
    /// caller for callback routing; they never abort the log call itself.
    pub fn write(&self, bytes: &[u8], meta: &WriteMeta) -> Result<Option<RotationEvent>> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = match &self.kind {
            SinkKind::Console(sink) => sink.write(&self.name, bytes).map(|_| None),
            SinkKind::File(sink) => sink.write(&self.name, bytes).map(|_| None),
            SinkKind::Rotating(sink) => sink.write(&self.name, bytes),
            SinkKind::NetworkTcp(sink) => sink.write(&self.name, bytes).map(|_| None),
            SinkKind::NetworkUdp(sink) => sink.write(&self.name, bytes).map(|_| None),
            SinkKind::EventLog(sink) => {
                sink.write(bytes, meta);
                Ok(None)
            }
            SinkKind::Custom(sink) => (sink.write_fn)(bytes, meta)
                .map(|_| None)
                .map_err(|e| LogError::sink_io(&self.name, e)),
        };
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        match result {
            Ok(event) => {
                self.bytes_written
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                Ok(event)
            }
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Forces buffered bytes to the OS (and fsync where configured).
    pub fn flush(&self) -> Result<()> {
        match &self.kind {
            SinkKind::Console(sink) => sink.flush(&self.name),
            SinkKind::File(sink) => sink.flush(&self.name),
            SinkKind::Rotating(sink) => sink.flush(&self.name),
            SinkKind::NetworkTcp(sink) => sink.flush(&self.name),
            SinkKind::NetworkUdp(sink) => sink.flush(&self.name),
            SinkKind::EventLog(_) => Ok(()),
            SinkKind::Custom(sink) => match &sink.flush_fn {
                Some(flush) => flush().map_err(|e| LogError::sink_io(&self.name, e)),
                None => Ok(()),
            },
        }
    }

    /// Rotates when a trigger is pending; `None` for non-rotating sinks.
    pub fn rotate_if_needed(&self) -> Result<Option<RotationEvent>> {
        match &self.kind {
            SinkKind::Rotating(sink) => sink.rotate_if_needed(&self.name),
            _ => Ok(None),
        }
    }

    /// Unconditional rotation for scheduled tasks; an error on non-rotating
    /// sinks.
    pub fn force_rotate(&self) -> Result<RotationEvent> {
        match &self.kind {
            SinkKind::Rotating(sink) => sink.force_rotate(&self.name),
            _ => Err(LogError::Configuration(format!(
                "sink '{}' does not rotate",
                self.name
            ))),
        }
    }

    /// The compression settings attached to a rotating sink.
    pub fn compression_config(&self) -> Option<&crate::config::CompressionConfig> {
        match &self.kind {
            SinkKind::Rotating(sink) => Some(sink.compression_config()),
            _ => None,
        }
    }

    /// The in-process event buffer, when this is an event-log sink.
    pub fn recent_events(&self) -> Option<Vec<(Level, String)>> {
        match &self.kind {
            SinkKind::EventLog(sink) => Some(sink.recent()),
            _ => None,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Writes currently executing against this sink; `Logger::remove` spins
    /// on this reaching zero before dropping the sink.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SinkFormat;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn logger_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_level_gates() {
        let config = SinkConfig::console()
            .with_min_level(Level::Warning)
            .with_name("gated");
        let sink = Sink::from_config(1, &config, &logger_config()).unwrap();
        assert!(!sink.accepts(Level::Info));
        assert!(sink.accepts(Level::Warning));
        assert!(sink.accepts(Level::Fatal));

        let mut config = SinkConfig::console();
        config.max_level = Some(Level::Info);
        let sink = Sink::from_config(2, &config, &logger_config()).unwrap();
        assert!(sink.accepts(Level::Trace));
        assert!(!sink.accepts(Level::Error));
    }

    #[test]
    fn test_disabled_sink_admits_nothing() {
        let sink = Sink::from_config(1, &SinkConfig::console(), &logger_config()).unwrap();
        let record = Record::new(Level::Info, "INFO", "x").unwrap();
        assert!(sink.admits(&record));
        sink.set_enabled(false);
        assert!(!sink.admits(&record));
    }

    #[test]
    fn test_color_policy_conjunction() {
        let console = Sink::from_config(1, &SinkConfig::console(), &logger_config()).unwrap();
        // Auto on a console: follows the global switch.
        assert!(console.color_active(true));
        assert!(!console.color_active(false));

        let dir = TempDir::new().unwrap();
        let file_auto =
            Sink::from_config(2, &SinkConfig::file(dir.path().join("a.log")), &logger_config())
                .unwrap();
        // Auto on a file: never colored.
        assert!(!file_auto.color_active(true));

        let file_on = Sink::from_config(
            3,
            &SinkConfig::file(dir.path().join("b.log")).with_color(ColorPolicy::On),
            &logger_config(),
        )
        .unwrap();
        // Explicit On overrides the ANSI-support check but not the global.
        assert!(file_on.color_active(true));
        assert!(!file_on.color_active(false));
    }

    #[test]
    fn test_file_sink_writes_and_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counted.log");
        let sink =
            Sink::from_config(1, &SinkConfig::file(path.clone()), &logger_config()).unwrap();
        sink.write(b"hello\n", &WriteMeta { level: Level::Info }).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.bytes_written(), 6);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_event_log_ring() {
        let mut config = SinkConfig::console().with_name("events");
        config.target = SinkTarget::EventLog { capacity: 2 };
        let sink = Sink::from_config(1, &config, &logger_config()).unwrap();
        for i in 0..3 {
            let line = format!("event {}\n", i);
            sink.write(line.as_bytes(), &WriteMeta { level: Level::Info })
                .unwrap();
        }
        let recent = sink.recent_events().unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].1, "event 1");
        assert_eq!(recent[1].1, "event 2");
    }

    #[test]
    fn test_custom_sink_callbacks() {
        let seen: Arc<parking_lot::Mutex<Vec<String>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let custom = CustomSink {
            write_fn: Box::new(move |bytes, _meta| {
                sink_seen
                    .lock()
                    .push(String::from_utf8_lossy(bytes).into_owned());
                Ok(())
            }),
            flush_fn: None,
        };
        let sink = Sink::custom(9, "cb", &logger_config(), custom);
        sink.write(b"one\n", &WriteMeta { level: Level::Debug }).unwrap();
        assert_eq!(seen.lock().as_slice(), &["one\n".to_string()]);
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_custom_sink_error_surfaces_name() {
        let custom = CustomSink {
            write_fn: Box::new(|_bytes, _meta| {
                Err(io::Error::new(io::ErrorKind::Other, "backend gone"))
            }),
            flush_fn: None,
        };
        let sink = Sink::custom(3, "flaky", &logger_config(), custom);
        let err = sink
            .write(b"x", &WriteMeta { level: Level::Info })
            .unwrap_err();
        assert!(err.to_string().contains("flaky"));
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn test_force_rotate_on_plain_sink_errors() {
        let sink = Sink::from_config(1, &SinkConfig::console(), &logger_config()).unwrap();
        assert!(sink.force_rotate().is_err());
    }

    #[test]
    fn test_json_sink_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("json.log");
        let config = SinkConfig::file(path.clone())
            .with_format(SinkFormat::Json { pretty: false });
        let sink = Sink::from_config(1, &config, &logger_config()).unwrap();
        assert!(sink.formatter().is_json());
    }
}
