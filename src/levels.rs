//! Log level definitions and the custom level registry.
//!
//! Built-in levels carry fixed priorities spaced so user-defined levels can
//! slot between them. Custom levels are registered at runtime with a name and
//! an ANSI style hint and live in a per-logger [`LevelRegistry`].

use ahash::AHashMap;
use parking_lot::RwLock;

/// A log severity level.
///
/// Ten built-in levels plus [`Level::Custom`] for user-registered priorities.
/// Ordering follows the numeric priority, so `Level::Trace < Level::Fatal`.
///
/// # Priorities
///
/// | Level    | Priority |
/// |----------|----------|
/// | Trace    | 5        |
/// | Debug    | 10       |
/// | Info     | 20       |
/// | Notice   | 22       |
/// | Success  | 25       |
/// | Warning  | 30       |
/// | Error    | 40       |
/// | Fail     | 45       |
/// | Critical | 50       |
/// | Fatal    | 55       |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Notice,
    Success,
    Warning,
    Error,
    Fail,
    Critical,
    Fatal,
    /// A custom level identified by its numeric priority. Name and style are
    /// resolved through the [`LevelRegistry`].
    Custom(u8),
}

impl Level {
    /// Returns the numeric priority of this level.
    pub const fn priority(self) -> u8 {
        match self {
            Level::Trace => 5,
            Level::Debug => 10,
            Level::Info => 20,
            Level::Notice => 22,
            Level::Success => 25,
            Level::Warning => 30,
            Level::Error => 40,
            Level::Fail => 45,
            Level::Critical => 50,
            Level::Fatal => 55,
            Level::Custom(p) => p,
        }
    }

    /// Maps a priority back to a built-in level, or `Custom` for anything else.
    pub const fn from_priority(priority: u8) -> Level {
        match priority {
            5 => Level::Trace,
            10 => Level::Debug,
            20 => Level::Info,
            22 => Level::Notice,
            25 => Level::Success,
            30 => Level::Warning,
            40 => Level::Error,
            45 => Level::Fail,
            50 => Level::Critical,
            55 => Level::Fatal,
            p => Level::Custom(p),
        }
    }

    /// The upper-case name of a built-in level, `None` for custom levels.
    pub const fn builtin_name(self) -> Option<&'static str> {
        match self {
            Level::Trace => Some("TRACE"),
            Level::Debug => Some("DEBUG"),
            Level::Info => Some("INFO"),
            Level::Notice => Some("NOTICE"),
            Level::Success => Some("SUCCESS"),
            Level::Warning => Some("WARNING"),
            Level::Error => Some("ERROR"),
            Level::Fail => Some("FAIL"),
            Level::Critical => Some("CRITICAL"),
            Level::Fatal => Some("FATAL"),
            Level::Custom(_) => None,
        }
    }

    /// Parses a built-in level name (case-insensitive). Custom names are
    /// resolved through [`LevelRegistry::resolve`] instead.
    pub fn from_name(name: &str) -> Option<Level> {
        match name.to_ascii_uppercase().as_str() {
            "TRACE" => Some(Level::Trace),
            "DEBUG" => Some(Level::Debug),
            "INFO" => Some(Level::Info),
            "NOTICE" => Some(Level::Notice),
            "SUCCESS" => Some(Level::Success),
            "WARNING" | "WARN" => Some(Level::Warning),
            "ERROR" => Some(Level::Error),
            "FAIL" => Some(Level::Fail),
            "CRITICAL" => Some(Level::Critical),
            "FATAL" => Some(Level::Fatal),
            _ => None,
        }
    }

    /// True when a record at this level passes a `min_level` gate.
    #[inline]
    pub fn at_least(self, min: Level) -> bool {
        self.priority() >= min.priority()
    }
}

impl PartialOrd for Level {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Level {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority().cmp(&other.priority())
    }
}

/// A user-registered level definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomLevel {
    /// Upper-cased display name.
    pub name: String,
    /// Numeric priority; may collide with a built-in priority.
    pub priority: u8,
    /// ANSI style hint (color name or code) used by the formatter.
    pub style: String,
}

/// Registry of custom levels for one logger.
///
/// Registration is last-writer-wins per priority: registering a second level
/// at the same priority replaces the display name and style for that
/// priority, while every registered name stays resolvable.
#[derive(Default)]
pub struct LevelRegistry {
    by_priority: RwLock<AHashMap<u8, CustomLevel>>,
    by_name: RwLock<AHashMap<String, u8>>,
}

impl LevelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom level. The name is stored upper-cased.
    pub fn register(&self, name: &str, priority: u8, style: &str) -> Level {
        let upper = name.to_ascii_uppercase();
        let level = CustomLevel {
            name: upper.clone(),
            priority,
            style: style.to_string(),
        };
        self.by_priority.write().insert(priority, level);
        self.by_name.write().insert(upper, priority);
        Level::Custom(priority)
    }

    /// Resolves a level name: built-ins first, then registered custom names.
    pub fn resolve(&self, name: &str) -> Option<Level> {
        if let Some(level) = Level::from_name(name) {
            return Some(level);
        }
        self.by_name
            .read()
            .get(&name.to_ascii_uppercase())
            .map(|p| Level::Custom(*p))
    }

    /// Display name for a level. Custom registrations shadow built-in names
    /// at the same priority; unregistered custom priorities render as
    /// `LEVEL<n>`.
    pub fn name_of(&self, level: Level) -> String {
        if let Some(custom) = self.by_priority.read().get(&level.priority()) {
            return custom.name.clone();
        }
        match level.builtin_name() {
            Some(name) => name.to_string(),
            None => format!("LEVEL{}", level.priority()),
        }
    }

    /// Style hint for a custom level at this priority, if registered.
    pub fn style_of(&self, level: Level) -> Option<String> {
        self.by_priority
            .read()
            .get(&level.priority())
            .map(|c| c.style.clone())
    }
}
