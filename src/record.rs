//! The log record data model.
//!
//! A [`Record`] is one log event: level, timestamps, message, optional source
//! location, a snapshot of the logger's context bindings, trace correlation
//! ids, and any annotations attached by the rules engine. Once a record
//! enters the pipeline its level, timestamps, message, and source are
//! immutable; only the owning pipeline stage appends context or annotations.
//!
//! Context bindings are kept as an immutable persistent chain so a record
//! snapshot is a single `Arc` clone rather than a map copy.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::error::Result;
use crate::levels::Level;

/// A scalar value attached to a context binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl ContextValue {
    /// Converts to the matching `serde_json` value, preserving the type.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ContextValue::Str(s) => serde_json::Value::String(s.clone()),
            ContextValue::Int(i) => serde_json::Value::from(*i),
            ContextValue::Float(x) => serde_json::Value::from(*x),
            ContextValue::Bool(b) => serde_json::Value::Bool(*b),
            ContextValue::Null => serde_json::Value::Null,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Str(s) => f.write_str(s),
            ContextValue::Int(i) => write!(f, "{}", i),
            ContextValue::Float(x) => write!(f, "{}", x),
            ContextValue::Bool(b) => write!(f, "{}", b),
            ContextValue::Null => f.write_str("null"),
        }
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Str(s.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::Str(s)
    }
}

impl From<i64> for ContextValue {
    fn from(i: i64) -> Self {
        ContextValue::Int(i)
    }
}

impl From<i32> for ContextValue {
    fn from(i: i32) -> Self {
        ContextValue::Int(i as i64)
    }
}

impl From<u64> for ContextValue {
    fn from(i: u64) -> Self {
        ContextValue::Int(i as i64)
    }
}

impl From<f64> for ContextValue {
    fn from(x: f64) -> Self {
        ContextValue::Float(x)
    }
}

impl From<bool> for ContextValue {
    fn from(b: bool) -> Self {
        ContextValue::Bool(b)
    }
}

struct ContextNode {
    key: String,
    value: ContextValue,
    parent: Option<Arc<ContextNode>>,
}

/// An immutable chain of context bindings.
///
/// `bind` and `unbind` return new chains sharing structure with the old one;
/// records snapshot the chain by cloning the head `Arc`, so later mutations
/// on the logger never touch already-enqueued records.
#[derive(Clone, Default)]
pub struct ContextChain {
    head: Option<Arc<ContextNode>>,
}

/// Inline capacity for a record's flattened context pairs.
pub type ContextPairs = SmallVec<[(String, ContextValue); 8]>;

impl ContextChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a chain with `key` bound to `value`, shadowing earlier binds.
    pub fn bind(&self, key: impl Into<String>, value: impl Into<ContextValue>) -> ContextChain {
        ContextChain {
            head: Some(Arc::new(ContextNode {
                key: key.into(),
                value: value.into(),
                parent: self.head.clone(),
            })),
        }
    }

    /// Returns a chain with every binding for `key` removed. Nodes below the
    /// removed entries are rebuilt; untouched tails stay shared.
    pub fn unbind(&self, key: &str) -> ContextChain {
        let mut kept: Vec<(String, ContextValue)> = Vec::new();
        let mut node = self.head.as_ref();
        while let Some(n) = node {
            if n.key != key {
                kept.push((n.key.clone(), n.value.clone()));
            }
            node = n.parent.as_ref();
        }
        let mut chain = ContextChain::new();
        for (k, v) in kept.into_iter().rev() {
            chain = chain.bind(k, v);
        }
        chain
    }

    /// Looks up the most recent binding for `key`.
    pub fn get(&self, key: &str) -> Option<ContextValue> {
        let mut node = self.head.as_ref();
        while let Some(n) = node {
            if n.key == key {
                return Some(n.value.clone());
            }
            node = n.parent.as_ref();
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Flattens the chain into pairs, oldest binding first, with newer binds
    /// shadowing older ones for the same key.
    pub fn pairs(&self) -> ContextPairs {
        let mut newest_first: ContextPairs = SmallVec::new();
        let mut node = self.head.as_ref();
        while let Some(n) = node {
            if !newest_first.iter().any(|(k, _)| k == &n.key) {
                newest_first.push((n.key.clone(), n.value.clone()));
            }
            node = n.parent.as_ref();
        }
        newest_first.reverse();
        newest_first
    }
}

/// The category of a rule annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    /// Likely root cause of the logged condition.
    Cause,
    /// Suggested remediation.
    Fix,
    /// Pointer to documentation.
    Docs,
    /// Free-form note.
    Note,
}

impl RuleCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            RuleCategory::Cause => "cause",
            RuleCategory::Fix => "fix",
            RuleCategory::Docs => "docs",
            RuleCategory::Note => "note",
        }
    }
}

/// Guidance attached to a record by the rules engine after filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleNote {
    pub category: RuleCategory,
    pub text: String,
    pub url: Option<String>,
}

/// Where a log call originated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub module: String,
}

impl SourceLocation {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        function: impl Into<String>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
            module: module.into(),
        }
    }
}

/// One log event and its metadata.
pub struct Record {
    /// Severity. Immutable after construction.
    pub level: Level,
    /// Display name resolved against the owning logger's level registry.
    pub level_name: String,
    /// Wall-clock instant at creation.
    pub timestamp: DateTime<Utc>,
    /// Monotonic capture for latency accounting.
    pub monotonic: Instant,
    /// The log message (UTF-8, owned).
    pub message: String,
    /// Optional source location.
    pub source: Option<SourceLocation>,
    /// Module label layered by scoped loggers; source module wins when both
    /// are present and the source carries one.
    pub module_label: Option<String>,
    /// Name (or id) of the producing thread.
    pub thread: String,
    /// Snapshot of the logger's context bindings at call time.
    pub context: ContextChain,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub correlation_id: Option<String>,
    /// Rendered backtrace, captured iff level >= error and enabled.
    pub backtrace: Option<String>,
    /// Annotations appended by the rules engine; ordered by rule position.
    pub annotations: SmallVec<[RuleNote; 2]>,
}

impl Record {
    /// Builds a record, copying the message through a fallible allocation so
    /// memory exhaustion surfaces as [`LogError::OutOfMemory`] instead of an
    /// abort.
    pub fn new(level: Level, level_name: impl Into<String>, message: &str) -> Result<Record> {
        let mut owned = String::new();
        owned.try_reserve_exact(message.len())?;
        owned.push_str(message);
        Ok(Record::from_owned(level, level_name, owned))
    }

    /// Builds a record from an already-owned message.
    pub fn from_owned(level: Level, level_name: impl Into<String>, message: String) -> Record {
        let thread = std::thread::current()
            .name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("{:?}", std::thread::current().id()));
        Record {
            level,
            level_name: level_name.into(),
            timestamp: Utc::now(),
            monotonic: Instant::now(),
            message,
            source: None,
            module_label: None,
            thread,
            context: ContextChain::new(),
            trace_id: None,
            span_id: None,
            correlation_id: None,
            backtrace: None,
            annotations: SmallVec::new(),
        }
    }

    /// The module this record reports: the source module when present,
    /// otherwise the scoped logger's label.
    pub fn module(&self) -> Option<&str> {
        match &self.source {
            Some(src) if !src.module.is_empty() => Some(src.module.as_str()),
            _ => self.module_label.as_deref(),
        }
    }

    /// Appends a rule annotation. Reserved to the pipeline's rules stage.
    pub(crate) fn annotate(&mut self, note: RuleNote) {
        self.annotations.push(note);
    }

    /// Flattened context pairs for formatting.
    pub fn context_pairs(&self) -> ContextPairs {
        self.context.pairs()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("level", &self.level)
            .field("level_name", &self.level_name)
            .field("timestamp", &self.timestamp)
            .field("message", &self.message)
            .field("source", &self.source)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

#[allow(unused)]
fn _assert_record_send() {
    fn is_send<T: Send>() {}
    is_send::<Record>();
}
