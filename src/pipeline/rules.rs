//! The rules engine: pattern-triggered annotations.
//!
//! After a record clears filtering, sampling, and redaction, registered
//! rules match against its message and append guidance notes (cause, fix,
//! docs, note) the sinks render alongside the record. Single-shot rules fire
//! once per process.

use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;

use crate::error::Result;
use crate::pipeline::redactor::glob_to_regex;
use crate::record::{Record, RuleCategory, RuleNote};

/// How a rule locates matching records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleMatch {
    /// Message contains the pattern.
    #[default]
    Substring,
    /// Message matches the simple glob (`*`, `+`, `.`, `\d`, `\w`, `\s`).
    SimpleGlob,
}

/// One annotation rule.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    pub pattern: String,
    pub matcher: RuleMatch,
    pub category: RuleCategory,
    pub text: String,
    pub url: Option<String>,
    /// Fire at most once per process.
    pub once: bool,
}

impl RuleSpec {
    pub fn substring(pattern: &str, category: RuleCategory, text: &str) -> RuleSpec {
        RuleSpec {
            pattern: pattern.to_string(),
            matcher: RuleMatch::Substring,
            category,
            text: text.to_string(),
            url: None,
            once: false,
        }
    }

    pub fn with_url(mut self, url: &str) -> RuleSpec {
        self.url = Some(url.to_string());
        self
    }

    pub fn once(mut self) -> RuleSpec {
        self.once = true;
        self
    }
}

/// Ordered rule set handed to the logger.
#[derive(Debug, Clone, Default)]
pub struct RulesConfig {
    pub rules: Vec<RuleSpec>,
}

impl RulesConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, spec: RuleSpec) -> Self {
        self.rules.push(spec);
        self
    }
}

struct CompiledRule {
    spec: RuleSpec,
    regex: Option<Regex>,
    fired: AtomicBool,
}

/// The live rules engine.
#[derive(Default)]
pub struct RulesEngine {
    rules: Vec<CompiledRule>,
}

impl RulesEngine {
    /// Compiles the rule set; a bad glob is a configuration error.
    pub fn new(config: RulesConfig) -> Result<RulesEngine> {
        let mut rules = Vec::with_capacity(config.rules.len());
        for spec in config.rules {
            let regex = match spec.matcher {
                RuleMatch::SimpleGlob => Some(glob_to_regex(&spec.pattern)?),
                RuleMatch::Substring => None,
            };
            rules.push(CompiledRule {
                spec,
                regex,
                fired: AtomicBool::new(false),
            });
        }
        Ok(RulesEngine { rules })
    }

    /// Appends annotations for every matching rule, in registration order.
    pub fn annotate(&self, record: &mut Record) {
        for rule in &self.rules {
            if rule.spec.once && rule.fired.load(Ordering::Acquire) {
                continue;
            }
            let matched = match &rule.regex {
                Some(regex) => regex.is_match(&record.message),
                None => record.message.contains(rule.spec.pattern.as_str()),
            };
            if !matched {
                continue;
            }
            if rule.spec.once && rule.fired.swap(true, Ordering::AcqRel) {
                continue;
            }
            record.annotate(RuleNote {
                category: rule.spec.category,
                text: rule.spec.text.clone(),
                url: rule.spec.url.clone(),
            });
        }
    }
}
