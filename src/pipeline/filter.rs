//! Record admission filtering.
//!
//! A filter evaluates an ordered rule list. The first matching deny rule
//! rejects the record; an allow rule that matches short-circuits past any
//! later denies; level gates reject immediately when violated. A record no
//! rule claims is admitted. The hot path borrows everything and allocates
//! nothing.

use crate::levels::Level;
use crate::record::Record;

/// What a matching module/message rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Allow,
    Deny,
}

/// One admission rule.
#[derive(Debug, Clone)]
pub enum FilterRule {
    /// Reject records below this level.
    MinLevel(Level),
    /// Reject records above this level.
    MaxLevel(Level),
    /// Match records whose module starts with the prefix.
    ModulePrefix { prefix: String, action: FilterAction },
    /// Match records whose message contains the substring.
    MessageSubstring { needle: String, action: FilterAction },
}

/// Ordered admission rules for a logger or a single sink.
#[derive(Debug, Clone, Default)]
pub struct FilterConfig {
    pub rules: Vec<FilterRule>,
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.rules.push(FilterRule::MinLevel(level));
        self
    }

    pub fn max_level(mut self, level: Level) -> Self {
        self.rules.push(FilterRule::MaxLevel(level));
        self
    }

    pub fn module_prefix(mut self, prefix: &str, action: FilterAction) -> Self {
        self.rules.push(FilterRule::ModulePrefix {
            prefix: prefix.to_string(),
            action,
        });
        self
    }

    pub fn message_substring(mut self, needle: &str, action: FilterAction) -> Self {
        self.rules.push(FilterRule::MessageSubstring {
            needle: needle.to_string(),
            action,
        });
        self
    }
}

/// A compiled filter. Evaluation is pure and allocation-free.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    rules: Vec<FilterRule>,
}

impl Filter {
    pub fn new(config: FilterConfig) -> Filter {
        Filter {
            rules: config.rules,
        }
    }

    /// Decides whether a record enters the pipeline.
    pub fn admit(&self, record: &Record) -> bool {
        for rule in &self.rules {
            match rule {
                FilterRule::MinLevel(min) => {
                    if record.level.priority() < min.priority() {
                        return false;
                    }
                }
                FilterRule::MaxLevel(max) => {
                    if record.level.priority() > max.priority() {
                        return false;
                    }
                }
                FilterRule::ModulePrefix { prefix, action } => {
                    let matched = record
                        .module()
                        .is_some_and(|module| module.starts_with(prefix.as_str()));
                    if matched {
                        match action {
                            FilterAction::Deny => return false,
                            FilterAction::Allow => return true,
                        }
                    }
                }
                FilterRule::MessageSubstring { needle, action } => {
                    if record.message.contains(needle.as_str()) {
                        match action {
                            FilterAction::Deny => return false,
                            FilterAction::Allow => return true,
                        }
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(level: Level, message: &str) -> Record {
        Record::new(level, "X", message).unwrap()
    }

    fn record_in_module(level: Level, message: &str, module: &str) -> Record {
        let mut r = record(level, message);
        r.module_label = Some(module.to_string());
        r
    }

    #[test]
    fn test_empty_filter_admits_everything() {
        let filter = Filter::new(FilterConfig::new());
        assert!(filter.admit(&record(Level::Trace, "x")));
        assert!(filter.admit(&record(Level::Fatal, "x")));
    }

    #[test]
    fn test_min_level_gate() {
        let filter = Filter::new(FilterConfig::new().min_level(Level::Warning));
        assert!(!filter.admit(&record(Level::Trace, "x")));
        assert!(!filter.admit(&record(Level::Debug, "x")));
        assert!(!filter.admit(&record(Level::Info, "x")));
        assert!(filter.admit(&record(Level::Warning, "x")));
        assert!(filter.admit(&record(Level::Error, "x")));
        assert!(filter.admit(&record(Level::Critical, "x")));
    }

    #[test]
    fn test_max_level_gate() {
        let filter = Filter::new(FilterConfig::new().max_level(Level::Warning));
        assert!(filter.admit(&record(Level::Info, "x")));
        assert!(!filter.admit(&record(Level::Error, "x")));
    }

    #[test]
    fn test_module_prefix_deny() {
        let filter = Filter::new(FilterConfig::new().module_prefix("noisy", FilterAction::Deny));
        assert!(!filter.admit(&record_in_module(Level::Info, "x", "noisy::inner")));
        assert!(filter.admit(&record_in_module(Level::Info, "x", "quiet::inner")));
        // No module at all: the rule does not match.
        assert!(filter.admit(&record(Level::Info, "x")));
    }

    #[test]
    fn test_allow_short_circuits_later_deny() {
        let filter = Filter::new(
            FilterConfig::new()
                .module_prefix("app::audit", FilterAction::Allow)
                .message_substring("debug", FilterAction::Deny),
        );
        // The allow match wins before the deny is consulted.
        assert!(filter.admit(&record_in_module(Level::Info, "debug detail", "app::audit")));
        assert!(!filter.admit(&record_in_module(Level::Info, "debug detail", "app::web")));
    }

    #[test]
    fn test_deny_short_circuits() {
        let filter = Filter::new(
            FilterConfig::new()
                .message_substring("secret", FilterAction::Deny)
                .message_substring("secret", FilterAction::Allow),
        );
        assert!(!filter.admit(&record(Level::Info, "a secret thing")));
    }

    #[test]
    fn test_admit_is_idempotent() {
        let filter = Filter::new(
            FilterConfig::new()
                .min_level(Level::Debug)
                .message_substring("drop me", FilterAction::Deny),
        );
        for message in ["keep", "drop me"] {
            let r = record(Level::Info, message);
            let first = filter.admit(&r);
            let second = filter.admit(&r);
            assert_eq!(first, second);
        }
    }
}
