//! The record admission pipeline.
//!
//! Stage order is fixed: level gate (in the logger), then
//! [`Filter`](filter::Filter) admission, [`Sampler`](sampler::Sampler)
//! acceptance, [`Redactor`](redactor::Redactor) rewriting of message and
//! context, and finally [`RulesEngine`](rules::RulesEngine) annotation.
//! Every stage is optional; an absent stage is the identity.
//!
//! Stages swap atomically: setters store a new `Arc`, and in-flight readers
//! keep the previous stage alive until they finish.

pub mod filter;
pub mod redactor;
pub mod rules;
pub mod sampler;

use std::borrow::Cow;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::record::Record;

use filter::Filter;
use redactor::Redactor;
use rules::RulesEngine;
use sampler::Sampler;

/// Why the pipeline refused a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Filtered,
    Sampled,
}

/// Hot-swappable pipeline stages shared by a logger and its dispatcher.
#[derive(Default)]
pub struct Pipeline {
    filter: ArcSwapOption<Filter>,
    sampler: ArcSwapOption<Sampler>,
    redactor: ArcSwapOption<Redactor>,
    rules: ArcSwapOption<RulesEngine>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline::default()
    }

    pub fn set_filter(&self, filter: Option<Filter>) {
        self.filter.store(filter.map(Arc::new));
    }

    pub fn set_sampler(&self, sampler: Option<Sampler>) {
        self.sampler.store(sampler.map(Arc::new));
    }

    pub fn set_redactor(&self, redactor: Option<Redactor>) {
        self.redactor.store(redactor.map(Arc::new));
    }

    pub fn set_rules(&self, rules: Option<RulesEngine>) {
        self.rules.store(rules.map(Arc::new));
    }

    /// Runs the stages over a record. `Ok` means the record proceeds to
    /// dispatch, possibly rewritten and annotated.
    pub fn process(&self, record: &mut Record) -> Result<(), Rejection> {
        if let Some(filter) = self.filter.load_full() {
            if !filter.admit(record) {
                return Err(Rejection::Filtered);
            }
        }
        if let Some(sampler) = self.sampler.load_full() {
            if !sampler.accept(record) {
                return Err(Rejection::Sampled);
            }
        }
        if let Some(redactor) = self.redactor.load_full() {
            if !redactor.is_empty() {
                if let Cow::Owned(clean) = redactor.apply(&record.message) {
                    record.message = clean;
                }
                self.redact_context(&redactor, record);
            }
        }
        if let Some(rules) = self.rules.load_full() {
            rules.annotate(record);
        }
        Ok(())
    }

    // Rebuilds the context chain only when some value actually changed.
    fn redact_context(&self, redactor: &Redactor, record: &mut Record) {
        let pairs = record.context_pairs();
        let mut changed = false;
        let redacted: Vec<_> = pairs
            .into_iter()
            .map(|(key, value)| match redactor.apply_value(&value) {
                Some(clean) => {
                    changed = true;
                    (key, clean)
                }
                None => (key, value),
            })
            .collect();
        if changed {
            let mut chain = crate::record::ContextChain::new();
            for (key, value) in redacted {
                chain = chain.bind(key, value);
            }
            record.context = chain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::Level;
    use crate::pipeline::filter::{FilterAction, FilterConfig};
    use crate::pipeline::redactor::{PatternKind, RedactionStyle};
    use crate::record::{ContextValue, RuleCategory};
    use crate::pipeline::rules::{RuleSpec, RulesConfig};

    fn record(message: &str) -> Record {
        Record::new(Level::Info, "INFO", message).unwrap()
    }

    #[test]
    fn test_empty_pipeline_admits() {
        let pipeline = Pipeline::new();
        let mut r = record("anything");
        assert!(pipeline.process(&mut r).is_ok());
        assert_eq!(r.message, "anything");
    }

    #[test]
    fn test_filter_rejection() {
        let pipeline = Pipeline::new();
        pipeline.set_filter(Some(Filter::new(
            FilterConfig::new().message_substring("drop", FilterAction::Deny),
        )));
        let mut r = record("please drop this");
        assert_eq!(pipeline.process(&mut r), Err(Rejection::Filtered));
        let mut keep = record("keep this");
        assert!(pipeline.process(&mut keep).is_ok());
    }

    #[test]
    fn test_sampler_rejection() {
        let pipeline = Pipeline::new();
        pipeline.set_sampler(Some(Sampler::probability(0.0)));
        let mut r = record("sampled away");
        assert_eq!(pipeline.process(&mut r), Err(Rejection::Sampled));
    }

    #[test]
    fn test_redaction_rewrites_message_and_context() {
        let pipeline = Pipeline::new();
        pipeline.set_redactor(Some(
            Redactor::new()
                .with(PatternKind::Contains, "password=secret", RedactionStyle::Full)
                .unwrap(),
        ));
        let mut r = record("login password=secret ok");
        r.context = r
            .context
            .bind("note", "the password=secret leaked")
            .bind("attempt", 1i64);
        pipeline.process(&mut r).unwrap();
        assert_eq!(r.message, "login [REDACTED] ok");
        assert_eq!(
            r.context.get("note"),
            Some(ContextValue::Str("the [REDACTED] leaked".into()))
        );
        assert_eq!(r.context.get("attempt"), Some(ContextValue::Int(1)));
    }

    #[test]
    fn test_rules_annotate_after_redaction() {
        let pipeline = Pipeline::new();
        pipeline.set_redactor(Some(
            Redactor::new()
                .with(PatternKind::Contains, "token", RedactionStyle::Full)
                .unwrap(),
        ));
        pipeline.set_rules(Some(
            RulesEngine::new(RulesConfig::new().rule(RuleSpec::substring(
                "[REDACTED]",
                RuleCategory::Note,
                "credentials were scrubbed",
            )))
            .unwrap(),
        ));
        let mut r = record("sent token upstream");
        pipeline.process(&mut r).unwrap();
        assert_eq!(r.message, "sent [REDACTED] upstream");
        assert_eq!(r.annotations.len(), 1);
    }

    #[test]
    fn test_stage_swap_takes_effect() {
        let pipeline = Pipeline::new();
        pipeline.set_filter(Some(Filter::new(
            FilterConfig::new().message_substring("x", FilterAction::Deny),
        )));
        let mut r = record("x");
        assert!(pipeline.process(&mut r).is_err());
        pipeline.set_filter(None);
        let mut r = record("x");
        assert!(pipeline.process(&mut r).is_ok());
    }

    #[test]
    fn test_admit_decision_idempotent() {
        let pipeline = Pipeline::new();
        pipeline.set_filter(Some(Filter::new(
            FilterConfig::new().min_level(Level::Warning),
        )));
        let mut r = Record::new(Level::Error, "ERROR", "boom").unwrap();
        assert!(pipeline.process(&mut r).is_ok());
        // A second pass over the already-processed record decides the same.
        assert!(pipeline.process(&mut r).is_ok());
    }
}
