//! Sensitive-text redaction.
//!
//! Patterns are evaluated in registration order against message text and
//! string context values. Matches are rewritten with one of five redaction
//! styles. When a partial style would leave the pattern still matching (a
//! short needle whose kept characters reproduce it), the rewrite degrades to
//! the full `[REDACTED]` marker so one pass always clears every match.
//!
//! Returned text is borrowed unchanged when nothing matched.

use std::borrow::Cow;

use regex::Regex;

use crate::error::{LogError, Result};
use crate::record::ContextValue;

pub const REDACTED: &str = "[REDACTED]";

/// How a pattern locates sensitive text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// The whole text equals the pattern.
    Exact,
    /// The text starts with the pattern; the prefix is redacted.
    Prefix,
    /// The text ends with the pattern; the suffix is redacted.
    Suffix,
    /// Every occurrence of the substring is redacted.
    Contains,
    /// A simple glob supporting `*`, `+`, `.`, `\d`, `\w`, `\s`.
    SimpleGlob,
}

/// How matched text is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionStyle {
    /// Replace the match with `[REDACTED]`.
    Full,
    /// Mask all but the last 4 characters.
    PartialStart,
    /// Mask all but the first 4 characters.
    PartialEnd,
    /// Keep the first 3 and last 3 characters.
    MaskMiddle,
    /// Replace with a 16-hex-digit digest of the match.
    Hash,
}

/// Translates the simple-glob dialect into an anchored-free regex.
///
/// `*` is any run (possibly empty), `+` any non-empty run, `.` any single
/// character; `\d`, `\w`, `\s` pass through as classes. Everything else is
/// literal.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '+' => out.push_str(".+"),
            '.' => out.push('.'),
            '\\' => match chars.next() {
                Some(class @ ('d' | 'w' | 's')) => {
                    out.push('\\');
                    out.push(class);
                }
                Some(other) => out.push_str(&regex::escape(&other.to_string())),
                None => out.push_str("\\\\"),
            },
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    Regex::new(&out).map_err(|e| LogError::Configuration(format!("invalid glob pattern: {}", e)))
}

fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

struct CompiledPattern {
    kind: PatternKind,
    pattern: String,
    regex: Option<Regex>,
    style: RedactionStyle,
}

impl CompiledPattern {
    /// Rewrites one matched chunk per the style, degrading to the full
    /// marker when the kept characters would still match the pattern.
    fn rewrite(&self, matched: &str) -> String {
        let chars: Vec<char> = matched.chars().collect();
        let n = chars.len();
        let candidate = match self.style {
            RedactionStyle::Full => REDACTED.to_string(),
            RedactionStyle::PartialStart => {
                if n <= 4 {
                    "*".repeat(n)
                } else {
                    let mut s = "*".repeat(n - 4);
                    s.extend(&chars[n - 4..]);
                    s
                }
            }
            RedactionStyle::PartialEnd => {
                if n <= 4 {
                    "*".repeat(n)
                } else {
                    let mut s: String = chars[..4].iter().collect();
                    s.push_str(&"*".repeat(n - 4));
                    s
                }
            }
            RedactionStyle::MaskMiddle => {
                if n <= 6 {
                    "*".repeat(n)
                } else {
                    let mut s: String = chars[..3].iter().collect();
                    s.push_str(&"*".repeat(n - 6));
                    s.extend(&chars[n - 3..]);
                    s
                }
            }
            RedactionStyle::Hash => format!("{:016x}", fnv1a(matched)),
        };
        if self.still_matches(&candidate) {
            REDACTED.to_string()
        } else {
            candidate
        }
    }

    fn still_matches(&self, text: &str) -> bool {
        match self.kind {
            PatternKind::Exact => text == self.pattern,
            PatternKind::Prefix => text.starts_with(self.pattern.as_str()),
            PatternKind::Suffix => text.ends_with(self.pattern.as_str()),
            PatternKind::Contains => text.contains(self.pattern.as_str()),
            PatternKind::SimpleGlob => self
                .regex
                .as_ref()
                .is_some_and(|re| re.is_match(text)),
        }
    }

    fn apply<'a>(&self, text: Cow<'a, str>) -> Cow<'a, str> {
        match self.kind {
            PatternKind::Exact => {
                if text.as_ref() == self.pattern {
                    Cow::Owned(self.rewrite(text.as_ref()))
                } else {
                    text
                }
            }
            PatternKind::Prefix => {
                if text.starts_with(self.pattern.as_str()) {
                    let rest = text[self.pattern.len()..].to_string();
                    Cow::Owned(format!("{}{}", self.rewrite(&self.pattern), rest))
                } else {
                    text
                }
            }
            PatternKind::Suffix => {
                if text.ends_with(self.pattern.as_str()) {
                    let keep = text.len() - self.pattern.len();
                    let head = text[..keep].to_string();
                    Cow::Owned(format!("{}{}", head, self.rewrite(&self.pattern)))
                } else {
                    text
                }
            }
            PatternKind::Contains => {
                if text.contains(self.pattern.as_str()) {
                    Cow::Owned(text.replace(self.pattern.as_str(), &self.rewrite(&self.pattern)))
                } else {
                    text
                }
            }
            PatternKind::SimpleGlob => {
                let Some(regex) = &self.regex else { return text };
                if regex.is_match(text.as_ref()) {
                    let replaced = regex
                        .replace_all(text.as_ref(), |caps: &regex::Captures| {
                            self.rewrite(&caps[0])
                        })
                        .into_owned();
                    Cow::Owned(replaced)
                } else {
                    text
                }
            }
        }
    }
}

/// An ordered set of redaction patterns.
#[derive(Default)]
pub struct Redactor {
    patterns: Vec<CompiledPattern>,
}

impl Redactor {
    pub fn new() -> Redactor {
        Redactor::default()
    }

    /// Registers a pattern. Globs compile here; a bad glob is a
    /// configuration error.
    pub fn with(mut self, kind: PatternKind, pattern: &str, style: RedactionStyle) -> Result<Self> {
        let regex = match kind {
            PatternKind::SimpleGlob => Some(glob_to_regex(pattern)?),
            _ => None,
        };
        self.patterns.push(CompiledPattern {
            kind,
            pattern: pattern.to_string(),
            regex,
            style,
        });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Applies every pattern in order. Borrowed when nothing matched.
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut current = Cow::Borrowed(text);
        for pattern in &self.patterns {
            current = pattern.apply(current);
        }
        current
    }

    /// Redacts a context value; only string scalars carry text.
    pub fn apply_value(&self, value: &ContextValue) -> Option<ContextValue> {
        match value {
            ContextValue::Str(s) => match self.apply(s) {
                Cow::Borrowed(_) => None,
                Cow::Owned(redacted) => Some(ContextValue::Str(redacted)),
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_full() {
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "password=", RedactionStyle::Full)
            .unwrap();
        let out = redactor.apply("login password=secret ok");
        assert_eq!(out, "login [REDACTED]secret ok");
    }

    #[test]
    fn test_unmatched_borrows() {
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "password", RedactionStyle::Full)
            .unwrap();
        let input = "nothing sensitive here";
        match redactor.apply(input) {
            Cow::Borrowed(s) => assert_eq!(s, input),
            Cow::Owned(_) => panic!("expected borrowed passthrough"),
        }
    }

    #[test]
    fn test_exact_only_whole_text() {
        let redactor = Redactor::new()
            .with(PatternKind::Exact, "hunter2", RedactionStyle::Full)
            .unwrap();
        assert_eq!(redactor.apply("hunter2"), REDACTED);
        assert_eq!(redactor.apply("hunter2 extra"), "hunter2 extra");
    }

    #[test]
    fn test_prefix_and_suffix() {
        let redactor = Redactor::new()
            .with(PatternKind::Prefix, "Bearer ", RedactionStyle::Full)
            .unwrap();
        assert_eq!(redactor.apply("Bearer abc123"), "[REDACTED]abc123");

        let redactor = Redactor::new()
            .with(PatternKind::Suffix, "@internal.example", RedactionStyle::Full)
            .unwrap();
        assert_eq!(redactor.apply("alice@internal.example"), "alice[REDACTED]");
    }

    #[test]
    fn test_partial_styles() {
        let redactor = Redactor::new()
            .with(
                PatternKind::Contains,
                "4111222233334444",
                RedactionStyle::PartialStart,
            )
            .unwrap();
        assert_eq!(redactor.apply("card 4111222233334444"), "card ************4444");

        let redactor = Redactor::new()
            .with(
                PatternKind::Contains,
                "4111222233334444",
                RedactionStyle::PartialEnd,
            )
            .unwrap();
        assert_eq!(redactor.apply("card 4111222233334444"), "card 4111************");

        let redactor = Redactor::new()
            .with(
                PatternKind::Contains,
                "4111222233334444",
                RedactionStyle::MaskMiddle,
            )
            .unwrap();
        assert_eq!(redactor.apply("card 4111222233334444"), "card 411**********444");
    }

    #[test]
    fn test_hash_is_deterministic() {
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "token-abc", RedactionStyle::Hash)
            .unwrap();
        let a = redactor.apply("x token-abc y").into_owned();
        let b = redactor.apply("x token-abc y").into_owned();
        assert_eq!(a, b);
        assert!(!a.contains("token-abc"));
        // 16 hex digits replace the needle.
        let digest = a
            .trim_start_matches("x ")
            .trim_end_matches(" y")
            .to_string();
        assert_eq!(digest.len(), 16);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_short_needle_partial_degrades_to_full() {
        // Keeping the first 4 of a 4-char needle would reproduce it.
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "key=", RedactionStyle::PartialEnd)
            .unwrap();
        let out = redactor.apply("key=abc");
        assert!(!out.contains("key="), "closure violated: {}", out);
    }

    #[test]
    fn test_glob_digits() {
        let redactor = Redactor::new()
            .with(
                PatternKind::SimpleGlob,
                r"ssn \d\d\d-\d\d-\d\d\d\d",
                RedactionStyle::Full,
            )
            .unwrap();
        assert_eq!(redactor.apply("has ssn 123-45-6789 inside"), "has [REDACTED] inside");
        assert_eq!(redactor.apply("ssn 12-34"), "ssn 12-34");
    }

    #[test]
    fn test_glob_star_and_dot() {
        let redactor = Redactor::new()
            .with(PatternKind::SimpleGlob, "secret=.+", RedactionStyle::Full)
            .unwrap();
        assert_eq!(redactor.apply("a secret=anything here"), "a [REDACTED]");
    }

    #[test]
    fn test_closure_one_pass_clears_all_matches() {
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "password=", RedactionStyle::Full)
            .unwrap()
            .with(PatternKind::SimpleGlob, r"\d\d\d\d-\d\d\d\d", RedactionStyle::Hash)
            .unwrap();
        let out = redactor
            .apply("password=a password=b pin 1234-5678 and 9999-0000")
            .into_owned();
        assert!(!out.contains("password="));
        let digits = Regex::new(r"\d{4}-\d{4}").unwrap();
        assert!(!digits.is_match(&out), "digits survived: {}", out);
    }

    #[test]
    fn test_registration_order_applies() {
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "alpha beta", RedactionStyle::Full)
            .unwrap()
            .with(PatternKind::Contains, "beta", RedactionStyle::Hash)
            .unwrap();
        // First pattern consumes the phrase before the second sees it.
        let out = redactor.apply("alpha beta gamma");
        assert_eq!(out, "[REDACTED] gamma");
    }

    #[test]
    fn test_apply_value_only_strings() {
        let redactor = Redactor::new()
            .with(PatternKind::Contains, "secret", RedactionStyle::Full)
            .unwrap();
        assert_eq!(
            redactor.apply_value(&ContextValue::Str("a secret".into())),
            Some(ContextValue::Str("a [REDACTED]".into()))
        );
        assert_eq!(redactor.apply_value(&ContextValue::Int(5)), None);
        assert_eq!(
            redactor.apply_value(&ContextValue::Str("clean".into())),
            None
        );
    }
}
