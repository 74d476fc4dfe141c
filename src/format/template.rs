//! Text template rendering.
//!
//! Templates use `{placeholder}` syntax with an optional `{time:PATTERN}`
//! format override. Recognized placeholders: `{time}`, `{level}`,
//! `{message}`, `{module}`, `{function}`, `{file}`, `{line}`, `{caller}`,
//! `{trace_id}`, `{span_id}`, `{thread}`, and `{diag.os|arch|cpu|cores|
//! ram_total_mb|ram_avail_mb}`. Context binding keys resolve as well.
//! Unknown placeholders render literally.
//!
//! Time patterns recognize `YYYY YY MM M DD D HH H mm m ss s SSS`, plus the
//! literals `unix` (whole seconds), `ISO8601`, and `default`
//! (= `YYYY-MM-DD HH:mm:ss.SSS`).

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::diag::DiagSnapshot;
use crate::record::Record;

const DEFAULT_TIME_PATTERN: &str = "YYYY-MM-DD HH:mm:ss.SSS";

/// Converts a `YYYY-MM-DD`-style pattern to a chrono format string.
///
/// Tokens are matched longest-first at each position so `mm` and `m` can
/// coexist; everything else passes through literally.
fn convert_time_pattern(pattern: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("SSS", "%3f"),
        ("YYYY", "%Y"),
        ("YY", "%y"),
        ("MM", "%m"),
        ("M", "%-m"),
        ("DD", "%d"),
        ("D", "%-d"),
        ("HH", "%H"),
        ("H", "%-H"),
        ("mm", "%M"),
        ("m", "%-M"),
        ("ss", "%S"),
        ("s", "%-S"),
    ];
    let mut out = String::with_capacity(pattern.len() + 8);
    let bytes = pattern.as_bytes();
    let mut i = 0;
    'outer: while i < bytes.len() {
        for (token, repl) in TOKENS {
            if pattern[i..].starts_with(token) {
                out.push_str(repl);
                i += token.len();
                continue 'outer;
            }
        }
        let ch = pattern[i..].chars().next().unwrap_or('?');
        if ch == '%' {
            out.push_str("%%");
        } else {
            out.push(ch);
        }
        i += ch.len_utf8();
    }
    out
}

/// Formats a timestamp per a time pattern or one of the literal names.
pub fn format_time(timestamp: &DateTime<Utc>, pattern: &str) -> String {
    match pattern {
        "unix" => timestamp.timestamp().to_string(),
        "ISO8601" => timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        "" | "default" => timestamp
            .format(&convert_time_pattern(DEFAULT_TIME_PATTERN))
            .to_string(),
        custom => timestamp.format(&convert_time_pattern(custom)).to_string(),
    }
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-zA-Z_][a-zA-Z0-9_.]*)(?::([^}]*))?\}").unwrap());

/// True when `template` references `{key}` (with or without a format).
pub fn references(template: &str, key: &str) -> bool {
    PLACEHOLDER_RE
        .captures_iter(template)
        .any(|caps| &caps[1] == key)
}

/// Renders a record against a template. `time_format` applies to bare
/// `{time}`; `{time:PATTERN}` overrides it in place.
pub fn render(
    template: &str,
    record: &Record,
    time_format: &str,
    diag: Option<&DiagSnapshot>,
) -> String {
    let pairs = record.context_pairs();
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            let format_override = caps.get(2).map(|m| m.as_str());
            match key {
                "time" => format_time(&record.timestamp, format_override.unwrap_or(time_format)),
                "level" => record.level_name.clone(),
                "message" => record.message.clone(),
                "module" => record.module().unwrap_or("").to_string(),
                "function" => record
                    .source
                    .as_ref()
                    .map(|s| s.function.clone())
                    .unwrap_or_default(),
                "file" => record
                    .source
                    .as_ref()
                    .map(|s| s.file.clone())
                    .unwrap_or_default(),
                "line" => record
                    .source
                    .as_ref()
                    .map(|s| s.line.to_string())
                    .unwrap_or_default(),
                "caller" => record
                    .source
                    .as_ref()
                    .map(|s| format!("{}:{} in {}", s.file, s.line, s.function))
                    .unwrap_or_default(),
                "trace_id" => record.trace_id.clone().unwrap_or_default(),
                "span_id" => record.span_id.clone().unwrap_or_default(),
                "thread" => record.thread.clone(),
                _ => {
                    if let Some(field) = key.strip_prefix("diag.") {
                        if let Some(value) = diag.and_then(|d| d.field(field)) {
                            return value;
                        }
                    }
                    if let Some((_, value)) = pairs.iter().find(|(k, _)| k == key) {
                        return value.to_string();
                    }
                    // Unknown placeholder: render literally.
                    caps[0].to_string()
                }
            }
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::Level;
    use crate::record::SourceLocation;
    use chrono::TimeZone;

    fn record_at(ts: DateTime<Utc>) -> Record {
        let mut record = Record::new(Level::Info, "INFO", "Test message").unwrap();
        record.timestamp = ts;
        record
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 15, 12, 34, 56).unwrap()
    }

    #[test]
    fn test_basic_formatting() {
        let record = record_at(noon());
        let out = render("{time:YYYY-MM-DD} | {level} | {message}", &record, "ISO8601", None);
        assert_eq!(out, "2023-01-15 | INFO | Test message");
    }

    #[test]
    fn test_iso_default_time() {
        let record = record_at(noon());
        let out = render("[{time}] [{level}] {message}", &record, "ISO8601", None);
        assert_eq!(out, "[2023-01-15T12:34:56.000Z] [INFO] Test message");
    }

    #[test]
    fn test_time_format_full() {
        let record = record_at(noon());
        let out = render(
            "{time:YYYY-MM-DD HH:mm:ss} [{level}] {message}",
            &record,
            "default",
            None,
        );
        assert_eq!(out, "2023-01-15 12:34:56 [INFO] Test message");
    }

    #[test]
    fn test_time_format_dd_mm_yyyy() {
        let record = record_at(noon());
        let out = render("{time:DD/MM/YYYY}", &record, "default", None);
        assert_eq!(out, "15/01/2023");
    }

    #[test]
    fn test_time_format_single_letter_tokens() {
        let record = record_at(Utc.with_ymd_and_hms(2023, 3, 5, 7, 8, 9).unwrap());
        let out = render("{time:M/D H:m:s}", &record, "default", None);
        assert_eq!(out, "3/5 7:8:9");
    }

    #[test]
    fn test_time_unix_literal() {
        let record = record_at(noon());
        let out = render("{time:unix}", &record, "default", None);
        assert_eq!(out, noon().timestamp().to_string());
    }

    #[test]
    fn test_default_pattern_has_millis() {
        let mut record = record_at(noon());
        record.timestamp = noon() + chrono::Duration::milliseconds(789);
        let out = render("{time}", &record, "default", None);
        assert_eq!(out, "2023-01-15 12:34:56.789");
    }

    #[test]
    fn test_unknown_placeholder_renders_literally() {
        let record = record_at(noon());
        let out = render("{message} {nonsense}", &record, "default", None);
        assert_eq!(out, "Test message {nonsense}");
    }

    #[test]
    fn test_caller_composition() {
        let mut record = record_at(noon());
        record.source = Some(SourceLocation::new("src/db.rs", 42, "connect", "app::db"));
        let out = render("{caller}", &record, "default", None);
        assert_eq!(out, "src/db.rs:42 in connect");
        let out = render("{file}:{line} {function} {module}", &record, "default", None);
        assert_eq!(out, "src/db.rs:42 connect app::db");
    }

    #[test]
    fn test_context_keys_resolve() {
        let mut record = record_at(noon());
        record.context = record.context.bind("user", "alice");
        let out = render("{message} user={user}", &record, "default", None);
        assert_eq!(out, "Test message user=alice");
    }

    #[test]
    fn test_diag_placeholders() {
        let record = record_at(noon());
        let diag = DiagSnapshot::default();
        let out = render("{diag.os}/{diag.arch}", &record, "default", Some(&diag));
        assert_eq!(out, format!("{}/{}", diag.os, diag.arch));
        // Unknown diag fields stay literal.
        let out = render("{diag.bogus}", &record, "default", Some(&diag));
        assert_eq!(out, "{diag.bogus}");
    }

    #[test]
    fn test_references() {
        assert!(references("{time} {level}", "level"));
        assert!(references("{user:x}", "user"));
        assert!(!references("{time}", "level"));
    }

    #[test]
    fn test_convert_time_pattern() {
        assert_eq!(convert_time_pattern("YYYY-MM-DD"), "%Y-%m-%d");
        assert_eq!(
            convert_time_pattern("YYYY-MM-DD HH:mm:ss.SSS"),
            "%Y-%m-%d %H:%M:%S.%3f"
        );
        assert_eq!(convert_time_pattern("DD/MM/YY"), "%d/%m/%y");
        assert_eq!(convert_time_pattern("M-D H:m:s"), "%-m-%-d %-H:%-M:%-S");
    }
}
