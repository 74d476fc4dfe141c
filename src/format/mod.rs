//! Output formatting.
//!
//! A [`Formatter`] is a pure function from a record plus configuration to a
//! rendered line; it carries no hidden state. Text templates live in
//! [`template`], the JSON shape in [`json`], and ANSI styling in [`colors`].

pub mod colors;
pub mod json;
pub mod template;

use crate::config::{
    Config, FormatStructureConfig, Highlighters, LevelColors, SinkConfig, SinkFormat,
};
use crate::diag;
use crate::record::Record;

/// Renders records for one sink.
#[derive(Clone)]
pub struct Formatter {
    format: SinkFormat,
    template: String,
    time_format: String,
    structure: FormatStructureConfig,
    level_colors: LevelColors,
    highlighters: Highlighters,
}

impl Formatter {
    /// Builds a formatter by layering sink overrides onto logger defaults.
    pub fn from_config(config: &Config, sink: &SinkConfig) -> Formatter {
        let mut template = match &sink.format {
            SinkFormat::Text { template: Some(t) } => t.clone(),
            _ => config.log_format.clone(),
        };
        if !config.structure.show_time {
            template = template
                .replace("[{time}] ", "")
                .replace("{time} ", "")
                .replace("{time}", "");
        }
        Formatter {
            format: sink.format.clone(),
            template,
            time_format: sink
                .time_format
                .clone()
                .unwrap_or_else(|| config.time_format.clone()),
            structure: config.structure.clone(),
            level_colors: config.level_colors.clone(),
            highlighters: config.highlighters.clone(),
        }
    }

    /// A plain-text formatter with explicit parts; used by tests and custom
    /// sinks.
    pub fn text(template: &str, time_format: &str) -> Formatter {
        Formatter {
            format: SinkFormat::Text {
                template: Some(template.to_string()),
            },
            template: template.to_string(),
            time_format: time_format.to_string(),
            structure: FormatStructureConfig::default(),
            level_colors: LevelColors::default(),
            highlighters: Highlighters::default(),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, SinkFormat::Json { .. })
    }

    /// The ANSI style for a record: a registered custom-level style wins,
    /// then the level color table.
    pub fn style_for(&self, record: &Record, custom_style: Option<&str>) -> Option<String> {
        if let Some(style) = custom_style {
            if !style.is_empty() {
                return Some(style.to_string());
            }
        }
        self.level_colors
            .get(&record.level_name)
            .map(|s| s.to_string())
    }

    /// Renders a record into `out`, including the trailing newline.
    ///
    /// `style` is the ANSI style to wrap the whole line in; `None` renders
    /// plain. JSON output is never colored.
    pub fn render_into(&self, record: &Record, style: Option<&str>, out: &mut String) {
        match &self.format {
            SinkFormat::Json { pretty } => {
                out.push_str(&json::render(record, *pretty, &self.structure));
                out.push('\n');
            }
            SinkFormat::Text { .. } => {
                let diag_snapshot = if self.template.contains("{diag.") {
                    Some(diag::snapshot())
                } else {
                    None
                };
                let mut line =
                    template::render(&self.template, record, &self.time_format, diag_snapshot.as_ref());
                self.append_suffix(record, &mut line);
                match style {
                    Some(style) => {
                        let highlighted =
                            colors::apply_highlights(&line, &self.highlighters, Some(style));
                        out.push_str(&colors::wrap_line(&highlighted, style));
                    }
                    None => out.push_str(&line),
                }
                out.push('\n');
            }
        }
    }

    /// Convenience wrapper returning a fresh string.
    pub fn render(&self, record: &Record, style: Option<&str>) -> String {
        let mut out = String::with_capacity(128 + record.message.len());
        self.render_into(record, style, &mut out);
        out
    }

    // Context pairs and source fields the template does not reference are
    // appended as ` | key=value`, gated by the structure flags.
    fn append_suffix(&self, record: &Record, line: &mut String) {
        if let Some(source) = &record.source {
            if self.structure.show_function
                && !source.function.is_empty()
                && !template::references(&self.template, "function")
                && !template::references(&self.template, "caller")
            {
                line.push_str(&format!(" | function={}", source.function));
            }
            if self.structure.show_filename
                && !source.file.is_empty()
                && !template::references(&self.template, "file")
                && !template::references(&self.template, "caller")
            {
                line.push_str(&format!(" | file={}", source.file));
            }
            if self.structure.show_lineno
                && !template::references(&self.template, "line")
                && !template::references(&self.template, "caller")
            {
                line.push_str(&format!(" | line={}", source.line));
            }
        }
        if self.structure.show_module {
            if let Some(module) = record.module() {
                if !template::references(&self.template, "module") {
                    line.push_str(&format!(" | module={}", module));
                }
            }
        }
        if self.structure.show_thread && !template::references(&self.template, "thread") {
            line.push_str(&format!(" | thread={}", record.thread));
        }
        for (key, value) in record.context_pairs() {
            if !template::references(&self.template, &key) {
                line.push_str(&format!(" | {}={}", key, value));
            }
        }
        for note in &record.annotations {
            match &note.url {
                Some(url) => {
                    line.push_str(&format!(" | {}: {} ({})", note.category.as_str(), note.text, url))
                }
                None => line.push_str(&format!(" | {}: {}", note.category.as_str(), note.text)),
            }
        }
        if let Some(backtrace) = &record.backtrace {
            line.push_str("\nstack trace:\n");
            line.push_str(backtrace.trim_end());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::Level;
    use crate::record::{RuleCategory, RuleNote};
    use chrono::TimeZone as _;

    fn record() -> Record {
        let mut r = Record::new(Level::Info, "INFO", "hello").unwrap();
        r.timestamp = chrono::Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        r
    }

    #[test]
    fn test_plain_console_line() {
        let formatter = Formatter::text("[{time}] [{level}] {message}", "ISO8601");
        let out = formatter.render(&record(), None);
        assert_eq!(out, "[2024-06-01T08:30:00.000Z] [INFO] hello\n");
    }

    #[test]
    fn test_colored_line_wraps_whole_line() {
        let formatter = Formatter::text("[{level}] {message}", "ISO8601");
        let out = formatter.render(&record(), Some("32"));
        assert_eq!(out, "\x1b[32m[INFO] hello\x1b[0m\n");
    }

    #[test]
    fn test_context_suffix_for_unreferenced_keys() {
        let formatter = Formatter::text("{message}", "default");
        let mut r = record();
        r.context = r.context.bind("user", "alice").bind("attempt", 2i64);
        let out = formatter.render(&r, None);
        assert_eq!(out, "hello | user=alice | attempt=2\n");
    }

    #[test]
    fn test_referenced_key_not_duplicated() {
        let formatter = Formatter::text("{message} <{user}>", "default");
        let mut r = record();
        r.context = r.context.bind("user", "alice");
        let out = formatter.render(&r, None);
        assert_eq!(out, "hello <alice>\n");
    }

    #[test]
    fn test_annotation_suffix() {
        let formatter = Formatter::text("{message}", "default");
        let mut r = record();
        r.annotations.push(RuleNote {
            category: RuleCategory::Cause,
            text: "socket closed".into(),
            url: None,
        });
        let out = formatter.render(&r, None);
        assert_eq!(out, "hello | cause: socket closed\n");
    }

    #[test]
    fn test_json_never_colored() {
        let mut formatter = Formatter::text("{message}", "default");
        formatter.format = SinkFormat::Json { pretty: false };
        let out = formatter.render(&record(), Some("31"));
        assert!(!out.contains("\x1b["));
        assert!(out.starts_with('{'));
        assert!(out.ends_with("}\n"));
    }

    #[test]
    fn test_show_time_off_strips_timestamp() {
        let config = Config {
            structure: FormatStructureConfig {
                show_time: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let formatter = Formatter::from_config(&config, &crate::config::SinkConfig::console());
        let out = formatter.render(&record(), None);
        assert_eq!(out, "[INFO] hello\n");
    }

    #[test]
    fn test_custom_style_wins_over_table() {
        let formatter = Formatter::text("{message}", "default");
        let style = formatter.style_for(&record(), Some("95"));
        assert_eq!(style.as_deref(), Some("95"));
        let fallback = formatter.style_for(&record(), None);
        assert_eq!(fallback.as_deref(), Some("32")); // INFO -> green
    }
}
