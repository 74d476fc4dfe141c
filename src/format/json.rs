//! JSON record rendering.
//!
//! One object per record: `timestamp` (Unix milliseconds or ISO-8601 per
//! config), `level` (upper-case name), `message`, optional source fields,
//! optional trace correlation ids, and every context binding as a top-level
//! key with scalar types preserved. Bindings that collide with a reserved
//! field name are prefixed with `ctx_`. Pretty mode indents with two spaces.

use serde_json::{Map, Value};

use crate::config::FormatStructureConfig;
use crate::record::Record;

/// Field names a context binding may not claim directly.
const RESERVED: &[&str] = &[
    "timestamp",
    "level",
    "message",
    "module",
    "function",
    "file",
    "line",
    "trace_id",
    "span_id",
    "correlation_id",
    "annotations",
];

/// Builds the JSON object for one record.
pub fn to_value(record: &Record, structure: &FormatStructureConfig) -> Value {
    let mut map = Map::new();
    if structure.json_timestamp_unix_ms {
        map.insert(
            "timestamp".to_string(),
            Value::from(record.timestamp.timestamp_millis()),
        );
    } else {
        map.insert(
            "timestamp".to_string(),
            Value::String(
                record
                    .timestamp
                    .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ),
        );
    }
    map.insert("level".to_string(), Value::String(record.level_name.clone()));
    map.insert("message".to_string(), Value::String(record.message.clone()));

    if structure.show_module {
        if let Some(module) = record.module() {
            map.insert("module".to_string(), Value::String(module.to_string()));
        }
    }
    if let Some(source) = &record.source {
        if structure.show_function && !source.function.is_empty() {
            map.insert(
                "function".to_string(),
                Value::String(source.function.clone()),
            );
        }
        if structure.show_filename && !source.file.is_empty() {
            map.insert("file".to_string(), Value::String(source.file.clone()));
        }
        if structure.show_lineno {
            map.insert("line".to_string(), Value::from(source.line));
        }
    }
    if let Some(trace_id) = &record.trace_id {
        map.insert("trace_id".to_string(), Value::String(trace_id.clone()));
    }
    if let Some(span_id) = &record.span_id {
        map.insert("span_id".to_string(), Value::String(span_id.clone()));
    }
    if let Some(correlation_id) = &record.correlation_id {
        map.insert(
            "correlation_id".to_string(),
            Value::String(correlation_id.clone()),
        );
    }

    for (key, value) in record.context_pairs() {
        let json = value.to_json();
        if RESERVED.contains(&key.as_str()) {
            map.insert(format!("ctx_{}", key), json);
        } else {
            map.insert(key, json);
        }
    }

    if !record.annotations.is_empty() {
        let notes: Vec<Value> = record
            .annotations
            .iter()
            .map(|note| {
                let mut entry = Map::new();
                entry.insert(
                    "category".to_string(),
                    Value::String(note.category.as_str().to_string()),
                );
                entry.insert("text".to_string(), Value::String(note.text.clone()));
                if let Some(url) = &note.url {
                    entry.insert("url".to_string(), Value::String(url.clone()));
                }
                Value::Object(entry)
            })
            .collect();
        map.insert("annotations".to_string(), Value::Array(notes));
    }

    Value::Object(map)
}

/// Serializes one record to a JSON line (no trailing newline).
pub fn render(record: &Record, pretty: bool, structure: &FormatStructureConfig) -> String {
    let value = to_value(record, structure);
    if pretty {
        serde_json::to_string_pretty(&value).unwrap_or_default()
    } else {
        serde_json::to_string(&value).unwrap_or_default()
    }
}
