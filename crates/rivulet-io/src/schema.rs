//! Dynamic-schema materialization shared by the SQL sinks.
//!
//! Column types are decided from the runtime shape of the first value seen
//! for a key. Strings get a second look: ISO-ish dates map to `DATE`,
//! date-times (`T` or space separator, optional fractional seconds) map to
//! the dialect's timestamp type, everything else is `VARCHAR(255)`.

use std::sync::LazyLock;

use regex::Regex;
use rivulet_core::Value;

use crate::hash::md5_hex;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[12]\d{3}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])").unwrap()
});

static DATETIME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[12]\d{3}-(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])[T ]([01]\d|2[0-3]):[0-5]\d:[0-5]\d(\.\d+)?",
    )
    .unwrap()
});

/// SQL column shape derived from a payload value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Numeric,
    Bool,
    Json,
    Date,
    Timestamp,
    Varchar,
}

pub fn column_kind(value: &Value) -> ColumnKind {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => ColumnKind::Int,
        Value::Number(_) => ColumnKind::Numeric,
        Value::Bool(_) => ColumnKind::Bool,
        Value::Object(_) | Value::Array(_) => ColumnKind::Json,
        Value::String(s) if is_datetime(s) => ColumnKind::Timestamp,
        Value::String(s) if is_date(s) => ColumnKind::Date,
        _ => ColumnKind::Varchar,
    }
}

pub fn is_date(text: &str) -> bool {
    DATE_PATTERN.is_match(text)
}

pub fn is_datetime(text: &str) -> bool {
    DATETIME_PATTERN.is_match(text)
}

/// Render a payload value as a SQL literal for the generated INSERT.
///
/// Numbers and booleans use native literals, null becomes `NULL`, maps and
/// sequences are JSON-encoded and quoted, and date-time strings have their
/// `T` separator normalized to a space.
pub fn render_literal(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "NULL".to_string(),
        Value::Object(_) | Value::Array(_) => {
            let json = serde_json::to_string(value).unwrap_or_default();
            format!("'{}'", json.replace('\'', "''"))
        }
        Value::String(s) => {
            let escaped = s.replace('\'', "''");
            if is_datetime(s) {
                format!("'{}'", escaped.replacen('T', " ", 1))
            } else {
                format!("'{escaped}'")
            }
        }
    }
}

/// Key synthesized for payloads that do not carry the key column: the MD5
/// of the rendered value tuple.
pub fn synthesize_key(values: &[String]) -> String {
    md5_hex(values.join(",").as_bytes())
}
