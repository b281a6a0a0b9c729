// Cell codec - typed values to CSV text and back

use crate::record::Record;
use serde_json::{Number, Value};
use std::collections::HashMap;

/// Convert a record into the text form of each field.
///
/// Null becomes an empty cell, objects and arrays become compact JSON, and
/// every other value uses its plain string form.
pub fn stringify(record: &Record) -> HashMap<String, String> {
    record
        .iter()
        .map(|(key, value)| (key.clone(), stringify_value(value)))
        .collect()
}

/// Text form of a single value.
pub fn stringify_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
    }
}

/// Turn a parsed row of `(field, cell)` pairs into a typed record.
///
/// Empty cells are left out of the record entirely.
pub fn coerce<'a, I>(row: I) -> Record
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut record = Record::new();
    for (field, cell) in row {
        if let Some(value) = coerce_value(cell) {
            record.insert(field.to_string(), value);
        }
    }
    record
}

/// Interpret one cell. Returns `None` for an empty cell.
///
/// Precedence: empty, number, boolean, JSON object/array, plain string. The
/// rules are heuristic: `"007"` reads back as the number 7 and `"TRUE"` as a
/// boolean, whatever the field meant when it was written.
pub fn coerce_value(cell: &str) -> Option<Value> {
    if cell.is_empty() {
        return None;
    }
    if let Some(number) = parse_number(cell) {
        return Some(Value::Number(number));
    }
    if cell.eq_ignore_ascii_case("true") {
        return Some(Value::Bool(true));
    }
    if cell.eq_ignore_ascii_case("false") {
        return Some(Value::Bool(false));
    }
    if looks_like_json(cell) {
        if let Ok(parsed) = serde_json::from_str::<Value>(cell) {
            return Some(parsed);
        }
    }
    Some(Value::String(cell.to_string()))
}

fn parse_number(cell: &str) -> Option<Number> {
    if let Ok(i) = cell.parse::<i64>() {
        return Some(Number::from(i));
    }
    if let Ok(u) = cell.parse::<u64>() {
        return Some(Number::from(u));
    }
    // f64 parsing also accepts "inf" and "NaN"; those stay text
    let f = cell.parse::<f64>().ok()?;
    if !f.is_finite() {
        return None;
    }
    Number::from_f64(f)
}

fn looks_like_json(cell: &str) -> bool {
    (cell.starts_with('{') && cell.ends_with('}'))
        || (cell.starts_with('[') && cell.ends_with(']'))
}
