// Records, headers and per-resource stats

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in a resource: field name to value, in insertion order.
///
/// A missing key and a `Value::Null` are equivalent on disk: both become an
/// empty cell.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// The full contents of a resource file as loaded by the reader.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column names from the first row. Empty when the file does not exist.
    pub header: Vec<String>,
    pub records: Vec<Record>,
}

impl Table {
    /// Header to use when writing `records` back: the on-disk header followed
    /// by any non-null field of `extra` it does not already contain.
    pub fn header_with(&self, extra: &Record) -> Vec<String> {
        let mut header = self.header.clone();
        for (key, value) in extra {
            if !value.is_null() && !header.iter().any(|h| h == key) {
                header.push(key.clone());
            }
        }
        header
    }
}

/// Record count and modification time of a resource file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub record_count: usize,
    pub last_modified: Option<DateTime<Utc>>,
}
