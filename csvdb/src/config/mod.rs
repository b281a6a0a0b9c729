use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "CSVDB_DATA_DIR";
/// Environment variable toggling fsync before each rename.
pub const DURABLE_WRITES_ENV: &str = "CSVDB_DURABLE_WRITES";

const DEFAULT_DATA_DIR: &str = "data";

/// Settings for opening a [`Store`](crate::Store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one `<resource>.csv` per resource. Created on first write.
    pub data_dir: PathBuf,
    /// Fsync each rewritten file before it replaces the old one.
    pub durable_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            durable_writes: true,
        }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = durable;
        self
    }

    /// Build a config from `CSVDB_DATA_DIR` and `CSVDB_DURABLE_WRITES`,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|d| !d.is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup(DURABLE_WRITES_ENV) {
            match parse_flag(&flag) {
                Some(durable) => config.durable_writes = durable,
                None => log::warn!("Ignoring {DURABLE_WRITES_ENV}={flag:?}: expected true or false"),
            }
        }
        config
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
