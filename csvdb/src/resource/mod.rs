// Resource locator - maps resource names to files under the data directory

use crate::error::{CsvDbError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::sync::OnceCell;

/// File extension of every resource file.
pub const RESOURCE_EXTENSION: &str = "csv";

const MAX_NAME_LEN: usize = 128;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid resource name regex"))
}

/// Check that a resource name is safe to turn into a file name.
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LEN || !name_pattern().is_match(name) {
        return Err(CsvDbError::InvalidResource(name.to_string()));
    }
    Ok(())
}

/// Resolves resource names to `<root>/<name>.csv`.
///
/// The data directory itself is only created when something is about to be
/// written, so pointing a locator at a missing directory and reading from it
/// leaves the file system alone.
#[derive(Debug)]
pub struct ResourceLocator {
    root: PathBuf,
    root_ready: OnceCell<()>,
}

impl ResourceLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            root_ready: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `name`. Does not touch the file system.
    pub fn path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{name}.{RESOURCE_EXTENSION}")))
    }

    /// Like [`path`](Self::path), but first makes sure the data directory exists.
    pub async fn path_for_write(&self, name: &str) -> Result<PathBuf> {
        let path = self.path(name)?;
        self.root_ready
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.root).await?;
                log::debug!("Data directory ready at {}", self.root.display());
                Ok::<(), CsvDbError>(())
            })
            .await?;
        Ok(path)
    }

    /// Names of all resources that currently have a file, sorted.
    ///
    /// The directory scan runs on the blocking pool.
    pub async fn list(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_resources(&root))
            .await
            .map_err(|e| CsvDbError::Other(format!("Resource listing task failed: {e}")))?
    }
}

fn scan_resources(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/*.{RESOURCE_EXTENSION}",
        glob::Pattern::escape(&root.to_string_lossy())
    );
    let mut names: Vec<String> = glob::glob(&pattern)
        .map_err(|e| CsvDbError::Other(format!("Glob error: {e}")))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .filter_map(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        })
        .filter(|name| validate_name(name).is_ok())
        .collect();

    names.sort();
    Ok(names)
}
