use crate::config::StoreConfig;
use crate::error::{CsvDbError, Result};
use crate::lock::LockManager;
use crate::reader;
use crate::record::{Record, ResourceStats};
use crate::resource::{self, ResourceLocator};
use crate::writer;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Output format for [`Store::export_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// The typed records as a pretty-printed JSON array.
    Json,
    /// The resource file byte for byte.
    Csv,
}

impl ExportFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = CsvDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(CsvDbError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

struct Inner {
    config: StoreConfig,
    locator: ResourceLocator,
    locks: LockManager,
}

/// The main entry point for csvdb.
///
/// Each resource is one CSV file under the data directory. Every operation
/// takes the resource's lock for its whole read-modify-write cycle, so
/// concurrent callers never lose each other's updates. Cloning is cheap and
/// clones share the same locks.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Open a store. The data directory does not need to exist yet.
    pub fn open(config: StoreConfig) -> Result<Self> {
        if config.data_dir.exists() && !config.data_dir.is_dir() {
            return Err(CsvDbError::Other(format!(
                "Data directory path is not a directory: {}",
                config.data_dir.display()
            )));
        }

        log::debug!("Opening store at {}", config.data_dir.display());
        let locator = ResourceLocator::new(config.data_dir.clone());
        Ok(Store {
            inner: Arc::new(Inner {
                config,
                locator,
                locks: LockManager::new(),
            }),
        })
    }

    /// Open a store at `path` with default settings.
    pub fn open_dir(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::new(path))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Get the root data directory path
    pub fn root(&self) -> &Path {
        self.inner.locator.root()
    }

    /// Get a handle bound to one resource.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        resource::validate_name(name)?;
        Ok(Collection {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    /// Names of the resources that have a file in the data directory.
    pub async fn resources(&self) -> Result<Vec<String>> {
        self.inner.locator.list().await
    }

    // ── CRUD ───────────────────────────────────────────────────────

    /// All records of a resource in file order. Empty if it was never written.
    pub async fn read_all(&self, resource: &str) -> Result<Vec<Record>> {
        let path = self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                reader::read_table(&path).await.map(|table| table.records)
            })
            .await
    }

    /// Records of a resource that satisfy `predicate`.
    pub async fn find_where<P>(&self, resource: &str, predicate: P) -> Result<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let mut records = self.read_all(resource).await?;
        records.retain(|r| predicate(r));
        Ok(records)
    }

    /// Replace the whole resource with `records`.
    ///
    /// Without `header`, columns come from the first record. An empty list
    /// with no header leaves the file as it is. If the resulting header is
    /// empty otherwise, nothing is replaced and [`CsvDbError::NoColumns`] is
    /// returned.
    pub async fn write_all(
        &self,
        resource: &str,
        records: &[Record],
        header: Option<&[String]>,
    ) -> Result<()> {
        self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                let path = self.inner.locator.path_for_write(resource).await?;
                writer::write_table(&path, records, header, self.durable()).await?;
                Ok::<_, CsvDbError>(())
            })
            .await
    }

    /// Add one record at the end of a resource, creating it if needed.
    ///
    /// Existing columns keep their order; non-null fields the resource has not
    /// seen before become new columns at the end. A record that leaves the
    /// resource with no columns at all is rejected with
    /// [`CsvDbError::NoColumns`].
    pub async fn append(&self, resource: &str, record: Record) -> Result<()> {
        self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                let path = self.inner.locator.path_for_write(resource).await?;
                let mut table = reader::read_table(&path).await?;
                let header = table.header_with(&record);
                table.records.push(record);
                writer::write_table(&path, &table.records, Some(&header), self.durable()).await?;
                log::debug!("Appended to '{resource}' ({} records)", table.records.len());
                Ok::<_, CsvDbError>(())
            })
            .await
    }

    /// Merge `patch` into every record matching `predicate`.
    ///
    /// Patch values win; a null patch value clears the field. Returns whether
    /// any record matched. The file is only rewritten if some record actually
    /// changed.
    pub async fn update_where<P>(&self, resource: &str, predicate: P, patch: &Record) -> Result<bool>
    where
        P: Fn(&Record) -> bool,
    {
        let path = self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                let mut table = reader::read_table(&path).await?;
                let mut matched = false;
                let mut changed = false;

                for record in table.records.iter_mut().filter(|r| predicate(r)) {
                    matched = true;
                    changed |= apply_patch(record, patch);
                }

                if changed {
                    let header = table.header_with(patch);
                    writer::write_table(&path, &table.records, Some(&header), self.durable())
                        .await?;
                    log::debug!("Updated records in '{resource}'");
                }
                Ok::<_, CsvDbError>(matched)
            })
            .await
    }

    /// Remove every record matching `predicate`. Returns whether any was removed.
    ///
    /// Removing the last record leaves a header-only file.
    pub async fn delete_where<P>(&self, resource: &str, predicate: P) -> Result<bool>
    where
        P: Fn(&Record) -> bool,
    {
        let path = self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                let mut table = reader::read_table(&path).await?;
                let before = table.records.len();
                table.records.retain(|r| !predicate(r));
                let removed = before - table.records.len();

                if removed == 0 {
                    return Ok(false);
                }

                writer::write_table(&path, &table.records, Some(&table.header), self.durable())
                    .await?;
                log::debug!("Deleted {removed} record(s) from '{resource}'");
                Ok::<_, CsvDbError>(true)
            })
            .await
    }

    /// Contents of a resource for download.
    ///
    /// CSV is the stored file verbatim; JSON is re-derived from the typed
    /// records. A resource that was never written exports as zero bytes.
    pub async fn export_buffer(&self, resource: &str, format: ExportFormat) -> Result<Vec<u8>> {
        let path = self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                let bytes = match reader::read_bytes(&path).await? {
                    Some(bytes) => bytes,
                    None => return Ok(Vec::new()),
                };
                let exported = match format {
                    ExportFormat::Csv => bytes,
                    ExportFormat::Json => {
                        let table = reader::parse_table(&bytes)?;
                        serde_json::to_vec_pretty(&table.records)?
                    }
                };
                Ok::<_, CsvDbError>(exported)
            })
            .await
    }

    /// Record count and last modification time. A missing resource is `{0, None}`.
    pub async fn get_stats(&self, resource: &str) -> Result<ResourceStats> {
        let path = self.inner.locator.path(resource)?;
        self.inner
            .locks
            .with_exclusive(resource, || async {
                let metadata = match tokio::fs::metadata(&path).await {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        return Ok(ResourceStats::default())
                    }
                    Err(e) => return Err(e.into()),
                };
                let table = reader::read_table(&path).await?;
                Ok::<_, CsvDbError>(ResourceStats {
                    record_count: table.records.len(),
                    last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                })
            })
            .await
    }

    // ── Typed API ──────────────────────────────────────────────────

    /// Read all records of a resource as `T`.
    ///
    /// Cells are coerced before deserializing, so a `String` field whose
    /// stored value looks like a number or boolean will fail to deserialize.
    pub async fn read_as<T: DeserializeOwned>(&self, resource: &str) -> Result<Vec<T>> {
        self.read_all(resource)
            .await?
            .into_iter()
            .map(|record| {
                serde_json::from_value(serde_json::Value::Object(record)).map_err(CsvDbError::from)
            })
            .collect()
    }

    /// Append a value that serializes to a JSON object.
    pub async fn append_as<T: Serialize>(&self, resource: &str, value: &T) -> Result<()> {
        match serde_json::to_value(value)? {
            serde_json::Value::Object(record) => self.append(resource, record).await,
            other => Err(CsvDbError::Other(format!(
                "Cannot append to '{resource}': expected an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Data directory and per-resource stats.
    pub async fn status(&self) -> Result<serde_json::Value> {
        let mut resources = serde_json::Map::new();
        for name in self.resources().await? {
            let stats = self.get_stats(&name).await?;
            resources.insert(name, serde_json::to_value(stats)?);
        }

        Ok(serde_json::json!({
            "data_dir": self.root().display().to_string(),
            "resources": resources,
        }))
    }

    fn durable(&self) -> bool {
        self.inner.config.durable_writes
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("locks", &self.inner.locks)
            .finish()
    }
}

/// Merge `patch` into `record`. Returns whether anything changed.
fn apply_patch(record: &mut Record, patch: &Record) -> bool {
    let mut changed = false;
    for (key, value) in patch {
        if value.is_null() {
            changed |= record.remove(key).is_some();
        } else if record.get(key) != Some(value) {
            record.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// A handle to one resource within a store.
#[derive(Debug, Clone)]
pub struct Collection {
    store: Store,
    name: String,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read_all(&self) -> Result<Vec<Record>> {
        self.store.read_all(&self.name).await
    }

    pub async fn find_where<P: Fn(&Record) -> bool>(&self, predicate: P) -> Result<Vec<Record>> {
        self.store.find_where(&self.name, predicate).await
    }

    pub async fn write_all(&self, records: &[Record], header: Option<&[String]>) -> Result<()> {
        self.store.write_all(&self.name, records, header).await
    }

    pub async fn append(&self, record: Record) -> Result<()> {
        self.store.append(&self.name, record).await
    }

    pub async fn update_where<P: Fn(&Record) -> bool>(
        &self,
        predicate: P,
        patch: &Record,
    ) -> Result<bool> {
        self.store.update_where(&self.name, predicate, patch).await
    }

    pub async fn delete_where<P: Fn(&Record) -> bool>(&self, predicate: P) -> Result<bool> {
        self.store.delete_where(&self.name, predicate).await
    }

    pub async fn export_buffer(&self, format: ExportFormat) -> Result<Vec<u8>> {
        self.store.export_buffer(&self.name, format).await
    }

    pub async fn stats(&self) -> Result<ResourceStats> {
        self.store.get_stats(&self.name).await
    }

    pub async fn read_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.store.read_as(&self.name).await
    }

    pub async fn append_as<T: Serialize>(&self, value: &T) -> Result<()> {
        self.store.append_as(&self.name, value).await
    }
}
