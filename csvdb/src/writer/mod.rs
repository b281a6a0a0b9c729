// Writer - replaces a resource file with a full record list

use crate::codec;
use crate::error::{CsvDbError, Result};
use crate::record::Record;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Rewrite the resource file at `path` with `records`.
///
/// The header is `header` when given, otherwise the fields of the first
/// record. With no records and no header nothing is written and `Ok(false)`
/// is returned; the file keeps whatever state it had, including not existing.
/// Any other call that ends up with an empty header fails with
/// [`CsvDbError::NoColumns`] and leaves the file untouched. The new contents
/// become visible in a single rename.
pub async fn write_table(
    path: &Path,
    records: &[Record],
    header: Option<&[String]>,
    durable: bool,
) -> Result<bool> {
    let header: Vec<String> = match header {
        Some(h) => h.to_vec(),
        None => match records.first() {
            Some(first) => first.keys().cloned().collect(),
            None => return Ok(false),
        },
    };

    if header.is_empty() {
        return Err(CsvDbError::NoColumns(path.display().to_string()));
    }

    let bytes = render_table(&header, records)?;
    atomic_write(path, &bytes, durable).await?;
    log::debug!("Wrote {} record(s) to {}", records.len(), path.display());
    Ok(true)
}

/// Serialize `records` as CSV in `header` column order.
///
/// Header fields missing from a record give an empty cell; record fields not
/// in the header are not written.
pub fn render_table(header: &[String], records: &[Record]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(false)
        .from_writer(Vec::new());

    writer.write_record(header)?;
    for record in records {
        let cells = codec::stringify(record);
        writer.write_record(
            header
                .iter()
                .map(|field| cells.get(field).map(String::as_str).unwrap_or("")),
        )?;
    }

    writer
        .into_inner()
        .map_err(|e| CsvDbError::Io(e.into_error()))
}

/// Write to a uniquely named sibling temp file, then rename over `path`.
async fn atomic_write(path: &Path, data: &[u8], durable: bool) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("resource");
    let temp_path = path.with_file_name(format!("{}.{}.tmp", file_name, ulid::Ulid::new()));

    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        if durable {
            file.sync_all().await?;
        } else {
            file.flush().await?;
        }
        drop(file);
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
            log::debug!("Could not remove {}: {cleanup}", temp_path.display());
        }
        return Err(e.into());
    }
    Ok(())
}
