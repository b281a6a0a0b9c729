// Reader - loads a resource file into typed records

use crate::codec;
use crate::error::Result;
use crate::record::Table;
use std::io::ErrorKind;
use std::path::Path;

const UTF8_BOM: &str = "\u{feff}";

/// Read the whole resource file at `path`.
///
/// A missing file is an empty table, not an error. Records come back in file
/// order.
pub async fn read_table(path: &Path) -> Result<Table> {
    let bytes = match read_bytes(path).await? {
        Some(bytes) => bytes,
        None => return Ok(Table::default()),
    };
    let table = parse_table(&bytes)?;
    log::debug!(
        "Read {} record(s) from {}",
        table.records.len(),
        path.display()
    );
    Ok(table)
}

/// Raw file contents, or `None` when the file does not exist.
pub async fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Parse CSV bytes whose first row is the header.
///
/// Short rows leave their trailing fields absent. Cells past the end of the
/// header have no field name and are dropped.
pub fn parse_table(bytes: &[u8]) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if let Some(first) = header.first_mut() {
        if let Some(stripped) = first.strip_prefix(UTF8_BOM) {
            *first = stripped.to_string();
        }
    }

    let mut records = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row?;
        if row.len() > header.len() {
            log::warn!(
                "Row {} has {} cells but the header has {}; extra cells ignored",
                index + 2,
                row.len(),
                header.len()
            );
        }
        records.push(codec::coerce(
            header.iter().map(String::as_str).zip(row.iter()),
        ));
    }

    Ok(Table { header, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let table = read_table(&tmp.path().join("leads.csv")).await.unwrap();
        assert_eq!(table, Table::default());
    }

    #[tokio::test]
    async fn test_read_typed_rows_in_file_order() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("leads.csv");
        std::fs::write(
            &path,
            "id,company,value,hot,tags\n\
             l1,Acme,1200,true,\"[\"\"b2b\"\"]\"\n\
             l2,\"Smith, Jones & Co\",,false,\n",
        )
        .unwrap();

        let table = read_table(&path).await.unwrap();
        assert_eq!(table.header, vec!["id", "company", "value", "hot", "tags"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(
            serde_json::Value::Object(table.records[0].clone()),
            json!({ "id": "l1", "company": "Acme", "value": 1200, "hot": true, "tags": ["b2b"] })
        );
        assert_eq!(
            serde_json::Value::Object(table.records[1].clone()),
            json!({ "id": "l2", "company": "Smith, Jones & Co", "hot": false })
        );
    }

    #[test]
    fn test_header_only() {
        let table = parse_table(b"id,name\n").unwrap();
        assert_eq!(table.header, vec!["id", "name"]);
        assert!(table.records.is_empty());
    }

    #[test]
    fn test_empty_file() {
        let table = parse_table(b"").unwrap();
        assert!(table.header.is_empty());
        assert!(table.records.is_empty());
    }

    #[test]
    fn test_short_and_long_rows() {
        let table = parse_table(b"id,name,status\np1\np2,Acme,Open,extra\n").unwrap();
        assert_eq!(
            serde_json::Value::Object(table.records[0].clone()),
            json!({ "id": "p1" })
        );
        assert_eq!(
            serde_json::Value::Object(table.records[1].clone()),
            json!({ "id": "p2", "name": "Acme", "status": "Open" })
        );
    }

    #[test]
    fn test_multiline_cell() {
        let table = parse_table(b"id,notes\nn1,\"line one\nline two\"\n").unwrap();
        assert_eq!(table.records[0]["notes"], json!("line one\nline two"));
    }

    #[test]
    fn test_strips_byte_order_mark() {
        let table = parse_table("\u{feff}id,name\nu1,Ann\n".as_bytes()).unwrap();
        assert_eq!(table.header, vec!["id", "name"]);
        assert_eq!(table.records[0]["id"], json!("u1"));
    }
}
