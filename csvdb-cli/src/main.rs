use clap::{Parser, Subcommand, ValueEnum};
use csvdb::codec;
use csvdb::{ExportFormat, Record, Store, StoreConfig};
use std::process;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Inspect and edit a csvdb data directory from the command line
#[derive(Parser)]
#[command(name = "csvdb", version, about)]
struct Cli {
    /// Path to the data directory
    #[arg(long, env = "CSVDB_DATA_DIR", default_value = "data")]
    data_dir: String,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// List records in a resource
    List {
        /// Resource name
        resource: String,
        /// Only records whose field equals the value (e.g. --filter status=Open)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, String)>,
    },

    /// Replace a resource with the records in a JSON array
    Write {
        /// Resource name
        resource: String,
        /// File holding a JSON array of objects, or "-" for stdin
        #[arg(long)]
        json: String,
        /// Explicit column order (e.g. --header id,name,status)
        #[arg(long, value_delimiter = ',')]
        header: Option<Vec<String>>,
    },

    /// Append one record
    Append {
        /// Resource name
        resource: String,
        /// Field values (e.g. --field name="Acme Corp")
        #[arg(long = "field", value_parser = parse_key_value)]
        fields: Vec<(String, String)>,
    },

    /// Patch every record matching the conditions
    Update {
        /// Resource name
        resource: String,
        /// Match condition (e.g. --where id=l42); all must hold
        #[arg(long = "where", value_parser = parse_key_value, required = true)]
        conditions: Vec<(String, String)>,
        /// Field values to set; an empty value clears the field
        #[arg(long = "field", value_parser = parse_key_value, required = true)]
        fields: Vec<(String, String)>,
    },

    /// Delete every record matching the conditions
    Delete {
        /// Resource name
        resource: String,
        /// Match condition (e.g. --where id=l42); all must hold
        #[arg(long = "where", value_parser = parse_key_value, required = true)]
        conditions: Vec<(String, String)>,
        /// Show what would be deleted without actually deleting
        #[arg(long)]
        dry_run: bool,
    },

    /// Export a resource as JSON or the raw CSV file
    Export {
        /// Resource name
        resource: String,
        /// Export format
        #[arg(long = "as", default_value = "csv")]
        export_as: ExportFormat,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<String>,
    },

    /// Show record count and last modification time of a resource
    Stats {
        /// Resource name
        resource: String,
    },

    /// Show every resource in the data directory with its stats
    Status,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid key=value pair: no '=' found in '{s}'"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = StoreConfig::from_env();
    config.data_dir = cli.data_dir.into();
    let store = Store::open(config)?;

    match cli.command {
        Command::List { resource, filters } => {
            let records = store
                .find_where(&resource, |r| matches_all(r, &filters))
                .await?;
            print_output(&serde_json::to_value(records)?, &cli.format)?;
        }

        Command::Write {
            resource,
            json,
            header,
        } => {
            let text = read_input(&json).await?;
            let records: Vec<Record> = serde_json::from_str(&text)
                .map_err(|e| format!("Expected a JSON array of objects in '{json}': {e}"))?;
            store
                .write_all(&resource, &records, header.as_deref())
                .await?;
            print_output(
                &serde_json::json!({ "ok": true, "written": records.len() }),
                &cli.format,
            )?;
        }

        Command::Append { resource, fields } => {
            let record = fields_to_record(&fields, false);
            store.append(&resource, record).await?;
            print_output(&serde_json::json!({ "ok": true }), &cli.format)?;
        }

        Command::Update {
            resource,
            conditions,
            fields,
        } => {
            let patch = fields_to_record(&fields, true);
            let matched = store
                .update_where(&resource, |r| matches_all(r, &conditions), &patch)
                .await?;
            print_output(&serde_json::json!({ "matched": matched }), &cli.format)?;
        }

        Command::Delete {
            resource,
            conditions,
            dry_run,
        } => {
            if dry_run {
                let doomed = store
                    .find_where(&resource, |r| matches_all(r, &conditions))
                    .await?;
                print_output(
                    &serde_json::json!({
                        "dry_run": true,
                        "would_delete": doomed,
                    }),
                    &cli.format,
                )?;
            } else {
                let removed = store
                    .delete_where(&resource, |r| matches_all(r, &conditions))
                    .await?;
                print_output(&serde_json::json!({ "removed": removed }), &cli.format)?;
            }
        }

        Command::Export {
            resource,
            export_as,
            output,
        } => {
            let bytes = store.export_buffer(&resource, export_as).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &bytes)
                        .await
                        .map_err(|e| format!("Failed to write '{path}': {e}"))?;
                    log::info!("Exported {} byte(s) of '{resource}' to {path}", bytes.len());
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
            }
        }

        Command::Stats { resource } => {
            let stats = store.get_stats(&resource).await?;
            print_output(&serde_json::to_value(stats)?, &cli.format)?;
        }

        Command::Status => {
            let status = store.status().await?;
            print_output(&status, &cli.format)?;
        }
    }

    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}

/// True when every `key=value` condition holds, comparing against the
/// field's stored text. An empty value matches a missing field.
fn matches_all(record: &Record, conditions: &[(String, String)]) -> bool {
    conditions.iter().all(|(key, expected)| {
        let actual = record
            .get(key)
            .map(codec::stringify_value)
            .unwrap_or_default();
        actual == *expected
    })
}

/// Build a record from `key=value` pairs, typing values the same way stored
/// cells are typed. Empty values are dropped, or kept as null when
/// `keep_empty` is set so a patch can clear fields.
fn fields_to_record(fields: &[(String, String)], keep_empty: bool) -> Record {
    let mut record = Record::new();
    for (key, val) in fields {
        match codec::coerce_value(val) {
            Some(value) => {
                record.insert(key.clone(), value);
            }
            None if keep_empty => {
                record.insert(key.clone(), serde_json::Value::Null);
            }
            None => {}
        }
    }
    record
}

async fn read_input(source: &str) -> Result<String, Box<dyn std::error::Error>> {
    if source == "-" {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        let text = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| format!("Failed to read '{source}': {e}"))?;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("status=Closed Won").unwrap(),
            ("status".to_string(), "Closed Won".to_string())
        );
        assert_eq!(
            parse_key_value("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_fields_to_record_types_values() {
        let fields = vec![
            ("id".to_string(), "l1".to_string()),
            ("value".to_string(), "1200".to_string()),
            ("hot".to_string(), "true".to_string()),
            ("notes".to_string(), String::new()),
        ];
        assert_eq!(
            fields_to_record(&fields, false),
            record(json!({ "id": "l1", "value": 1200, "hot": true }))
        );
        assert_eq!(
            fields_to_record(&fields, true)["notes"],
            serde_json::Value::Null
        );
    }

    #[test]
    fn test_matches_all_compares_stored_text() {
        let r = record(json!({ "id": 7, "status": "Open", "hot": false }));
        let cond = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        assert!(matches_all(&r, &cond(&[("id", "7"), ("status", "Open")])));
        assert!(matches_all(&r, &cond(&[("hot", "false")])));
        assert!(matches_all(&r, &cond(&[("owner", "")])));
        assert!(!matches_all(&r, &cond(&[("status", "Closed")])));
        assert!(matches_all(&r, &[]));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "csvdb",
            "--data-dir",
            "/tmp/crm",
            "update",
            "leads",
            "--where",
            "id=l1",
            "--field",
            "status=Closed",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, "/tmp/crm");
        assert!(matches!(cli.command, Command::Update { .. }));

        let cli = Cli::try_parse_from(["csvdb", "export", "leads", "--as", "JSON"]).unwrap();
        match cli.command {
            Command::Export { export_as, .. } => assert_eq!(export_as, ExportFormat::Json),
            _ => panic!("expected export"),
        }
    }
}
