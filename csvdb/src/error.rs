use thiserror::Error;

#[derive(Error, Debug)]
pub enum CsvDbError {
    #[error("Invalid resource name: {0:?}")]
    InvalidResource(String),

    #[error("No columns to write for {0}: the header is empty")]
    NoColumns(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CsvDbError>;
