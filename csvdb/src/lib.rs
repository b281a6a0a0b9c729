pub mod codec;
pub mod config;
pub mod error;
pub mod lock;
pub mod reader;
pub mod record;
pub mod resource;
pub mod store;
pub mod writer;

pub use config::StoreConfig;
pub use error::{CsvDbError, Result};
pub use lock::LockManager;
pub use record::{Record, ResourceStats, Table};
pub use store::{Collection, ExportFormat, Store};
