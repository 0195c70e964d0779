pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod files_discovery;
pub mod manual_migrations;
pub mod media_metadata;
pub mod models;
pub mod numbering;
pub mod probe;
pub mod stats;

pub type SqlitePoolConnection = sqlx::pool::PoolConnection<sqlx::Sqlite>;

pub use files_discovery::{LibraryScanner, StopSignal};
pub use media_metadata::MetadataExtractor;
pub use stats::{LibraryReport, RefreshStats, ScanStats};
