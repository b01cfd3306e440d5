//! Database export.
//!
//! Two separate export paths exist:
//! - [`writer`]: the scheduled, streaming export that writes a JSON artifact
//!   page by page to disk;
//! - [`snapshot`]: the on-demand "download now" dump built in memory.
//!
//! Each takes its table list from its own configuration.

pub mod scanner;
pub mod snapshot;
pub mod writer;

pub use scanner::TableScanner;
pub use snapshot::{export_full_snapshot, SnapshotDocument};
pub use writer::{export_streaming_to_dir, write_streaming_export, ExportArtifact, ExportStats};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Rows fetched per scanner call.
pub const DEFAULT_PAGE_SIZE: u64 = 500;

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";

/// Header metadata of one export. Fixed at export start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub timestamp: DateTime<Utc>,
    pub schema_version: String,
    pub tables: Vec<String>,
}

impl ExportManifest {
    pub fn new(schema_version: impl Into<String>, tables: Vec<String>) -> Self {
        Self::at(Utc::now(), schema_version, tables)
    }

    pub fn at(
        timestamp: DateTime<Utc>,
        schema_version: impl Into<String>,
        tables: Vec<String>,
    ) -> Self {
        Self {
            timestamp,
            schema_version: schema_version.into(),
            tables,
        }
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn iso_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Artifact name derived from the export start instant.
pub fn artifact_file_name(ts: &DateTime<Utc>) -> String {
    format!("backup-{}.json", ts.format("%Y-%m-%d_%H-%M-%S-%3f"))
}
