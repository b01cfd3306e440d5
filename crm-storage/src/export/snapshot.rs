//! In-memory full snapshot for the "download now" path.
//!
//! Unlike the streaming export this builds the complete document before
//! returning it, so it is only meant for interactive downloads of a modest
//! database.

use super::{iso_timestamp, ExportManifest, TableScanner};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub version: String,
    pub timestamp: String,
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl SnapshotDocument {
    pub fn row_count(&self) -> usize {
        self.data
            .values()
            .filter_map(|v| v.as_array())
            .map(Vec::len)
            .sum()
    }
}

pub async fn export_full_snapshot<S>(
    scanner: &S,
    manifest: &ExportManifest,
    page_size: u64,
) -> Result<SnapshotDocument>
where
    S: TableScanner + ?Sized,
{
    if page_size == 0 {
        return Err(StorageError::Validation("page size must be positive".into()));
    }

    let mut data = serde_json::Map::new();
    for table in &manifest.tables {
        let mut rows = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = scanner.scan(table, offset, page_size).await?;
            let fetched = page.len() as u64;
            for row in page {
                rows.push(serde_json::to_value(row)?);
            }
            if fetched < page_size {
                break;
            }
            offset += fetched;
        }
        data.insert(table.clone(), serde_json::Value::Array(rows));
    }

    let doc = SnapshotDocument {
        version: manifest.schema_version.clone(),
        timestamp: iso_timestamp(&manifest.timestamp),
        data,
    };
    tracing::info!(tables = manifest.tables.len(), rows = doc.row_count(), "Full snapshot built");
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::scanner::testing::VecScanner;
    use serde_json::json;

    #[tokio::test]
    async fn test_snapshot_collects_all_tables() {
        let scanner = VecScanner::default()
            .with_table("users", vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})])
            .with_table("roles", vec![json!({"id": "admin"})]);
        let manifest =
            ExportManifest::new("2.1", vec!["users".into(), "roles".into(), "tasks".into()]);

        let doc = export_full_snapshot(&scanner, &manifest, 2).await.unwrap();
        assert_eq!(doc.version, "2.1");
        assert_eq!(doc.row_count(), 4);
        assert_eq!(doc.data["users"].as_array().unwrap().len(), 3);
        assert_eq!(doc.data["tasks"], json!([]));

        // Same shape as the streaming artifact.
        let encoded = serde_json::to_value(&doc).unwrap();
        assert!(encoded.get("data").is_some());
        assert!(encoded.get("timestamp").is_some());
    }
}
