//! Streaming JSON export.
//!
//! The document is emitted as raw text fragments: the header, then each table
//! as an array filled one page at a time. Every fragment goes through an awaited
//! `write_all`, so a full sink suspends the export instead of buffering rows.
//! At most one page of rows is alive at any point.

use super::{artifact_file_name, iso_timestamp, ExportManifest, TableScanner};
use crate::audit::{self, AuditEntry, AuditSink};
use crate::{Actor, Result, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

/// Row counts per table, in manifest order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStats {
    pub bytes_written: u64,
    pub tables: Vec<TableCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

impl ExportStats {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }
}

/// A finished export file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportArtifact {
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    pub stats: ExportStats,
}

struct CountingSink<'a, W> {
    inner: &'a mut W,
    written: u64,
}

impl<W: AsyncWrite + Unpin> CountingSink<'_, W> {
    async fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }
}

/// Write the whole export document to `sink` and flush it.
///
/// The sink is not shut down; closing it is up to the caller.
pub async fn write_streaming_export<S, W>(
    scanner: &S,
    manifest: &ExportManifest,
    sink: &mut W,
    page_size: u64,
) -> Result<ExportStats>
where
    S: TableScanner + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    if page_size == 0 {
        return Err(StorageError::Validation("page size must be positive".into()));
    }

    let mut out = CountingSink {
        inner: sink,
        written: 0,
    };
    let mut counts = Vec::with_capacity(manifest.tables.len());

    let header = format!(
        "{{\"version\":{},\"timestamp\":{},\"data\":{{",
        serde_json::to_string(&manifest.schema_version)?,
        serde_json::to_string(&iso_timestamp(&manifest.timestamp))?,
    );
    out.put(header.as_bytes()).await?;

    for (index, table) in manifest.tables.iter().enumerate() {
        out.put(format!("{}:[", serde_json::to_string(table)?).as_bytes())
            .await?;

        let mut offset = 0u64;
        let mut rows = 0u64;
        loop {
            let page = scanner.scan(table, offset, page_size).await?;
            let fetched = page.len() as u64;

            for row in page {
                let encoded = serde_json::to_vec(&row)?;
                drop(row);
                if rows > 0 {
                    out.put(b",").await?;
                }
                out.put(&encoded).await?;
                rows += 1;
            }

            if fetched < page_size {
                break;
            }
            offset += fetched;
        }

        out.put(b"]").await?;
        if index + 1 < manifest.tables.len() {
            out.put(b",").await?;
        }

        tracing::debug!(table = %table, rows, "Table exported");
        counts.push(TableCount {
            table: table.clone(),
            rows,
        });
    }

    out.put(b"}}").await?;
    out.inner.flush().await?;

    Ok(ExportStats {
        bytes_written: out.written,
        tables: counts,
    })
}

/// Run a streaming export into a new timestamp-named file under `dir`.
///
/// On failure the partially written file stays where it is and the error is
/// returned. On success one audit entry naming the file and its size is
/// appended; a failing audit sink does not fail the export. `initiated_by` is
/// the admin behind a manual run and `None` for scheduled runs.
pub async fn export_streaming_to_dir<S>(
    scanner: &S,
    manifest: &ExportManifest,
    dir: &Path,
    page_size: u64,
    initiated_by: Option<&Actor>,
    audit_sink: &dyn AuditSink,
) -> Result<ExportArtifact>
where
    S: TableScanner + ?Sized,
{
    tokio::fs::create_dir_all(dir).await?;

    let file_name = artifact_file_name(&manifest.timestamp);
    let path = dir.join(&file_name);

    tracing::info!(file = %file_name, tables = manifest.tables.len(), "Starting streaming export");

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    let mut writer = BufWriter::new(file);

    let stats = match write_streaming_export(scanner, manifest, &mut writer, page_size).await {
        Ok(stats) => stats,
        Err(e) => {
            let _ = writer.flush().await;
            tracing::error!(
                file = %file_name,
                error = %e,
                "Streaming export aborted, partial artifact left on disk"
            );
            return Err(e);
        }
    };
    writer.shutdown().await?;

    let size = tokio::fs::metadata(&path).await?.len();

    tracing::info!(
        file = %file_name,
        bytes = size,
        rows = stats.total_rows(),
        "Streaming export completed"
    );

    let trigger = if initiated_by.is_some() { "manual" } else { "scheduled" };
    let mut entry = AuditEntry::new("backup.created", "system").details(serde_json::json!({
        "fileName": file_name,
        "size": size,
        "trigger": trigger,
    }));
    if let Some(actor) = initiated_by {
        entry = entry.by(&actor.id);
    }
    audit::record(audit_sink, entry).await;

    Ok(ExportArtifact {
        file_name,
        path,
        size,
        timestamp: manifest.timestamp,
        stats,
    })
}
