//! Export artifacts kept in the backups directory.

use crate::audit::{self, AuditEntry, AuditSink};
use crate::export::{export_streaming_to_dir, ExportArtifact, ExportManifest, TableScanner};
use crate::{Actor, Result, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupArtifact {
    pub name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// `.json` files in `dir`, newest first. A missing directory has no backups.
pub async fn list_backups(dir: &Path) -> Result<Vec<BackupArtifact>> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut artifacts = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".json") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let created_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        artifacts.push(BackupArtifact {
            name,
            size: metadata.len(),
            created_at,
        });
    }

    // Names embed the export instant, so they break ties in the same order.
    artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.name.cmp(&a.name)));
    Ok(artifacts)
}

/// Accept only a bare `.json` file name, never a path.
pub fn validate_name(name: &str) -> Result<()> {
    let bare = !name.is_empty()
        && !name.contains(['/', '\\', '\0'])
        && name != "."
        && name != ".."
        && name.ends_with(".json");
    if bare {
        Ok(())
    } else {
        Err(StorageError::Validation(format!("invalid backup name: {name}")))
    }
}

/// Export into `dir` right away on behalf of an admin.
///
/// This bypasses the schedule: the frequency is not consulted and
/// `last_backup_at` is left as it is.
pub async fn create_backup<S>(
    actor: &Actor,
    scanner: &S,
    manifest: &ExportManifest,
    dir: &Path,
    page_size: u64,
    audit_sink: &dyn AuditSink,
) -> Result<ExportArtifact>
where
    S: TableScanner + ?Sized,
{
    actor.require_admin()?;
    tracing::info!(actor = %actor.id, "Manual backup requested");
    export_streaming_to_dir(scanner, manifest, dir, page_size, Some(actor), audit_sink).await
}

/// Open an artifact for download.
pub async fn open_backup(
    actor: &Actor,
    dir: &Path,
    name: &str,
    audit_sink: &dyn AuditSink,
) -> Result<tokio::fs::File> {
    actor.require_admin()?;
    validate_name(name)?;

    let file = match tokio::fs::File::open(dir.join(name)).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    if !file.metadata().await?.is_file() {
        return Err(StorageError::NotFound(name.to_string()));
    }

    audit::record(
        audit_sink,
        AuditEntry::new("backup.downloaded", "backup")
            .by(&actor.id)
            .details(json!({ "fileName": name })),
    )
    .await;
    Ok(file)
}

pub async fn delete_backup(
    actor: &Actor,
    dir: &Path,
    name: &str,
    audit_sink: &dyn AuditSink,
) -> Result<()> {
    actor.require_admin()?;
    validate_name(name)?;

    match tokio::fs::remove_file(dir.join(name)).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::NotFound(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    tracing::info!(file = %name, actor = %actor.id, "Backup deleted");
    audit::record(
        audit_sink,
        AuditEntry::new("backup.deleted", "backup")
            .by(&actor.id)
            .details(json!({ "fileName": name })),
    )
    .await;
    Ok(())
}
