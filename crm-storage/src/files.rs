//! File manager over the remote object store and the local storage root.
//!
//! The two backends are not symmetric. Remote folders are only prefixes or
//! zero-byte placeholders, so remote deletes never check for children, and a
//! remote rename is a copy followed by a delete. Local deletes refuse
//! non-empty directories, and there is no local rename.
//!
//! Every operation requires an admin [`Actor`] and validates its input before
//! touching a backend. Successful mutations are written to the audit log.

use crate::audit::{self, AuditEntry, AuditSink};
use crate::local::LocalStorage;
use crate::remote::{self, BatchDeleteResult, BatchItemError, ObjectStore, DELIMITER};
use crate::{Actor, Result, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Longest lifetime accepted for a presigned URL.
pub const MAX_URL_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Remote,
    Local,
}

impl Backend {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Backend::Remote => "remote",
            Backend::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEntry {
    pub name: String,
    pub path: String,
    /// Byte size; `None` for folders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub is_directory: bool,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub folders: Vec<StorageEntry>,
    pub files: Vec<StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

pub struct FileManager {
    remote: Option<Arc<dyn ObjectStore>>,
    local: LocalStorage,
    audit: Arc<dyn AuditSink>,
    default_url_expiry: Duration,
}

/// Strip leading separators; reject empty and NUL-containing keys.
fn remote_key(path: &str, what: &str) -> Result<String> {
    let key = path.trim().trim_start_matches('/');
    if key.is_empty() {
        return Err(StorageError::Validation(format!("{what} is required")));
    }
    if key.contains('\0') {
        return Err(StorageError::Validation(format!("{what} contains a NUL byte")));
    }
    Ok(key.to_string())
}

/// Listing prefix: no leading separator, exactly one trailing one (or empty for the top level).
fn remote_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}{DELIMITER}")
    }
}

fn last_segment(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl FileManager {
    pub fn new(
        remote: Option<Arc<dyn ObjectStore>>,
        local: LocalStorage,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            remote,
            local,
            audit,
            default_url_expiry: DEFAULT_URL_EXPIRY,
        }
    }

    pub fn with_default_url_expiry(mut self, expiry: Duration) -> Self {
        self.default_url_expiry = expiry;
        self
    }

    pub fn local(&self) -> &LocalStorage {
        &self.local
    }

    fn remote(&self) -> Result<&dyn ObjectStore> {
        self.remote
            .as_deref()
            .ok_or_else(|| StorageError::Backend("remote storage is not configured".into()))
    }

    async fn audit(&self, actor: &Actor, action: &str, details: serde_json::Value) {
        audit::record(
            self.audit.as_ref(),
            AuditEntry::new(action, "storage").by(&actor.id).details(details),
        )
        .await;
    }

    pub async fn list(&self, actor: &Actor, backend: Backend, prefix: &str) -> Result<Listing> {
        actor.require_admin()?;
        match backend {
            Backend::Local => self.local.list(prefix).await,
            Backend::Remote => {
                let prefix = remote_prefix(prefix);
                let page = remote::list_all(self.remote()?, &prefix, Some(DELIMITER)).await?;

                let folders = page
                    .common_prefixes
                    .into_iter()
                    .map(|p| StorageEntry {
                        name: last_segment(&p),
                        path: p,
                        size: None,
                        is_directory: true,
                        last_modified: None,
                    })
                    .collect();
                let files = page
                    .objects
                    .into_iter()
                    // The folder's own placeholder object.
                    .filter(|o| o.key != prefix)
                    .map(|o| StorageEntry {
                        name: last_segment(&o.key),
                        path: o.key,
                        size: Some(o.size),
                        is_directory: false,
                        last_modified: o.last_modified,
                    })
                    .collect();
                Ok(Listing { folders, files })
            }
        }
    }

    pub async fn create_folder(
        &self,
        actor: &Actor,
        backend: Backend,
        path: &str,
    ) -> Result<String> {
        actor.require_admin()?;
        let created = match backend {
            Backend::Local => self.local.create_folder(path).await?,
            Backend::Remote => {
                let mut key = remote_key(path, "folder path")?;
                if !key.ends_with(DELIMITER) {
                    key.push_str(DELIMITER);
                }
                self.remote()?.put_object(&key, Vec::new()).await?;
                key
            }
        };

        tracing::info!(backend = backend.as_str(), path = %created, "Folder created");
        self.audit(
            actor,
            "storage.folder_created",
            json!({ "backend": backend, "path": created }),
        )
        .await;
        Ok(created)
    }

    pub async fn delete(&self, actor: &Actor, backend: Backend, path: &str) -> Result<()> {
        actor.require_admin()?;
        let deleted = match backend {
            Backend::Local => self.local.delete(path).await?,
            Backend::Remote => {
                let key = remote_key(path, "key")?;
                self.remote()?.delete_object(&key).await?;
                key
            }
        };

        tracing::info!(backend = backend.as_str(), path = %deleted, "Entry deleted");
        self.audit(actor, "storage.deleted", json!({ "backend": backend, "path": deleted }))
            .await;
        Ok(())
    }

    /// Delete several entries; individual failures are collected, not raised.
    pub async fn delete_many(
        &self,
        actor: &Actor,
        backend: Backend,
        paths: &[String],
    ) -> Result<BatchDeleteResult> {
        actor.require_admin()?;
        if paths.is_empty() {
            return Err(StorageError::Validation("no paths given".into()));
        }

        let result = match backend {
            Backend::Remote => {
                let keys = paths
                    .iter()
                    .map(|p| remote_key(p, "key"))
                    .collect::<Result<Vec<_>>>()?;
                self.remote()?.delete_objects(&keys).await?
            }
            Backend::Local => {
                let mut result = BatchDeleteResult::default();
                for path in paths {
                    match self.local.delete(path).await {
                        Ok(_) => result.deleted += 1,
                        Err(e) => result.errors.push(BatchItemError {
                            path: path.clone(),
                            message: e.to_string(),
                        }),
                    }
                }
                result
            }
        };

        tracing::info!(
            backend = backend.as_str(),
            deleted = result.deleted,
            failed = result.errors.len(),
            "Batch delete finished"
        );
        if result.deleted > 0 {
            self.audit(
                actor,
                "storage.deleted_many",
                json!({
                    "backend": backend,
                    "deleted": result.deleted,
                    "failed": result.errors.len(),
                }),
            )
            .await;
        }
        Ok(result)
    }

    /// Copy `from` to `to`, then delete `from`.
    ///
    /// A failed copy changes nothing. A failed delete after a successful copy
    /// is reported as [`StorageError::PartialRename`]; both keys then exist.
    pub async fn rename_remote(&self, actor: &Actor, from: &str, to: &str) -> Result<()> {
        actor.require_admin()?;
        let from = remote_key(from, "source key")?;
        let to = remote_key(to, "target key")?;
        if from == to {
            return Err(StorageError::Validation("source and target are the same".into()));
        }

        let store = self.remote()?;
        store.copy_object(&from, &to).await?;
        if let Err(e) = store.delete_object(&from).await {
            tracing::error!(
                from = %from,
                to = %to,
                error = %e,
                "Rename copied but could not delete source"
            );
            return Err(StorageError::PartialRename {
                from,
                to,
                reason: e.to_string(),
            });
        }

        tracing::info!(from = %from, to = %to, "Remote object renamed");
        self.audit(actor, "storage.renamed", json!({ "from": from, "to": to }))
            .await;
        Ok(())
    }

    pub async fn remote_access_url(
        &self,
        actor: &Actor,
        key: &str,
        expires_in: Option<Duration>,
    ) -> Result<AccessUrl> {
        actor.require_admin()?;
        let key = remote_key(key, "key")?;
        let expires_in = expires_in.unwrap_or(self.default_url_expiry);
        if expires_in.is_zero() || expires_in > MAX_URL_EXPIRY {
            return Err(StorageError::Validation(format!(
                "expiry must be between 1 and {} seconds",
                MAX_URL_EXPIRY.as_secs()
            )));
        }

        let url = self.remote()?.presign_get(&key, expires_in).await?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(expires_in).map_err(StorageError::backend)?;
        Ok(AccessUrl { url, expires_at })
    }

    pub async fn save_local_file(&self, actor: &Actor, path: &str, bytes: &[u8]) -> Result<String> {
        actor.require_admin()?;
        let saved = self.local.save_file(path, bytes).await?;

        tracing::info!(path = %saved, bytes = bytes.len(), "Local file saved");
        self.audit(
            actor,
            "storage.file_saved",
            json!({ "backend": Backend::Local, "path": saved, "size": bytes.len() }),
        )
        .await;
        Ok(saved)
    }
}
