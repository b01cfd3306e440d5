//! Local filesystem backend rooted at a single storage directory.
//!
//! Caller paths are always interpreted relative to the root. A leading `/`
//! does not escape it, and neither do `..` segments or symlinks.

use crate::files::{Listing, StorageEntry};
use crate::{Result, StorageError};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Byte and entry totals below the root. The root itself is not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalStats {
    pub bytes: u64,
    pub files: u64,
    pub folders: u64,
}

#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

/// A caller path after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    pub absolute: PathBuf,
    /// Forward-slash path relative to the root; empty for the root itself.
    pub relative: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a caller path onto the root, rejecting anything that would land outside it.
    pub async fn resolve(&self, path: &str) -> Result<ResolvedPath> {
        if path.contains('\0') {
            return Err(StorageError::Validation("path contains a NUL byte".into()));
        }

        let mut parts: Vec<String> = Vec::new();
        for component in Path::new(path.trim_start_matches(['/', '\\'])).components() {
            match component {
                Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(StorageError::OutsideRoot(path.to_string()));
                    }
                }
                Component::Prefix(_) => return Err(StorageError::OutsideRoot(path.to_string())),
            }
        }

        let absolute = parts.iter().fold(self.root.clone(), |acc, p| acc.join(p));
        self.check_symlinks(path, &absolute).await?;

        Ok(ResolvedPath {
            absolute,
            relative: parts.join("/"),
        })
    }

    /// The deepest existing ancestor must still canonicalize under the root.
    async fn check_symlinks(&self, original: &str, absolute: &Path) -> Result<()> {
        let Ok(root) = tokio::fs::canonicalize(&self.root).await else {
            // Nothing exists yet, so nothing can point outside.
            return Ok(());
        };

        let mut cursor = Some(absolute);
        while let Some(candidate) = cursor {
            if let Ok(real) = tokio::fs::canonicalize(candidate).await {
                if !real.starts_with(&root) {
                    return Err(StorageError::OutsideRoot(original.to_string()));
                }
                return Ok(());
            }
            cursor = candidate.parent();
        }
        Ok(())
    }

    pub async fn list(&self, prefix: &str) -> Result<Listing> {
        let dir = self.resolve(prefix).await?;

        let mut reader = match tokio::fs::read_dir(&dir.absolute).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Listing::default()),
            Err(e) => return Err(e.into()),
        };

        let mut listing = Listing::default();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(entry = %name, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let path = if dir.relative.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", dir.relative, name)
            };
            let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

            if metadata.is_dir() {
                listing.folders.push(StorageEntry {
                    name,
                    path: format!("{path}/"),
                    size: None,
                    is_directory: true,
                    last_modified,
                });
            } else {
                listing.files.push(StorageEntry {
                    name,
                    path,
                    size: Some(metadata.len()),
                    is_directory: false,
                    last_modified,
                });
            }
        }

        listing.folders.sort_by(|a, b| a.name.cmp(&b.name));
        listing.files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listing)
    }

    pub async fn create_folder(&self, path: &str) -> Result<String> {
        let target = self.resolve(path).await?;
        if target.relative.is_empty() {
            return Err(StorageError::Validation("folder path is required".into()));
        }
        tokio::fs::create_dir_all(&target.absolute).await?;
        Ok(target.relative)
    }

    /// Remove a file or an empty directory. Non-empty directories are left alone.
    pub async fn delete(&self, path: &str) -> Result<String> {
        let target = self.resolve(path).await?;
        if target.relative.is_empty() {
            return Err(StorageError::Validation("refusing to delete the storage root".into()));
        }

        let metadata = match tokio::fs::symlink_metadata(&target.absolute).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(target.relative));
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            let mut reader = tokio::fs::read_dir(&target.absolute).await?;
            if reader.next_entry().await?.is_some() {
                return Err(StorageError::NotEmpty(target.relative));
            }
            tokio::fs::remove_dir(&target.absolute).await?;
        } else {
            tokio::fs::remove_file(&target.absolute).await?;
        }
        Ok(target.relative)
    }

    pub async fn save_file(&self, path: &str, bytes: &[u8]) -> Result<String> {
        let target = self.resolve(path).await?;
        if target.relative.is_empty() {
            return Err(StorageError::Validation("file path is required".into()));
        }
        if let Some(parent) = target.absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target.absolute, bytes).await?;
        Ok(target.relative)
    }

    /// Walk the whole tree. Entries that vanish or can not be read mid-walk are skipped.
    pub async fn usage(&self) -> Result<LocalStats> {
        let root = self.root.clone();
        if !tokio::fs::try_exists(&root).await? {
            return Ok(LocalStats::default());
        }

        tokio::task::spawn_blocking(move || {
            let mut stats = LocalStats::default();
            for entry in WalkDir::new(&root).min_depth(1).follow_links(false) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping entry during usage walk");
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    stats.folders += 1;
                } else if let Ok(metadata) = entry.metadata() {
                    stats.bytes += metadata.len();
                    stats.files += 1;
                }
            }
            stats
        })
        .await
        .map_err(StorageError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, LocalStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());
        (dir, storage)
    }

    #[tokio::test]
    async fn test_resolve_normalizes_inside_root() {
        let (dir, storage) = storage();
        let resolved = storage.resolve("/docs/./a/../b.txt").await.unwrap();
        assert_eq!(resolved.relative, "docs/b.txt");
        assert_eq!(resolved.absolute, dir.path().join("docs").join("b.txt"));
        assert_eq!(storage.resolve("/").await.unwrap().relative, "");
    }

    #[tokio::test]
    async fn test_resolve_rejects_parent_escape() {
        let (_dir, storage) = storage();
        for path in ["../etc/passwd", "a/../../b", "/.."] {
            assert!(
                matches!(storage.resolve(path).await, Err(StorageError::OutsideRoot(_))),
                "{path} should be rejected"
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolve_rejects_symlink_escape() {
        let (dir, storage) = storage();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(matches!(
            storage.resolve("link/secret.txt").await,
            Err(StorageError::OutsideRoot(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sorts_and_marks_folders() {
        let (dir, storage) = storage();
        std::fs::create_dir_all(dir.path().join("docs/zeta")).unwrap();
        std::fs::create_dir_all(dir.path().join("docs/alpha")).unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"a").unwrap();

        let listing = storage.list("docs").await.unwrap();
        let folders: Vec<_> = listing.folders.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(folders, vec!["docs/alpha/", "docs/zeta/"]);
        let files: Vec<_> = listing.files.iter().map(|f| (f.name.as_str(), f.size)).collect();
        assert_eq!(files, vec![("a.txt", Some(1)), ("b.txt", Some(2))]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let (_dir, storage) = storage();
        let listing = storage.list("nope").await.unwrap();
        assert!(listing.folders.is_empty() && listing.files.is_empty());
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory_is_refused() {
        let (dir, storage) = storage();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/keep.txt"), b"keep").unwrap();

        let err = storage.delete("docs").await.unwrap_err();
        assert!(matches!(err, StorageError::NotEmpty(_)));
        assert_eq!(std::fs::read(dir.path().join("docs/keep.txt")).unwrap(), b"keep");

        storage.delete("docs/keep.txt").await.unwrap();
        storage.delete("docs").await.unwrap();
        assert!(!dir.path().join("docs").exists());
    }

    #[tokio::test]
    async fn test_delete_missing_and_root() {
        let (_dir, storage) = storage();
        assert!(matches!(storage.delete("ghost").await, Err(StorageError::NotFound(_))));
        assert!(matches!(storage.delete("/").await, Err(StorageError::Validation(_))));
    }

    #[tokio::test]
    async fn test_save_file_creates_parents() {
        let (dir, storage) = storage();
        let rel = storage.save_file("/a/b/c.txt", b"hello").await.unwrap();
        assert_eq!(rel, "a/b/c.txt");
        assert_eq!(std::fs::read(dir.path().join("a/b/c.txt")).unwrap(), b"hello");
    }
}
