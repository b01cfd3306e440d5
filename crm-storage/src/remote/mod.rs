//! Remote object storage.
//!
//! The remote backend is a flat key space. Folders only exist as key prefixes
//! up to the next [`DELIMITER`], or as zero-byte placeholder objects whose key
//! ends with it. Listing is paginated through continuation tokens, and there is
//! no rename primitive.

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod s3;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

pub const DELIMITER: &str = "/";

/// Keys per batch-delete request accepted by S3-compatible stores.
pub const MAX_BATCH_DELETE: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPage {
    pub objects: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendUsage {
    pub bytes: u64,
    pub objects: u64,
}

/// Outcome of a multi-delete. One bad key does not fail the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchDeleteResult {
    pub deleted: usize,
    pub errors: Vec<BatchItemError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItemError {
    pub path: String,
    pub message: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ObjectPage>;

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()>;

    /// Succeeds whether or not the key exists.
    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn delete_objects(&self, keys: &[String]) -> Result<BatchDeleteResult>;

    async fn copy_object(&self, from: &str, to: &str) -> Result<()>;

    /// Time-limited signed GET reference.
    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String>;

    /// Total size and object count across the whole store.
    async fn usage(&self) -> Result<BackendUsage> {
        let mut usage = BackendUsage::default();
        let mut token = None;
        loop {
            let page = self.list_page("", None, token).await?;
            for object in &page.objects {
                usage.bytes += object.size;
                usage.objects += 1;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(usage)
    }
}

/// Follow continuation tokens until the listing is complete.
pub async fn list_all(
    store: &dyn ObjectStore,
    prefix: &str,
    delimiter: Option<&str>,
) -> Result<ObjectPage> {
    let mut all = ObjectPage::default();
    let mut token = None;
    loop {
        let page = store.list_page(prefix, delimiter, token).await?;
        all.objects.extend(page.objects);
        all.common_prefixes.extend(page.common_prefixes);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(all)
}
