use super::{BatchDeleteResult, BatchItemError, ObjectPage, ObjectStore, ObjectSummary};
use crate::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Objects = BTreeMap<String, (Vec<u8>, DateTime<Utc>)>;

/// In-process object store with S3 listing semantics and injectable faults.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: Mutex<Objects>,
    page_size: usize,
    fail_listing: AtomicBool,
    fail_copy: AtomicBool,
    fail_delete: Mutex<HashSet<String>>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

enum Entry {
    Object(ObjectSummary),
    Prefix(String),
}

impl Entry {
    fn sort_key(&self) -> &str {
        match self {
            Entry::Object(o) => &o.key,
            Entry::Prefix(p) => p,
        }
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            fail_listing: AtomicBool::new(false),
            fail_copy: AtomicBool::new(false),
            fail_delete: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert(&self, key: &str, body: Vec<u8>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.to_string(), (body, Utc::now()));
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|o| o.contains_key(key))
            .unwrap_or(false)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_copy(&self, fail: bool) {
        self.fail_copy.store(fail, Ordering::SeqCst);
    }

    /// Make deletes of `key` fail until cleared.
    pub fn fail_delete_of(&self, key: &str) {
        if let Ok(mut keys) = self.fail_delete.lock() {
            keys.insert(key.to_string());
        }
    }

    fn delete_blocked(&self, key: &str) -> bool {
        self.fail_delete
            .lock()
            .map(|k| k.contains(key))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Objects>> {
        self.objects
            .lock()
            .map_err(|_| StorageError::Backend("object map lock poisoned".into()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<String>,
    ) -> Result<ObjectPage> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("listing unavailable".into()));
        }

        let objects = self.lock()?;
        let mut entries: Vec<Entry> = Vec::new();
        for (key, (body, modified)) in objects.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            let folded = delimiter.and_then(|d| rest.find(d).map(|i| (i, d.len())));
            match folded {
                Some((i, len)) => {
                    let common = format!("{}{}", prefix, &rest[..i + len]);
                    if !matches!(entries.last(), Some(Entry::Prefix(p)) if *p == common) {
                        entries.push(Entry::Prefix(common));
                    }
                }
                None => entries.push(Entry::Object(ObjectSummary {
                    key: key.clone(),
                    size: body.len() as u64,
                    last_modified: Some(*modified),
                })),
            }
        }
        drop(objects);

        let mut remaining = entries
            .into_iter()
            .filter(|e| match &continuation {
                Some(token) => e.sort_key() > token.as_str(),
                None => true,
            })
            .peekable();

        let mut page = ObjectPage::default();
        let mut last = None;
        for entry in remaining.by_ref().take(self.page_size) {
            last = Some(entry.sort_key().to_string());
            match entry {
                Entry::Object(o) => page.objects.push(o),
                Entry::Prefix(p) => page.common_prefixes.push(p),
            }
        }
        if remaining.peek().is_some() {
            page.next_token = last;
        }
        Ok(page)
    }

    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.lock()?.insert(key.to_string(), (body, Utc::now()));
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        if self.delete_blocked(key) {
            return Err(StorageError::Backend(format!("access denied deleting {key}")));
        }
        self.lock()?.remove(key);
        Ok(())
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<BatchDeleteResult> {
        let mut result = BatchDeleteResult::default();
        for key in keys {
            match self.delete_object(key).await {
                Ok(()) => result.deleted += 1,
                Err(e) => result.errors.push(BatchItemError {
                    path: key.clone(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(result)
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<()> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("copy unavailable".into()));
        }
        let mut objects = self.lock()?;
        let (body, _) = objects
            .get(from)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        objects.insert(to.to_string(), (body, Utc::now()));
        Ok(())
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> Result<String> {
        Ok(format!("memory://{key}?expires={}", expires_in.as_secs()))
    }
}
