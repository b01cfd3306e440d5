//! Audit-log sink.
//!
//! Appends are fire-and-forget from the caller's point of view: a failing sink
//! is logged and never turns a successful operation into a failed one.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity_type: String,
    pub actor_id: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            actor_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn by(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
}

/// Append to the sink, logging instead of propagating a failure.
pub async fn record(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    if let Err(e) = sink.append(entry).await {
        tracing::warn!(action = %action, error = %e, "Failed to append audit entry");
    }
}

/// Collects entries in memory.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: std::sync::Mutex<Vec<AuditEntry>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-util"))]
impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail.
    pub fn fail_appends(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::StorageError::Backend("audit sink unavailable".into()));
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
        Ok(())
    }
}
