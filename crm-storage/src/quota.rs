//! Storage quota accounting.
//!
//! Usage is recomputed from the live backends on every request. Enumeration
//! failures on either backend degrade to zero usage instead of failing the
//! caller.

use crate::audit::{self, AuditEntry, AuditSink};
use crate::local::LocalStorage;
use crate::remote::ObjectStore;
use crate::settings::{self, Setting, SettingsStore};
use crate::{Actor, Result, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaConfig {
    #[serde(alias = "maxS3Size")]
    pub max_remote_size: u64,
    pub max_local_size: u64,
    pub warning_threshold: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_remote_size: 10 * GIB,
            max_local_size: 5 * GIB,
            warning_threshold: 0.8,
        }
    }
}

impl QuotaConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.warning_threshold > 0.0 && self.warning_threshold < 1.0) {
            return Err(StorageError::Validation(format!(
                "warningThreshold must be between 0 and 1 (exclusive), got {}",
                self.warning_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaLevel {
    Ok,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub used: u64,
    pub limit: u64,
    /// Fraction of the limit in use (1.0 = full).
    pub percent: f64,
    pub status: QuotaLevel,
}

/// Classify usage against a limit. Both thresholds are inclusive.
pub fn classify(used: u64, limit: u64, warning_threshold: f64) -> QuotaStatus {
    let percent = if limit == 0 {
        0.0
    } else {
        used as f64 / limit as f64
    };
    let status = if percent >= 1.0 {
        QuotaLevel::Critical
    } else if percent >= warning_threshold {
        QuotaLevel::Warning
    } else {
        QuotaLevel::Ok
    };
    QuotaStatus {
        used,
        limit,
        percent,
        status,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteUsage {
    #[serde(flatten)]
    pub quota: QuotaStatus,
    pub object_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUsage {
    #[serde(flatten)]
    pub quota: QuotaStatus,
    pub file_count: u64,
    pub folder_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsage {
    pub remote: RemoteUsage,
    pub local: LocalUsage,
}

pub struct StorageQuotaMonitor {
    remote: Option<Arc<dyn ObjectStore>>,
    local: LocalStorage,
    settings: Arc<dyn SettingsStore>,
    audit: Arc<dyn AuditSink>,
}

impl StorageQuotaMonitor {
    pub fn new(
        remote: Option<Arc<dyn ObjectStore>>,
        local: LocalStorage,
        settings: Arc<dyn SettingsStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            remote,
            local,
            settings,
            audit,
        }
    }

    /// Current quota configuration; falls back to defaults if it can not be read.
    pub async fn config(&self) -> QuotaConfig {
        match settings::quota_config(self.settings.as_ref()).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Using default quota config");
                QuotaConfig::default()
            }
        }
    }

    pub async fn update_config(&self, actor: &Actor, config: QuotaConfig) -> Result<QuotaConfig> {
        actor.require_admin()?;
        config.validate()?;

        settings::save(self.settings.as_ref(), &Setting::StorageConfig(config.clone())).await?;
        tracing::info!(
            max_remote = config.max_remote_size,
            max_local = config.max_local_size,
            warning = config.warning_threshold,
            "Storage quota updated"
        );

        audit::record(
            self.audit.as_ref(),
            AuditEntry::new("storage.quota_updated", "system")
                .by(&actor.id)
                .details(serde_json::to_value(&config)?),
        )
        .await;
        Ok(config)
    }

    pub async fn get_usage(&self) -> StorageUsage {
        let config = self.config().await;

        let (remote_used, objects) = match &self.remote {
            Some(store) => match store.usage().await {
                Ok(usage) => (usage.bytes, usage.objects),
                Err(e) => {
                    tracing::warn!(
                        provider = store.provider(),
                        error = %e,
                        "Remote usage enumeration failed, reporting zero"
                    );
                    (0, 0)
                }
            },
            None => {
                tracing::debug!("Remote storage not configured, reporting zero usage");
                (0, 0)
            }
        };

        let local = match self.local.usage().await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!(error = %e, "Local usage walk failed, reporting zero");
                Default::default()
            }
        };

        StorageUsage {
            remote: RemoteUsage {
                quota: classify(remote_used, config.max_remote_size, config.warning_threshold),
                object_count: objects,
            },
            local: LocalUsage {
                quota: classify(local.bytes, config.max_local_size, config.warning_threshold),
                file_count: local.files,
                folder_count: local.folders,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::remote::memory::InMemoryObjectStore;
    use crate::settings::MemorySettingsStore;
    use tempfile::TempDir;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(79, 100, 0.8).status, QuotaLevel::Ok);
        assert_eq!(classify(80, 100, 0.8).status, QuotaLevel::Warning);
        assert_eq!(classify(99, 100, 0.8).status, QuotaLevel::Warning);
        assert_eq!(classify(100, 100, 0.8).status, QuotaLevel::Critical);
        assert_eq!(classify(101, 100, 0.8).status, QuotaLevel::Critical);
    }

    #[test]
    fn test_classify_zero_limit() {
        let status = classify(500, 0, 0.8);
        assert_eq!(status.percent, 0.0);
        assert_eq!(status.status, QuotaLevel::Ok);
    }

    #[test]
    fn test_config_validation() {
        let mut config = QuotaConfig::default();
        assert!(config.validate().is_ok());
        for bad in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            config.warning_threshold = bad;
            assert!(config.validate().is_err());
        }
    }

    fn monitor(
        remote: Option<Arc<dyn ObjectStore>>,
        root: &TempDir,
        settings: Arc<MemorySettingsStore>,
    ) -> StorageQuotaMonitor {
        StorageQuotaMonitor::new(
            remote,
            LocalStorage::new(root.path()),
            settings,
            Arc::new(MemoryAuditSink::new()),
        )
    }

    #[tokio::test]
    async fn test_usage_against_configured_limits() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir(root.path().join("docs")).unwrap();
        std::fs::write(root.path().join("docs/a.bin"), vec![0u8; 60]).unwrap();
        std::fs::write(root.path().join("b.bin"), vec![0u8; 20]).unwrap();

        let remote = Arc::new(InMemoryObjectStore::new());
        remote.insert("img/1.png", vec![0u8; 30]);
        remote.insert("img/2.png", vec![0u8; 70]);

        let settings = Arc::new(MemorySettingsStore::new());
        settings::save(
            settings.as_ref(),
            &Setting::StorageConfig(QuotaConfig {
                max_remote_size: 100,
                max_local_size: 100,
                warning_threshold: 0.8,
            }),
        )
        .await
        .unwrap();

        let usage = monitor(Some(remote as Arc<dyn ObjectStore>), &root, settings)
            .get_usage()
            .await;
        assert_eq!(usage.remote.quota.used, 100);
        assert_eq!(usage.remote.object_count, 2);
        assert_eq!(usage.remote.quota.status, QuotaLevel::Critical);
        assert_eq!(usage.local.quota.used, 80);
        assert_eq!(usage.local.file_count, 2);
        assert_eq!(usage.local.folder_count, 1);
        assert_eq!(usage.local.quota.status, QuotaLevel::Warning);
    }

    #[tokio::test]
    async fn test_remote_failure_fails_open() {
        let root = TempDir::new().unwrap();
        let remote = Arc::new(InMemoryObjectStore::new());
        remote.insert("a", vec![1, 2, 3]);
        remote.fail_listing(true);

        let settings = Arc::new(MemorySettingsStore::new());
        let usage = monitor(Some(remote as Arc<dyn ObjectStore>), &root, settings)
            .get_usage()
            .await;
        assert_eq!(usage.remote.quota.used, 0);
        assert_eq!(usage.remote.quota.status, QuotaLevel::Ok);
    }

    #[tokio::test]
    async fn test_unconfigured_remote_and_missing_root_fail_open() {
        let root = TempDir::new().unwrap();
        let m = StorageQuotaMonitor::new(
            None,
            LocalStorage::new(root.path().join("does-not-exist")),
            Arc::new(MemorySettingsStore::new()),
            Arc::new(MemoryAuditSink::new()),
        );
        let usage = m.get_usage().await;
        assert_eq!(usage.remote.quota.used, 0);
        assert_eq!(usage.local.quota.used, 0);
        assert_eq!(usage.local.quota.limit, QuotaConfig::default().max_local_size);
    }

    #[tokio::test]
    async fn test_update_config_requires_admin_and_persists() {
        let root = TempDir::new().unwrap();
        let settings = Arc::new(MemorySettingsStore::new());
        let m = monitor(None, &root, settings.clone());
        let config = QuotaConfig {
            max_remote_size: 1,
            max_local_size: 2,
            warning_threshold: 0.5,
        };

        let err = m.update_config(&Actor::member("u"), config.clone()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unauthorized(_)));

        m.update_config(&Actor::admin("root"), config.clone()).await.unwrap();
        assert_eq!(m.config().await, config);
    }
}
