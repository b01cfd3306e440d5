//! Persisted settings.
//!
//! The host database keeps settings as `(key, value TEXT)` pairs. Each key has
//! exactly one value shape, modelled by [`Setting`]; values are stored as JSON.

use crate::quota::QuotaConfig;
use crate::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    BackupFrequency,
    LastBackupAt,
    StorageConfig,
}

impl SettingKey {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SettingKey::BackupFrequency => "backup_frequency",
            SettingKey::LastBackupAt => "last_backup_at",
            SettingKey::StorageConfig => "storage_config",
        }
    }
}

impl std::fmt::Display for SettingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupFrequency {
    /// Manual exports only; the scheduler never runs.
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl BackupFrequency {
    /// Minimum time between two scheduled exports.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            BackupFrequency::None => None,
            BackupFrequency::Daily => Some(Duration::hours(24)),
            BackupFrequency::Weekly => Some(Duration::days(7)),
            BackupFrequency::Monthly => Some(Duration::days(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    BackupFrequency(BackupFrequency),
    LastBackupAt(DateTime<Utc>),
    StorageConfig(QuotaConfig),
}

impl Setting {
    pub fn key(&self) -> SettingKey {
        match self {
            Setting::BackupFrequency(_) => SettingKey::BackupFrequency,
            Setting::LastBackupAt(_) => SettingKey::LastBackupAt,
            Setting::StorageConfig(_) => SettingKey::StorageConfig,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Setting::BackupFrequency(f) => serde_json::to_string(f)?,
            Setting::LastBackupAt(ts) => {
                serde_json::to_string(&crate::export::iso_timestamp(ts))?
            }
            Setting::StorageConfig(c) => serde_json::to_string(c)?,
        })
    }

    pub fn decode(key: SettingKey, raw: &str) -> Result<Self> {
        let invalid = |reason: String| StorageError::InvalidSetting {
            key: key.as_str().to_string(),
            reason,
        };

        match key {
            SettingKey::BackupFrequency => {
                let s = unquote(raw);
                let value = serde_json::Value::String(s.to_string());
                serde_json::from_value(value)
                    .map(Setting::BackupFrequency)
                    .map_err(|e| invalid(e.to_string()))
            }
            SettingKey::LastBackupAt => DateTime::parse_from_rfc3339(unquote(raw))
                .map(|ts| Setting::LastBackupAt(ts.with_timezone(&Utc)))
                .map_err(|e| invalid(e.to_string())),
            SettingKey::StorageConfig => serde_json::from_str(raw)
                .map(Setting::StorageConfig)
                .map_err(|e| invalid(e.to_string())),
        }
    }
}

/// Accept both JSON-quoted strings and bare text.
fn unquote(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
}

/// Raw key/value persistence for settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_raw(&self, key: SettingKey) -> Result<Option<String>>;

    async fn put_raw(&self, key: SettingKey, value: &str) -> Result<()>;

    /// Replace the value only if it still equals `expected` (`None`: key absent).
    /// Returns whether the write happened.
    async fn compare_and_swap_raw(
        &self,
        key: SettingKey,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool>;
}

pub async fn load(store: &dyn SettingsStore, key: SettingKey) -> Result<Option<Setting>> {
    match store.get_raw(key).await? {
        Some(raw) => Setting::decode(key, &raw).map(Some),
        None => Ok(None),
    }
}

pub async fn save(store: &dyn SettingsStore, setting: &Setting) -> Result<()> {
    store.put_raw(setting.key(), &setting.encode()?).await
}

/// Configured frequency; absent means manual only.
pub async fn backup_frequency(store: &dyn SettingsStore) -> Result<BackupFrequency> {
    match load(store, SettingKey::BackupFrequency).await? {
        Some(Setting::BackupFrequency(f)) => Ok(f),
        _ => Ok(BackupFrequency::None),
    }
}

/// Stored quota configuration, or the defaults when none is stored.
pub async fn quota_config(store: &dyn SettingsStore) -> Result<QuotaConfig> {
    match load(store, SettingKey::StorageConfig).await? {
        Some(Setting::StorageConfig(c)) => Ok(c),
        _ => Ok(QuotaConfig::default()),
    }
}

#[cfg(any(test, feature = "test-util"))]
use std::{collections::HashMap, sync::Mutex};

#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<SettingKey, String>>,
}

#[cfg(any(test, feature = "test-util"))]
impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SettingKey, String>>> {
        self.values
            .lock()
            .map_err(|_| StorageError::Backend("settings lock poisoned".into()))
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_raw(&self, key: SettingKey) -> Result<Option<String>> {
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn put_raw(&self, key: SettingKey, value: &str) -> Result<()> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    async fn compare_and_swap_raw(
        &self,
        key: SettingKey,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let mut values = self.lock()?;
        if values.get(&key).map(String::as_str) != expected {
            return Ok(false);
        }
        values.insert(key, value.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_frequency_accepts_quoted_and_bare() {
        assert_eq!(
            Setting::decode(SettingKey::BackupFrequency, "\"weekly\"").unwrap(),
            Setting::BackupFrequency(BackupFrequency::Weekly)
        );
        assert_eq!(
            Setting::decode(SettingKey::BackupFrequency, "daily").unwrap(),
            Setting::BackupFrequency(BackupFrequency::Daily)
        );
        assert!(Setting::decode(SettingKey::BackupFrequency, "hourly").is_err());
    }

    #[test]
    fn test_last_backup_at_encoding() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let encoded = Setting::LastBackupAt(ts).encode().unwrap();
        assert_eq!(encoded, "\"2025-01-02T03:04:05.000Z\"");
        assert_eq!(
            Setting::decode(SettingKey::LastBackupAt, &encoded).unwrap(),
            Setting::LastBackupAt(ts)
        );
    }

    #[test]
    fn test_storage_config_accepts_legacy_field_name() {
        let raw = r#"{"maxS3Size": 2048, "maxLocalSize": 1024, "warningThreshold": 0.9}"#;
        let decoded = Setting::decode(SettingKey::StorageConfig, raw).unwrap();
        let Setting::StorageConfig(config) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(config.max_remote_size, 2048);
        assert_eq!(config.max_local_size, 1024);
    }

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let store = MemorySettingsStore::new();
        assert_eq!(backup_frequency(&store).await.unwrap(), BackupFrequency::None);
        assert_eq!(quota_config(&store).await.unwrap(), QuotaConfig::default());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemorySettingsStore::new();
        let key = SettingKey::LastBackupAt;
        assert!(store.compare_and_swap_raw(key, None, "a").await.unwrap());
        assert!(!store.compare_and_swap_raw(key, None, "b").await.unwrap());
        assert!(store.compare_and_swap_raw(key, Some("a"), "c").await.unwrap());
        assert_eq!(store.get_raw(key).await.unwrap().as_deref(), Some("c"));
    }
}
