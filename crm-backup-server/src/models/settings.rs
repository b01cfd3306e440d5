use crate::db::connection::DbPool;
use async_trait::async_trait;
use crm_storage::settings::{SettingKey, SettingsStore};
use crm_storage::{Result, StorageError};
use rusqlite::{params, Connection, OptionalExtension};

pub fn get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM settings WHERE key = ?", params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Conditional write. `expected = None` only succeeds while the key is absent.
pub fn compare_and_swap(
    conn: &Connection,
    key: &str,
    expected: Option<&str>,
    value: &str,
) -> anyhow::Result<bool> {
    let changed = match expected {
        None => conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
            params![key, value],
        )?,
        Some(current) => conn.execute(
            "UPDATE settings SET value = ?3 WHERE key = ?1 AND value = ?2",
            params![key, current, value],
        )?,
    };
    Ok(changed == 1)
}

/// [`SettingsStore`] backed by the `settings` table.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    db: DbPool,
}

impl SqliteSettingsStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            f(&*conn)
        })
        .await
        .map_err(StorageError::backend)?
        .map_err(|e| StorageError::Backend(format!("{e:#}")))
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get_raw(&self, key: SettingKey) -> Result<Option<String>> {
        self.with_conn(move |conn| get(conn, key.as_str())).await
    }

    async fn put_raw(&self, key: SettingKey, value: &str) -> Result<()> {
        let value = value.to_string();
        self.with_conn(move |conn| set(conn, key.as_str(), &value)).await
    }

    async fn compare_and_swap_raw(
        &self,
        key: SettingKey,
        expected: Option<&str>,
        value: &str,
    ) -> Result<bool> {
        let expected = expected.map(str::to_string);
        let value = value.to_string();
        self.with_conn(move |conn| {
            compare_and_swap(conn, key.as_str(), expected.as_deref(), &value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connection::create_pool, migrate::migrate};
    use crm_storage::settings::{self, BackupFrequency, Setting};
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteSettingsStore) {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("crm.db")).unwrap();
        migrate(&pool).unwrap();
        (dir, SqliteSettingsStore::new(pool))
    }

    #[tokio::test]
    async fn test_round_trips_typed_settings() {
        let (_dir, store) = store();
        settings::save(&store, &Setting::BackupFrequency(BackupFrequency::Weekly))
            .await
            .unwrap();
        assert_eq!(
            settings::backup_frequency(&store).await.unwrap(),
            BackupFrequency::Weekly
        );
        assert_eq!(
            store.get_raw(SettingKey::BackupFrequency).await.unwrap().as_deref(),
            Some("\"weekly\"")
        );
    }

    #[tokio::test]
    async fn test_compare_and_swap_only_one_winner() {
        let (_dir, store) = store();
        let key = SettingKey::LastBackupAt;

        assert!(store.compare_and_swap_raw(key, None, "t1").await.unwrap());
        assert!(!store.compare_and_swap_raw(key, None, "t2").await.unwrap());
        assert!(!store.compare_and_swap_raw(key, Some("stale"), "t3").await.unwrap());
        assert!(store.compare_and_swap_raw(key, Some("t1"), "t4").await.unwrap());
        assert_eq!(store.get_raw(key).await.unwrap().as_deref(), Some("t4"));
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_single_winner() {
        let (_dir, store) = store();
        store.put_raw(SettingKey::LastBackupAt, "old").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let claim = format!("new-{i}");
                store
                    .compare_and_swap_raw(SettingKey::LastBackupAt, Some("old"), &claim)
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
