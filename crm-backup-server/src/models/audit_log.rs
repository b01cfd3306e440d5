use crate::db::connection::DbPool;
use async_trait::async_trait;
use crm_storage::audit::{AuditEntry, AuditSink};
use crm_storage::{Result, StorageError};
use rusqlite::{params, Connection};

pub fn insert(conn: &Connection, entry: &AuditEntry) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO audit_logs (id, action, entity_type, actor_id, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id,
            entry.action,
            entry.entity_type,
            entry.actor_id,
            entry.details.to_string()
        ],
    )?;
    Ok(id)
}

/// [`AuditSink`] writing to the `audit_logs` table.
#[derive(Clone)]
pub struct SqliteAuditSink {
    db: DbPool,
}

impl SqliteAuditSink {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            insert(&conn, &entry)
        })
        .await
        .map_err(StorageError::backend)?
        .map(|_| ())
        .map_err(|e| StorageError::Backend(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connection::create_pool, migrate::migrate};
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct AuditLog {
        id: String,
        action: String,
        entity_type: String,
        actor_id: Option<String>,
        details: serde_json::Value,
        created_at: String,
    }

    fn recent(conn: &Connection, limit: u32) -> anyhow::Result<Vec<AuditLog>> {
        let mut stmt = conn.prepare(
            "SELECT id, action, entity_type, actor_id, details, created_at FROM audit_logs ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let details: String = row.get(4)?;
            Ok(AuditLog {
                id: row.get(0)?,
                action: row.get(1)?,
                entity_type: row.get(2)?,
                actor_id: row.get(3)?,
                details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    #[tokio::test]
    async fn test_append_persists_entry() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("crm.db")).unwrap();
        migrate(&pool).unwrap();

        let sink = SqliteAuditSink::new(pool.clone());
        sink.append(
            AuditEntry::new("backup.created", "backup")
                .by("admin-1")
                .details(json!({ "fileName": "backup-x.json", "size": 42 })),
        )
        .await
        .unwrap();

        let conn = pool.get().unwrap();
        let logs = recent(&conn, 10).unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].id.is_empty());
        assert_eq!(logs[0].action, "backup.created");
        assert_eq!(logs[0].entity_type, "backup");
        assert!(logs[0].created_at.ends_with('Z'));
        assert_eq!(logs[0].actor_id.as_deref(), Some("admin-1"));
        assert_eq!(logs[0].details["size"], 42);
    }
}
