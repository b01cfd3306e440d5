//! Paged reads of CRM tables for export.

use crate::db::connection::DbPool;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crm_storage::export::TableScanner;
use crm_storage::{Result, StorageError};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde_json::{Map, Number, Value};

pub type Row = Map<String, Value>;

/// Reads `(table, offset, limit)` pages ordered by `rowid`.
#[derive(Clone)]
pub struct SqliteTableScanner {
    db: DbPool,
}

impl SqliteTableScanner {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::Validation(format!("invalid table name: {table:?}")))
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(BASE64.encode(b)),
    }
}

pub fn scan_page(
    conn: &Connection,
    table: &str,
    offset: u64,
    limit: u64,
) -> anyhow::Result<Vec<Row>> {
    let sql = format!("SELECT * FROM \"{table}\" ORDER BY rowid LIMIT ?1 OFFSET ?2");
    let mut stmt = conn.prepare(&sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();

    let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
        let mut out = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            out.insert(name.clone(), to_json(row.get_ref(i)?));
        }
        Ok(out)
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[async_trait]
impl TableScanner for SqliteTableScanner {
    type Row = Row;

    async fn scan(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Row>> {
        validate_table(table)?;
        let db = self.db.clone();
        let table = table.to_string();
        let table_for_err = table.clone();

        tokio::task::spawn_blocking(move || {
            let conn = db.get()?;
            scan_page(&conn, &table, offset, limit)
        })
        .await
        .map_err(StorageError::backend)?
        .map_err(|e| StorageError::Scan(format!("{table_for_err}: {e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;
    use tempfile::TempDir;

    fn pool_with_clients(n: usize) -> (TempDir, DbPool) {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(&dir.path().join("crm.db")).unwrap();
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE clients (id INTEGER PRIMARY KEY, name TEXT, balance REAL, avatar BLOB, note TEXT)",
        )
        .unwrap();
        for i in 0..n {
            conn.execute(
                "INSERT INTO clients (name, balance, avatar, note) VALUES (?1, ?2, ?3, NULL)",
                params![format!("client-{i}"), i as f64 + 0.5, vec![1u8, 2, 3]],
            )
            .unwrap();
        }
        drop(conn);
        (dir, pool)
    }

    #[tokio::test]
    async fn test_scan_pages_in_rowid_order() {
        let (_dir, pool) = pool_with_clients(5);
        let scanner = SqliteTableScanner::new(pool);

        let first = scanner.scan("clients", 0, 2).await.unwrap();
        let last = scanner.scan("clients", 4, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["name"], "client-0");
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["name"], "client-4");
        assert!(scanner.scan("clients", 5, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_value_mapping() {
        let (_dir, pool) = pool_with_clients(1);
        let rows = SqliteTableScanner::new(pool).scan("clients", 0, 10).await.unwrap();
        let row = &rows[0];
        assert_eq!(row["id"], 1);
        assert_eq!(row["balance"], 0.5);
        assert_eq!(row["avatar"], "AQID");
        assert!(row["note"].is_null());
    }

    #[tokio::test]
    async fn test_rejects_bad_identifiers_and_missing_tables() {
        let (_dir, pool) = pool_with_clients(0);
        let scanner = SqliteTableScanner::new(pool);
        assert!(matches!(
            scanner.scan("clients\"; DROP TABLE clients; --", 0, 10).await,
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            scanner.scan("ghosts", 0, 10).await,
            Err(StorageError::Scan(_))
        ));
    }
}
