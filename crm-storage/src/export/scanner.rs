//! Paginated access to the relational tables being exported.

use crate::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Reads one bounded page of a table.
///
/// `scan` returns at most `limit` rows in a stable order starting at `offset`.
/// An empty page means the table is exhausted. Every call is an independent
/// read, so a table that is written to concurrently may shift between pages.
#[async_trait]
pub trait TableScanner: Send + Sync {
    type Row: Serialize + Send;

    async fn scan(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Self::Row>>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// Scanner over fixed in-memory tables.
    #[derive(Default)]
    pub(crate) struct VecScanner {
        pub tables: HashMap<String, Vec<serde_json::Value>>,
    }

    impl VecScanner {
        pub(crate) fn with_table(mut self, name: &str, rows: Vec<serde_json::Value>) -> Self {
            self.tables.insert(name.to_string(), rows);
            self
        }
    }

    #[async_trait]
    impl TableScanner for VecScanner {
        type Row = serde_json::Value;

        async fn scan(&self, table: &str, offset: u64, limit: u64) -> Result<Vec<Self::Row>> {
            let rows = self.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
            Ok(rows
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }
}
