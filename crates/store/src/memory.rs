//! In-memory store with canned results, for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::store::{write_summary, Row, SqlStore, SHOW_TABLES_SQL};

/// A scripted [`SqlStore`].
///
/// `SHOW TABLES` answers from the configured table list; any other statement
/// must be registered with [`with_rows`](Self::with_rows),
/// [`with_write`](Self::with_write) or [`with_failure`](Self::with_failure).
#[derive(Debug, Default)]
pub struct MemoryStore {
    database: String,
    tables: Vec<String>,
    responses: HashMap<String, Result<Vec<Row>, String>>,
    executed: Vec<String>,
    lost: Option<String>,
}

impl MemoryStore {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    /// Answer `sql` with `rows`. Each row must be a JSON object.
    pub fn with_rows(mut self, sql: impl Into<String>, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.responses.insert(sql.into(), Ok(rows));
        self
    }

    /// Answer `sql` as a write statement that touched `affected_rows` rows.
    pub fn with_write(mut self, sql: impl Into<String>, affected_rows: u64, insert_id: u64) -> Self {
        self.responses
            .insert(sql.into(), Ok(vec![write_summary(affected_rows, insert_id)]));
        self
    }

    /// Fail `sql` with the given driver message.
    pub fn with_failure(mut self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses.insert(sql.into(), Err(message.into()));
        self
    }

    /// Simulate the server dropping the connection: every later statement fails.
    pub fn lose_connection(&mut self, message: impl Into<String>) {
        self.lost = Some(message.into());
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

#[async_trait]
impl SqlStore for MemoryStore {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError> {
        self.executed.push(sql.to_string());

        if let Some(msg) = &self.lost {
            return Err(StoreError::Query(msg.clone()));
        }

        if sql == SHOW_TABLES_SQL {
            let column = format!("Tables_in_{}", self.database);
            return Ok(self
                .tables
                .iter()
                .map(|t| {
                    let mut row = Row::new();
                    row.insert(column.clone(), Value::String(t.clone()));
                    row
                })
                .collect());
        }

        match self.responses.get(sql) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(msg)) => Err(StoreError::Query(msg.clone())),
            None => Err(StoreError::Query(format!(
                "You have an error in your SQL syntax near '{sql}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_show_tables_in_listing_order() {
        let mut store = MemoryStore::new("shop").with_tables(["users", "orders"]);
        assert_eq!(store.list_tables().await.unwrap(), vec!["users", "orders"]);

        let rows = store.query(SHOW_TABLES_SQL).await.unwrap();
        assert_eq!(rows[0].get("Tables_in_shop"), Some(&json!("users")));
    }

    #[tokio::test]
    async fn test_canned_rows_and_failures() {
        let mut store = MemoryStore::new("shop")
            .with_rows("SELECT 1 AS x", vec![json!({"x": 1})])
            .with_failure("SELECT * FROM nope", "Table 'shop.nope' doesn't exist");

        let rows = store.query("SELECT 1 AS x").await.unwrap();
        assert_eq!(Value::Object(rows[0].clone()), json!({"x": 1}));

        let err = store.query("SELECT * FROM nope").await.unwrap_err();
        assert_eq!(err.message(), "Table 'shop.nope' doesn't exist");

        assert_eq!(store.executed(), ["SELECT 1 AS x", "SELECT * FROM nope"]);
    }

    #[tokio::test]
    async fn test_write_reports_affected_rows() {
        let mut store =
            MemoryStore::new("shop").with_write("INSERT INTO users (name) VALUES ('ann')", 1, 7);
        let rows = store
            .query("INSERT INTO users (name) VALUES ('ann')")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"affectedRows": 1, "insertId": 7})
        );
    }

    #[tokio::test]
    async fn test_lost_connection_fails_every_statement() {
        let mut store = MemoryStore::new("shop").with_tables(["users"]);
        store.lose_connection("Connection lost: The server closed the connection.");
        assert!(store.list_tables().await.is_err());
        assert!(store.query("SELECT 1").await.is_err());
    }
}
