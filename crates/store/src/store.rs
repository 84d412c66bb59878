//! The store seam: one live connection to a backing SQL database.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// One result row, keyed by column name in column order.
pub type Row = serde_json::Map<String, Value>;

/// Introspection statement used to list tables.
pub const SHOW_TABLES_SQL: &str = "SHOW TABLES";

/// A single connection to a SQL store.
///
/// Methods take `&mut self`: the host owns the store outright and runs one
/// statement at a time, so no locking is involved.
#[async_trait]
pub trait SqlStore: Send {
    /// Execute `sql` verbatim and collect every row.
    ///
    /// Statements without a result set (INSERT, DDL, ...) yield one
    /// [`write_summary`] row.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError>;

    /// List table names, taken from the first column of each
    /// [`SHOW_TABLES_SQL`] row in the order the store returns them.
    async fn list_tables(&mut self) -> Result<Vec<String>, StoreError> {
        let rows = self.query(SHOW_TABLES_SQL).await?;
        Ok(rows.iter().filter_map(first_column_text).collect())
    }
}

/// Column holding the affected-row count of a write statement.
pub const AFFECTED_ROWS_COLUMN: &str = "affectedRows";
/// Column holding the auto-increment id generated by a write statement.
pub const INSERT_ID_COLUMN: &str = "insertId";

/// The single row a statement without a result set reports.
pub fn write_summary(affected_rows: u64, insert_id: u64) -> Row {
    let mut row = Row::new();
    row.insert(AFFECTED_ROWS_COLUMN.to_string(), Value::from(affected_rows));
    row.insert(INSERT_ID_COLUMN.to_string(), Value::from(insert_id));
    row
}

/// Whether `sql` is a statement that produces a result set, judged by its
/// first keyword after leading whitespace, comments and parentheses.
///
/// An empty result from such a statement is `[]`; any other statement is
/// reported through [`write_summary`].
pub fn returns_rows(sql: &str) -> bool {
    const ROW_KEYWORDS: [&str; 8] =
        ["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH", "VALUES", "TABLE"];

    let keyword: String = skip_leading_noise(sql)
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    ROW_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(&keyword))
}

fn skip_leading_noise(mut sql: &str) -> &str {
    loop {
        let trimmed = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(rest) = trimmed.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, after)| after);
        } else if trimmed.starts_with("-- ") || trimmed.starts_with('#') {
            sql = trimmed.split_once('\n').map_or("", |(_, after)| after);
        } else {
            return trimmed;
        }
    }
}

/// Render the first column of a row as text. Strings are unquoted.
pub fn first_column_text(row: &Row) -> Option<String> {
    row.values().next().map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
