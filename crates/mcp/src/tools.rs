//! The host's fixed tool catalog.
//!
//! Tools are an enum rather than a name-keyed registry: the catalog never
//! changes after startup, and every name resolves through one exhaustive
//! match.

use serde_json::{json, Value};
use tracing::debug;

use sqlrelay_store::format::{rows_to_pretty_json, table_listing};
use sqlrelay_store::SqlStore;

use crate::error::McpError;
use crate::types::{CallToolResult, ToolDescriptor};

/// A tool the host can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTool {
    /// List the tables of the connected database.
    ShowTables,
    /// Run one SQL statement verbatim.
    QuerySql,
}

impl HostTool {
    pub const ALL: [HostTool; 2] = [HostTool::ShowTables, HostTool::QuerySql];

    pub fn name(self) -> &'static str {
        match self {
            HostTool::ShowTables => "show_tables",
            HostTool::QuerySql => "query_sql",
        }
    }

    /// Resolve a tool by exact name.
    pub fn from_name(name: &str) -> Result<Self, McpError> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))
    }

    pub fn descriptor(self) -> ToolDescriptor {
        match self {
            HostTool::ShowTables => ToolDescriptor {
                name: self.name().to_string(),
                description: "List all tables in the connected database".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            HostTool::QuerySql => ToolDescriptor {
                name: self.name().to_string(),
                description: "Execute a SQL statement and return the rows as JSON".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "sql": {
                            "type": "string",
                            "description": "SQL statement to execute"
                        }
                    },
                    "required": ["sql"]
                }),
            },
        }
    }

    /// Run the tool against `store`.
    ///
    /// `query_sql` executes its argument with no validation or statement-type
    /// restriction, under whatever privileges the configured user has.
    pub async fn execute<S: SqlStore + ?Sized>(
        self,
        arguments: &Value,
        store: &mut S,
    ) -> Result<CallToolResult, McpError> {
        match self {
            HostTool::ShowTables => {
                let tables = store.list_tables().await?;
                debug!(count = tables.len(), "Listed tables");
                Ok(CallToolResult::text(table_listing(&tables)))
            }
            HostTool::QuerySql => {
                let sql = arguments
                    .get("sql")
                    .and_then(Value::as_str)
                    .ok_or_else(|| McpError::InvalidParams("missing string argument 'sql'".to_string()))?;
                debug!(sql = %sql, "Executing statement");
                let rows = store.query(sql).await?;
                Ok(CallToolResult::text(rows_to_pretty_json(&rows)?))
            }
        }
    }
}

/// The full catalog, in advertised order.
pub fn catalog() -> Vec<ToolDescriptor> {
    HostTool::ALL.into_iter().map(HostTool::descriptor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlrelay_store::MemoryStore;

    #[test]
    fn test_catalog_names_are_unique_and_ordered() {
        let names: Vec<String> = catalog().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["show_tables", "query_sql"]);
    }

    #[test]
    fn test_query_sql_schema_requires_sql() {
        let tool = HostTool::QuerySql.descriptor();
        assert_eq!(tool.input_schema["required"], json!(["sql"]));
        assert_eq!(tool.input_schema["properties"]["sql"]["type"], "string");
    }

    #[test]
    fn test_from_name_exact_match_only() {
        assert_eq!(HostTool::from_name("show_tables").unwrap(), HostTool::ShowTables);
        assert_eq!(HostTool::from_name("query_sql").unwrap(), HostTool::QuerySql);
        assert!(matches!(
            HostTool::from_name("SHOW_TABLES"),
            Err(McpError::ToolNotFound(name)) if name == "SHOW_TABLES"
        ));
    }

    #[tokio::test]
    async fn test_show_tables_ignores_arguments() {
        let mut store = MemoryStore::new("shop").with_tables(["users", "orders"]);
        let result = HostTool::ShowTables
            .execute(&json!({"sql": "DROP TABLE users"}), &mut store)
            .await
            .unwrap();
        assert_eq!(result.joined_text(), "Tables in database:\n1. users\n2. orders");
        assert_eq!(store.executed(), ["SHOW TABLES"]);
    }

    #[tokio::test]
    async fn test_query_sql_missing_argument() {
        let mut store = MemoryStore::new("shop");
        let err = HostTool::QuerySql.execute(&json!({}), &mut store).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidParams(_)));

        let err = HostTool::QuerySql
            .execute(&json!({"sql": 5}), &mut store)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidParams(_)));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_query_sql_pretty_json() {
        let mut store =
            MemoryStore::new("shop").with_rows("SELECT 1 AS x", vec![json!({"x": 1})]);
        let result = HostTool::QuerySql
            .execute(&json!({"sql": "SELECT 1 AS x"}), &mut store)
            .await
            .unwrap();
        let text = result.joined_text();
        assert!(text.contains('\n'), "expected pretty-printed output: {text}");
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!([{"x": 1}]));
    }

    #[tokio::test]
    async fn test_query_sql_write_reports_affected_rows() {
        let sql = "UPDATE users SET active = 0 WHERE id < 3";
        let mut store = MemoryStore::new("shop").with_write(sql, 2, 0);
        let result = HostTool::QuerySql
            .execute(&json!({"sql": sql}), &mut store)
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result.joined_text()).unwrap();
        assert_eq!(parsed, json!([{"affectedRows": 2, "insertId": 0}]));
    }
}
