//! Text renderings of store results handed back to tool callers.

use crate::store::Row;

/// Header line of the table listing.
pub const TABLE_LISTING_HEADER: &str = "Tables in database:";

/// Numbered listing, one table per line, 1-based, in the given order.
pub fn table_listing(tables: &[String]) -> String {
    let mut out = String::from(TABLE_LISTING_HEADER);
    for (i, name) in tables.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!("{}. {}", i + 1, name));
    }
    out
}

/// Rows as a pretty-printed JSON array.
pub fn rows_to_pretty_json(rows: &[Row]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_table_listing() {
        let text = table_listing(&["users".to_string(), "orders".to_string()]);
        assert_eq!(text, "Tables in database:\n1. users\n2. orders");
    }

    #[test]
    fn test_table_listing_empty() {
        assert_eq!(table_listing(&[]), TABLE_LISTING_HEADER);
    }

    #[test]
    fn test_rows_keep_column_order() {
        let row = json!({"z": 1, "a": "two", "m": null}).as_object().cloned().unwrap();
        let text = rows_to_pretty_json(&[row]).unwrap();
        let z = text.find("\"z\"").unwrap();
        let a = text.find("\"a\"").unwrap();
        let m = text.find("\"m\"").unwrap();
        assert!(z < a && a < m);

        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!([{"z": 1, "a": "two", "m": null}]));
    }

    #[test]
    fn test_no_rows_is_empty_array() {
        assert_eq!(rows_to_pretty_json(&[]).unwrap(), "[]");
    }
}
