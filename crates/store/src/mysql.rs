//! MySQL-backed store over a single `sqlx::MySqlConnection`.

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Number, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection, Either, Executor, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

use sqlrelay_core::StoreConfig;

use crate::error::StoreError;
use crate::store::{returns_rows, write_summary, Row, SqlStore};

/// The one connection a host owns for its whole lifetime.
///
/// Never pooled and never re-established: once the server drops it, every
/// later statement fails and is reported to the caller.
pub struct MySqlStore {
    conn: MySqlConnection,
}

impl MySqlStore {
    /// Open the connection, bounded by `config.connect_timeout`.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);

        debug!(host = %config.host, port = config.port, "Connecting to MySQL");

        let conn = tokio::time::timeout(config.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                StoreError::Connect(format!(
                    "timed out after {:?} connecting to {}:{}",
                    config.connect_timeout, config.host, config.port
                ))
            })?
            .map_err(|e| StoreError::Connect(e.to_string()))?;

        info!(host = %config.host, database = %config.database, "MySQL connected");
        Ok(Self { conn })
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> Result<(), StoreError> {
        self.conn
            .close()
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))
    }
}

#[async_trait]
impl SqlStore for MySqlStore {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, StoreError> {
        // Unprepared text protocol: statements such as USE or LOCK TABLES
        // cannot be prepared.
        let mut results = Executor::fetch_many(&mut self.conn, sqlx::raw_sql(sql));

        let mut rows = Vec::new();
        let mut affected_rows = 0u64;
        let mut insert_id = 0u64;
        while let Some(item) = results.try_next().await.map_err(StoreError::from_query)? {
            match item {
                Either::Left(done) => {
                    affected_rows += done.rows_affected();
                    if done.last_insert_id() != 0 {
                        insert_id = done.last_insert_id();
                    }
                }
                Either::Right(row) => rows.push(row_to_json(&row)?),
            }
        }

        debug!(rows = rows.len(), affected_rows, "Statement complete");
        if rows.is_empty() && !returns_rows(sql) {
            return Ok(vec![write_summary(affected_rows, insert_id)]);
        }
        Ok(rows)
    }
}

// ── Row decoding ────────────────────────────────────────────────────
//
// Statements run over the text protocol, so every non-NULL value arrives
// as the server's own text rendering and is converted from that.

/// How a MySQL column is rendered into JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Signed,
    Unsigned,
    /// FLOAT and DOUBLE. Parsed from the server's text, so FLOAT 1.1 stays 1.1.
    Float,
    /// DECIMAL keeps its exact text form.
    Decimal,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    Bit,
    Text,
}

impl ColumnKind {
    /// Map a sqlx MySQL type name (e.g. `"INT UNSIGNED"`) to a kind.
    ///
    /// sqlx reports every `TINYINT(1)` as `BOOLEAN`; it is still an integer
    /// column and may hold any TINYINT value.
    pub fn from_type_name(name: &str) -> Self {
        let unsigned = name.ends_with(" UNSIGNED");
        match name.trim_end_matches(" UNSIGNED") {
            "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                if unsigned {
                    ColumnKind::Unsigned
                } else {
                    ColumnKind::Signed
                }
            }
            "FLOAT" | "DOUBLE" => ColumnKind::Float,
            "DECIMAL" => ColumnKind::Decimal,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "DATETIME" => ColumnKind::DateTime,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "JSON" => ColumnKind::Json,
            "BIT" => ColumnKind::Bit,
            _ => ColumnKind::Text,
        }
    }

    /// Render one non-NULL text-protocol value.
    ///
    /// Anything that does not parse as its kind is kept as (lossy) text.
    pub fn render(self, raw: &[u8]) -> Value {
        let text = String::from_utf8_lossy(raw);
        let typed = match self {
            ColumnKind::Signed => text.parse::<i64>().ok().map(Value::from),
            ColumnKind::Unsigned => text.parse::<u64>().ok().map(Value::from),
            ColumnKind::Float => text
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            ColumnKind::DateTime => parse_datetime(&text)
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            ColumnKind::Timestamp => {
                parse_datetime(&text).map(|dt| Value::String(dt.and_utc().to_rfc3339()))
            }
            ColumnKind::Json => serde_json::from_slice(raw).ok(),
            ColumnKind::Bit => Some(Value::from(bits_to_u64(raw))),
            // DATE and TIME text is already ISO-8601.
            ColumnKind::Decimal | ColumnKind::Date | ColumnKind::Time | ColumnKind::Text => None,
        };
        typed.unwrap_or_else(|| Value::String(text.into_owned()))
    }
}

fn parse_datetime(text: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok()
}

/// Convert one row into a JSON object keyed by column name.
pub fn row_to_json(row: &MySqlRow) -> Result<Row, StoreError> {
    let mut out = Row::with_capacity(row.columns().len());
    for column in row.columns() {
        let idx = column.ordinal();
        let decode_err = |e: sqlx::Error| StoreError::Decode {
            column: column.name().to_string(),
            message: e.to_string(),
        };
        let raw = row.try_get_raw(idx).map_err(decode_err)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let bytes = row.try_get_unchecked::<&[u8], _>(idx).map_err(decode_err)?;
            ColumnKind::from_type_name(column.type_info().name()).render(bytes)
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

/// BIT(n) arrives big-endian; widths above 64 keep the low 64 bits.
fn bits_to_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
