//! SQL store access for sqlrelay.
//!
//! - **store**: the `SqlStore` trait, one connection per host
//! - **mysql**: `MySqlStore` over a single `sqlx::MySqlConnection`
//! - **format**: text renderings (table listing, pretty JSON rows)
//! - **memory**: scripted in-memory store (tests, `test-utils` feature)

pub mod error;
pub mod format;
pub mod mysql;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use error::StoreError;
pub use mysql::MySqlStore;
pub use store::{returns_rows, write_summary, Row, SqlStore, SHOW_TABLES_SQL};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
