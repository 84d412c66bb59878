//! MCP tool host for sqlrelay.
//!
//! Serves a fixed catalog of database tools over newline-delimited
//! JSON-RPC 2.0 on stdio, backed by one SQL connection, and provides a
//! driver that exercises such a server as a child process.
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP-specific protocol types
//! - **transport**: Line transport (stdio, child pipes) and in-memory channels
//! - **tools**: The `show_tables` / `query_sql` catalog
//! - **server**: `ToolHost`, the sequential request loop
//! - **driver**: Scripted child-process harness
//! - **error**: Unified error types
//!
//! # Usage
//!
//! ## Host
//! ```no_run
//! use sqlrelay_core::StoreConfig;
//! use sqlrelay_mcp::server::ToolHost;
//! use sqlrelay_mcp::transport::StdioTransport;
//! use sqlrelay_store::MySqlStore;
//!
//! # async fn example() {
//! let store = MySqlStore::connect(&StoreConfig::default()).await.unwrap();
//! let mut host = ToolHost::new(store);
//! host.run(&mut StdioTransport::stdio()).await.unwrap();
//! # }
//! ```
//!
//! ## Driver
//! ```no_run
//! use sqlrelay_mcp::driver::{Driver, DriverConfig};
//!
//! # async fn example() {
//! let config = DriverConfig::new("sqlrelay-host")
//!     .env("MYSQL_DATABASE", "shop")
//!     .handshake()
//!     .list_tools();
//! let report = Driver::new(config).run().await.unwrap();
//! assert!(report.all_answered());
//! # }
//! ```

pub mod driver;
pub mod error;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

pub use driver::{Driver, DriverConfig, DriverReport, DriverStep};
pub use error::McpError;
pub use server::ToolHost;
pub use tools::HostTool;
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use types::*;
