//! sqlrelay-host — MCP tool host over stdio.
//!
//! Connects once to the configured MySQL database, then serves
//! `tools/list` and `tools/call` as newline-delimited JSON-RPC on stdin and
//! stdout until stdin closes. Logs go to stderr; stdout carries protocol
//! lines only.
//!
//! `sqlrelay-host query "<SQL>"` runs one statement and prints the rows.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{error, info};

use sqlrelay_core::{load_dotenv, Config};
use sqlrelay_mcp::server::ToolHost;
use sqlrelay_mcp::transport::StdioTransport;
use sqlrelay_store::format::rows_to_pretty_json;
use sqlrelay_store::{MySqlStore, SqlStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// MCP tool host exposing a MySQL database over stdio.
#[derive(Parser, Debug)]
#[command(name = "sqlrelay-host", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve MCP requests on stdin/stdout (default).
    Serve,
    /// Run one SQL statement and print the rows as JSON.
    Query {
        /// Statement to execute.
        sql: Option<String>,
    },
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Query { sql } => Ok(query_once(&config, sql.as_deref()).await),
    }
}

async fn serve(config: &Config) -> anyhow::Result<ExitCode> {
    let store = match MySqlStore::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "Database connection failed");
            return Ok(ExitCode::FAILURE);
        }
    };

    let mut host = ToolHost::new(store);
    let mut transport = StdioTransport::stdio();
    info!("Tool host ready on stdio");

    host.run(&mut transport)
        .await
        .context("stdio transport failed")?;

    info!("stdin closed, shutting down");
    if let Err(e) = host.into_store().close().await {
        tracing::warn!(error = %e, "Error closing database connection");
    }
    Ok(ExitCode::SUCCESS)
}

async fn query_once(config: &Config, sql: Option<&str>) -> ExitCode {
    let Some(sql) = sql.filter(|s| !s.trim().is_empty()) else {
        return report_error("No SQL query provided.");
    };

    let mut store = match MySqlStore::connect(&config.store).await {
        Ok(store) => store,
        Err(e) => return report_error(&e.message()),
    };

    let outcome = store.query(sql).await;
    if let Err(e) = store.close().await {
        tracing::warn!(error = %e, "Error closing database connection");
    }

    let rendered = outcome
        .map_err(|e| e.message())
        .and_then(|rows| rows_to_pretty_json(&rows).map_err(|e| e.to_string()));
    match rendered {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(message) => report_error(&message),
    }
}

fn report_error(message: &str) -> ExitCode {
    eprintln!("{}", json!({ "error": message }));
    ExitCode::FAILURE
}
