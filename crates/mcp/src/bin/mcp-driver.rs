//! mcp-driver — exercise an MCP server process from a script.
//!
//! Spawns the server (by default the `sqlrelay-host` binary installed next
//! to this one), writes the requested JSON-RPC messages on a fixed delay,
//! and prints every response. Child stderr is relayed with a prefix.
//!
//! ```text
//! mcp-driver --list-tools
//! mcp-driver --env MYSQL_DATABASE=shop --call query_sql --args '{"sql":"SELECT 1"}'
//! mcp-driver --no-handshake --request '{"jsonrpc":"2.0","id":7,"method":"ping"}' -- ./server
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use sqlrelay_mcp::driver::{Driver, DriverConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Drive an MCP server over stdio and report its replies.
#[derive(Parser, Debug)]
#[command(name = "mcp-driver", version, about)]
struct Cli {
    /// Extra environment for the server, as KEY=VALUE. Repeatable.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Kill the server after this many milliseconds.
    #[arg(long, env = "MCP_DRIVER_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    /// Delay before each scripted message, in milliseconds.
    #[arg(long, env = "MCP_DRIVER_DELAY_MS", default_value_t = 500)]
    delay_ms: u64,

    /// How long the server may take to exit after stdin closes.
    #[arg(long, default_value_t = 500)]
    grace_ms: u64,

    /// Skip the initialize handshake.
    #[arg(long)]
    no_handshake: bool,

    /// Request the tool catalog.
    #[arg(long)]
    list_tools: bool,

    /// Call this tool.
    #[arg(long, value_name = "NAME")]
    call: Option<String>,

    /// Arguments for --call, as a JSON object.
    #[arg(long, value_name = "JSON", default_value = "{}")]
    args: String,

    /// Raw JSON message to send as-is. Repeatable.
    #[arg(long, value_name = "JSON")]
    request: Vec<String>,

    /// Server command and its arguments.
    #[arg(last = true)]
    command: Vec<String>,
}

fn default_server() -> anyhow::Result<String> {
    let exe = std::env::current_exe().context("cannot locate mcp-driver executable")?;
    let dir = exe.parent().map(PathBuf::from).unwrap_or_default();
    let host = dir.join(format!("sqlrelay-host{}", std::env::consts::EXE_SUFFIX));
    Ok(host.to_string_lossy().into_owned())
}

fn parse_env_pair(pair: &str) -> anyhow::Result<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("invalid --env value {pair:?}, expected KEY=VALUE"),
    }
}

fn build_config(cli: Cli) -> anyhow::Result<DriverConfig> {
    let mut command = cli.command.into_iter();
    let program = match command.next() {
        Some(program) => program,
        None => default_server()?,
    };

    let mut config = DriverConfig::new(program)
        .args(command)
        .timeout(Duration::from_millis(cli.timeout_ms))
        .grace(Duration::from_millis(cli.grace_ms))
        .step_delay(Duration::from_millis(cli.delay_ms));

    for pair in &cli.env {
        let (key, value) = parse_env_pair(pair)?;
        config = config.env(key, value);
    }

    if !cli.no_handshake {
        config = config.handshake();
    }
    if cli.list_tools {
        config = config.list_tools();
    }
    if let Some(name) = &cli.call {
        let arguments: Value =
            serde_json::from_str(&cli.args).context("--args is not valid JSON")?;
        config = config.call_tool(name, arguments);
    }
    for raw in &cli.request {
        let message: Value =
            serde_json::from_str(raw).with_context(|| format!("--request is not valid JSON: {raw}"))?;
        config = config.raw(message);
    }
    Ok(config)
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

    let config = build_config(Cli::parse())?;
    let expected = config.expected_ids().len();
    info!(program = %config.program, steps = config.steps.len(), expected, "Starting driver");

    let report = Driver::new(config)
        .run()
        .await
        .context("failed to run MCP server")?;

    for response in &report.responses {
        println!("{}", serde_json::to_string(response)?);
    }
    for line in &report.stdout_noise {
        eprintln!("[server stdout] {line}");
    }
    for line in &report.stderr {
        eprintln!("[server stderr] {line}");
    }

    if report.is_likely_startup_failure() {
        warn!("No output received from the server; it probably failed to start");
    }
    if !report.missing_ids.is_empty() {
        let ids: Vec<String> = report.missing_ids.iter().map(ToString::to_string).collect();
        warn!(ids = %ids.join(", "), "Requests left unanswered");
    }
    if let Some(code) = report.exit_code {
        info!(code, "Server exited");
    }

    Ok(if report.all_answered() && !report.is_likely_startup_failure() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("MYSQL_PORT=3307").unwrap(),
            ("MYSQL_PORT".to_string(), "3307".to_string())
        );
        assert_eq!(
            parse_env_pair("MYSQL_PASSWORD=a=b").unwrap(),
            ("MYSQL_PASSWORD".to_string(), "a=b".to_string())
        );
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("NOVALUE").is_err());
    }

    #[test]
    fn test_build_config_script_order() {
        let cli = Cli::parse_from([
            "mcp-driver",
            "--list-tools",
            "--call",
            "query_sql",
            "--args",
            r#"{"sql":"SELECT 1"}"#,
            "--request",
            r#"{"jsonrpc":"2.0","id":"raw","method":"ping"}"#,
            "--",
            "server",
            "--flag",
        ]);
        let config = build_config(cli).unwrap();
        assert_eq!(config.program, "server");
        assert_eq!(config.args, vec!["--flag"]);

        let methods: Vec<&str> = config
            .steps
            .iter()
            .map(|s| s.message["method"].as_str().unwrap())
            .collect();
        assert_eq!(
            methods,
            vec!["initialize", "notifications/initialized", "tools/list", "tools/call", "ping"]
        );
        assert_eq!(config.steps[3].message["params"]["arguments"]["sql"], "SELECT 1");
        assert_eq!(config.expected_ids().len(), 4);
    }

    #[test]
    fn test_build_config_rejects_bad_json() {
        let cli = Cli::parse_from(["mcp-driver", "--request", "{not json", "--", "server"]);
        assert!(build_config(cli).is_err());
    }
}
