//! Driver harness: run an MCP server as a child process from a script.
//!
//! The driver launches the server with an explicit environment, writes a
//! scripted sequence of JSON-RPC messages on fixed delays, collects every
//! stdout/stderr line, and enforces a wall-clock timeout after which the
//! child is killed regardless of outstanding replies.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};

use crate::error::McpError;
use crate::transport::{LineTransport, McpTransport};
use crate::types::{JsonRpcResponse, RpcId, PROTOCOL_VERSION};

/// Client name sent in the `initialize` handshake.
pub const DRIVER_CLIENT_NAME: &str = "sqlrelay-driver";

/// One scripted message and how long to wait before writing it.
///
/// The delay is measured from the previous write (or from spawn, for the
/// first step).
#[derive(Debug, Clone)]
pub struct DriverStep {
    pub delay: Duration,
    pub message: Value,
}

impl DriverStep {
    /// The id this step expects a reply for, if it is a request.
    pub fn expected_id(&self) -> Option<RpcId> {
        self.message
            .get("id")
            .and_then(|id| serde_json::from_value(id.clone()).ok())
    }
}

/// What to spawn and what to send it.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub steps: Vec<DriverStep>,
    /// Overall wall-clock limit, measured from spawn. The child never
    /// outlives it, grace period included.
    pub timeout: Duration,
    /// How long the child gets to exit on its own once stdin is closed,
    /// capped by whatever remains of `timeout`.
    pub grace: Duration,
    /// Delay applied to steps added through the builder methods.
    pub step_delay: Duration,
    next_id: i64,
}

impl DriverConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);
    pub const DEFAULT_STEP_DELAY: Duration = Duration::from_millis(500);

    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            steps: Vec::new(),
            timeout: Self::DEFAULT_TIMEOUT,
            grace: Self::DEFAULT_GRACE,
            step_delay: Self::DEFAULT_STEP_DELAY,
            next_id: 1,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set a variable in the child's environment (layered over ours).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    fn take_id(&mut self) -> RpcId {
        let id = self.next_id;
        self.next_id += 1;
        RpcId::Number(id)
    }

    fn push_request(mut self, method: &str, params: Option<Value>) -> Self {
        let id = self.take_id();
        let mut message = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(params) = params {
            message["params"] = params;
        }
        self.push_raw(message)
    }

    fn push_raw(mut self, message: Value) -> Self {
        self.steps.push(DriverStep {
            delay: self.step_delay,
            message,
        });
        self
    }

    /// `initialize` followed by `notifications/initialized`.
    pub fn handshake(self) -> Self {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": DRIVER_CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        self.push_request("initialize", Some(params))
            .push_raw(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
    }

    pub fn list_tools(self) -> Self {
        self.push_request("tools/list", None)
    }

    pub fn call_tool(self, name: &str, arguments: Value) -> Self {
        self.push_request("tools/call", Some(json!({"name": name, "arguments": arguments})))
    }

    /// Send an arbitrary message as-is. Replies are awaited only if it has an `id`.
    pub fn raw(self, message: Value) -> Self {
        self.push_raw(message)
    }

    /// Ids of every scripted request, in script order.
    pub fn expected_ids(&self) -> Vec<RpcId> {
        self.steps.iter().filter_map(DriverStep::expected_id).collect()
    }
}

/// Everything observed while driving the child.
#[derive(Debug, Default)]
pub struct DriverReport {
    /// JSON-RPC responses, in arrival order.
    pub responses: Vec<JsonRpcResponse>,
    /// Stdout lines that were not JSON-RPC responses.
    pub stdout_noise: Vec<String>,
    /// Stderr lines, in arrival order.
    pub stderr: Vec<String>,
    /// Scripted request ids that never got a reply.
    pub missing_ids: Vec<RpcId>,
    /// Ids that were answered more than once.
    pub duplicate_ids: Vec<RpcId>,
    /// The timeout elapsed before the script finished.
    pub timed_out: bool,
    /// The driver had to kill the child.
    pub killed: bool,
    /// Exit code, when the child exited normally.
    pub exit_code: Option<i32>,
}

impl DriverReport {
    /// Whether the child wrote anything at all, on either stream.
    pub fn produced_output(&self) -> bool {
        !self.responses.is_empty() || !self.stdout_noise.is_empty() || !self.stderr.is_empty()
    }

    /// No output at all before termination usually means the server never
    /// got as far as starting up.
    pub fn is_likely_startup_failure(&self) -> bool {
        !self.produced_output()
    }

    /// Every scripted request got exactly one reply.
    pub fn all_answered(&self) -> bool {
        self.missing_ids.is_empty() && self.duplicate_ids.is_empty()
    }

    pub fn response(&self, id: &RpcId) -> Option<&JsonRpcResponse> {
        self.responses.iter().find(|r| &r.id == id)
    }
}

enum Event {
    Stdout(String),
    Stderr(String),
    StdoutClosed,
}

/// Runs one [`DriverConfig`] to completion.
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Spawn the child, play the script, and report what happened.
    ///
    /// Finishes when every scripted request has a reply, when the child
    /// closes its stdout, or when the timeout elapses, whichever is first.
    /// Then stdin is closed; a child still running after the grace period
    /// (or at the deadline, if that comes first) is killed.
    pub async fn run(self) -> Result<DriverReport, McpError> {
        let DriverConfig {
            program,
            args,
            env,
            steps,
            timeout: limit,
            grace,
            ..
        } = self.config;

        tracing::info!(program = %program, "Spawning MCP server process");

        let mut child = Command::new(&program)
            .args(&args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stdin".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            McpError::ServerUnavailable("Failed to capture server stderr".to_string())
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let readers = [
            spawn_line_reader(stdout, tx.clone(), Event::Stdout, Some(Event::StdoutClosed)),
            spawn_line_reader(stderr, tx, Event::Stderr, None),
        ];

        let mut report = DriverReport::default();
        let mut pending: BTreeSet<RpcId> = steps.iter().filter_map(DriverStep::expected_id).collect();
        let expects_replies = !pending.is_empty();
        let mut answered: BTreeSet<RpcId> = BTreeSet::new();

        let start = Instant::now();
        let deadline = start + limit;
        let mut stdin = Some(stdin);
        let mut steps = steps.into_iter().peekable();
        let mut next_write = start + steps.peek().map(|s| s.delay).unwrap_or_default();

        loop {
            if steps.peek().is_none() && expects_replies && pending.is_empty() {
                tracing::debug!("All scripted requests answered");
                break;
            }

            tokio::select! {
                _ = sleep_until(deadline) => {
                    tracing::warn!(timeout = ?limit, "Timed out waiting for the server");
                    report.timed_out = true;
                    break;
                }
                _ = sleep_until(next_write), if steps.peek().is_some() => {
                    if let Some(step) = steps.next() {
                        write_step(&mut stdin, &step).await;
                    }
                    next_write = Instant::now() + steps.peek().map(|s| s.delay).unwrap_or_default();
                }
                event = rx.recv() => match event {
                    Some(Event::Stdout(line)) => {
                        record_stdout(&mut report, &mut pending, &mut answered, line);
                    }
                    Some(Event::Stderr(line)) => {
                        tracing::debug!(line = %line, "Server stderr");
                        report.stderr.push(line);
                    }
                    Some(Event::StdoutClosed) | None => {
                        tracing::debug!("Server closed stdout");
                        break;
                    }
                },
            }
        }

        // Closing stdin lets a well-behaved server exit on EOF.
        drop(stdin);
        let grace_left = grace.min(deadline.saturating_duration_since(Instant::now()));
        let (exit_code, killed) = finish_child(&mut child, grace_left).await;
        report.exit_code = exit_code;
        report.killed = killed;

        // Collect whatever the readers saw before the pipes closed.
        for reader in readers {
            let _ = timeout(grace, reader).await;
        }
        while let Ok(event) = rx.try_recv() {
            match event {
                Event::Stdout(line) => record_stdout(&mut report, &mut pending, &mut answered, line),
                Event::Stderr(line) => report.stderr.push(line),
                Event::StdoutClosed => {}
            }
        }

        report.missing_ids = pending.into_iter().collect();
        tracing::info!(
            responses = report.responses.len(),
            missing = report.missing_ids.len(),
            timed_out = report.timed_out,
            killed = report.killed,
            "Driver finished"
        );
        Ok(report)
    }
}

fn spawn_line_reader<R>(
    reader: R,
    tx: mpsc::UnboundedSender<Event>,
    wrap: fn(String) -> Event,
    on_close: Option<Event>,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = LineTransport::new(BufReader::new(reader), tokio::io::sink());
        loop {
            match lines.receive().await {
                Ok(Some(line)) => {
                    if tx.send(wrap(line)).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "Server pipe read failed");
                    break;
                }
            }
        }
        if let Some(event) = on_close {
            let _ = tx.send(event);
        }
    })
}

async fn write_step(stdin: &mut Option<ChildStdin>, step: &DriverStep) {
    let Some(pipe) = stdin.as_mut() else {
        return;
    };
    let mut framed = step.message.to_string().into_bytes();
    framed.push(b'\n');
    let written = async {
        pipe.write_all(&framed).await?;
        pipe.flush().await
    }
    .await;
    match written {
        Ok(()) => tracing::debug!(message = %step.message, "Sent message"),
        Err(e) => {
            // The child is gone; later steps have nowhere to go.
            tracing::warn!(error = %e, "Failed to write to server stdin");
            *stdin = None;
        }
    }
}

fn record_stdout(
    report: &mut DriverReport,
    pending: &mut BTreeSet<RpcId>,
    answered: &mut BTreeSet<RpcId>,
    line: String,
) {
    match serde_json::from_str::<JsonRpcResponse>(&line) {
        Ok(resp) if resp.is_reply() => {
            pending.remove(&resp.id);
            if !answered.insert(resp.id.clone()) {
                tracing::warn!(id = %resp.id, "Duplicate response");
                report.duplicate_ids.push(resp.id.clone());
            }
            report.responses.push(resp);
        }
        _ => report.stdout_noise.push(line),
    }
}

/// Wait up to `grace` for a clean exit, then kill. Returns (exit code, killed).
async fn finish_child(child: &mut Child, grace: Duration) -> (Option<i32>, bool) {
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => (status.code(), false),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to wait for server process");
            (None, false)
        }
        Err(_) => {
            tracing::info!("Forcibly terminating server process");
            terminate(child).await
        }
    }
}

/// Kill the child. Returns (exit code, killed).
async fn terminate(child: &mut Child) -> (Option<i32>, bool) {
    match child.kill().await {
        Ok(()) => (None, true),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to kill server process");
            // It may have exited on its own in the meantime.
            let code = child
                .try_wait()
                .ok()
                .flatten()
                .and_then(|status| status.code());
            (code, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assigns_sequential_ids() {
        let config = DriverConfig::new("server")
            .handshake()
            .list_tools()
            .call_tool("show_tables", json!({}))
            .raw(json!({"jsonrpc": "2.0", "method": "notifications/cancelled"}));

        assert_eq!(config.steps.len(), 5);
        assert_eq!(
            config.expected_ids(),
            vec![RpcId::Number(1), RpcId::Number(2), RpcId::Number(3)]
        );
        assert_eq!(config.steps[0].message["method"], "initialize");
        assert_eq!(config.steps[0].message["params"]["clientInfo"]["name"], DRIVER_CLIENT_NAME);
        assert_eq!(config.steps[1].message["method"], "notifications/initialized");
        assert!(config.steps[1].message.get("id").is_none());
        assert_eq!(config.steps[3].message["params"]["name"], "show_tables");
    }

    #[test]
    fn test_step_delay_applies_to_later_steps() {
        let config = DriverConfig::new("server")
            .step_delay(Duration::from_millis(10))
            .list_tools()
            .step_delay(Duration::from_millis(250))
            .list_tools();
        assert_eq!(config.steps[0].delay, Duration::from_millis(10));
        assert_eq!(config.steps[1].delay, Duration::from_millis(250));
    }

    #[test]
    fn test_record_stdout_classifies_lines() {
        let mut report = DriverReport::default();
        let mut pending: BTreeSet<RpcId> = [RpcId::Number(1)].into_iter().collect();
        let mut answered = BTreeSet::new();

        record_stdout(&mut report, &mut pending, &mut answered, "Server ready".into());
        // A request echoed back is not a response.
        record_stdout(
            &mut report,
            &mut pending,
            &mut answered,
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.into(),
        );
        assert_eq!(report.stdout_noise.len(), 2);
        assert_eq!(pending.len(), 1);

        let reply = r#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        record_stdout(&mut report, &mut pending, &mut answered, reply.into());
        record_stdout(&mut report, &mut pending, &mut answered, reply.into());
        assert!(pending.is_empty());
        assert_eq!(report.responses.len(), 2);
        assert_eq!(report.duplicate_ids, vec![RpcId::Number(1)]);
        assert!(!report.all_answered());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_reports_child_that_already_exited() {
        let mut child = Command::new("sh").args(["-c", "exit 4"]).spawn().unwrap();
        child.wait().await.unwrap();

        let (exit_code, killed) = terminate(&mut child).await;
        assert!(!killed);
        assert_eq!(exit_code, Some(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_kills_running_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let (exit_code, killed) = terminate(&mut child).await;
        assert!(killed);
        assert_eq!(exit_code, None);
    }

    #[test]
    fn test_silent_report_is_startup_failure() {
        let report = DriverReport {
            timed_out: true,
            killed: true,
            ..DriverReport::default()
        };
        assert!(report.is_likely_startup_failure());

        let report = DriverReport {
            stderr: vec!["Database connection failed".into()],
            exit_code: Some(1),
            ..DriverReport::default()
        };
        assert!(!report.is_likely_startup_failure());
    }
}
