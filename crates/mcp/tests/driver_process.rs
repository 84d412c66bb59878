//! Driver behavior against small shell-scripted servers.
#![cfg(unix)]

use std::time::{Duration, Instant};

use serde_json::json;

use sqlrelay_mcp::driver::{Driver, DriverConfig};
use sqlrelay_mcp::types::RpcId;

fn shell(script: &str) -> DriverConfig {
    DriverConfig::new("sh").args(["-c", script])
}

#[tokio::test]
async fn silent_child_is_killed_at_timeout() {
    let config = shell("sleep 30")
        .timeout(Duration::from_millis(300))
        .grace(Duration::from_millis(100));

    let report = Driver::new(config).run().await.unwrap();

    assert!(report.timed_out);
    assert!(report.killed);
    assert_eq!(report.exit_code, None);
    assert!(report.is_likely_startup_failure());
}

#[tokio::test]
async fn timeout_with_outstanding_request_reports_missing_id() {
    let config = shell("cat > /dev/null")
        .timeout(Duration::from_millis(400))
        .grace(Duration::from_millis(100))
        .step_delay(Duration::from_millis(10))
        .list_tools();

    let report = Driver::new(config).run().await.unwrap();

    assert!(report.timed_out);
    assert_eq!(report.missing_ids, vec![RpcId::Number(1)]);
    // No grace is left once the deadline has passed.
    assert!(report.killed);
    assert_eq!(report.exit_code, None);
}

#[tokio::test]
async fn grace_period_never_extends_past_the_deadline() {
    // Answers, then ignores EOF on stdin.
    let script = r#"
        read line
        echo '{"jsonrpc":"2.0","id":1,"result":{}}'
        exec sleep 30
    "#;
    let config = shell(script)
        .timeout(Duration::from_secs(1))
        .grace(Duration::from_secs(20))
        .step_delay(Duration::from_millis(10))
        .list_tools();

    let started = Instant::now();
    let report = Driver::new(config).run().await.unwrap();

    assert!(report.all_answered());
    assert!(!report.timed_out);
    assert!(report.killed);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "child outlived the timeout: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn child_exiting_within_grace_is_not_killed() {
    let script = r#"
        read line
        echo '{"jsonrpc":"2.0","id":1,"result":{}}'
        cat > /dev/null
    "#;
    let config = shell(script)
        .timeout(Duration::from_secs(10))
        .step_delay(Duration::from_millis(10))
        .list_tools();

    let report = Driver::new(config).run().await.unwrap();

    assert!(report.all_answered());
    assert!(!report.killed);
    assert_eq!(report.exit_code, Some(0));
}

#[tokio::test]
async fn finishes_once_every_request_is_answered() {
    let script = r#"
        echo "booting" >&2
        read line
        echo "not json"
        echo '{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}'
        cat > /dev/null
    "#;
    let config = shell(script)
        .timeout(Duration::from_secs(10))
        .step_delay(Duration::from_millis(10))
        .list_tools();

    let report = Driver::new(config).run().await.unwrap();

    assert!(!report.timed_out);
    assert!(report.all_answered());
    assert_eq!(report.responses.len(), 1);
    assert_eq!(report.responses[0].result, Some(json!({"tools": []})));
    assert_eq!(report.stdout_noise, vec!["not json"]);
    assert_eq!(report.stderr, vec!["booting"]);
    assert_eq!(report.exit_code, Some(0));
}

#[tokio::test]
async fn child_exit_ends_run_and_keeps_stderr() {
    let config = shell("echo 'Database connection failed' >&2; exit 3")
        .timeout(Duration::from_secs(10))
        .step_delay(Duration::from_millis(200))
        .list_tools();

    let report = Driver::new(config).run().await.unwrap();

    assert!(!report.timed_out);
    assert!(!report.killed);
    assert_eq!(report.exit_code, Some(3));
    assert_eq!(report.stderr, vec!["Database connection failed"]);
    assert!(!report.is_likely_startup_failure());
    assert_eq!(report.missing_ids, vec![RpcId::Number(1)]);
}

#[tokio::test]
async fn environment_reaches_the_child() {
    let config = shell(r#"echo "$SQLRELAY_DRIVER_MARKER" >&2"#)
        .env("SQLRELAY_DRIVER_MARKER", "visible")
        .timeout(Duration::from_secs(10));

    let report = Driver::new(config).run().await.unwrap();

    assert_eq!(report.stderr, vec!["visible"]);
}
