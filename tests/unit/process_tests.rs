//! Unit tests for agent process spawning and exit observation.

use std::time::Duration;

use agent_conduit::config::AgentConfig;
use agent_conduit::connection::spawner::{spawn_agent, SpawnSpec};

fn shell(script: &str) -> SpawnSpec {
    let agent = AgentConfig::new("sh", "/bin/sh").with_args(["-c", script]);
    SpawnSpec::for_agent(&agent, "/bin/sh".into(), &[])
}

/// Protocol arguments come before the configured ones.
#[test]
fn protocol_args_lead() {
    let agent = AgentConfig::new("codex", "codex").with_args(["--verbose"]);
    let spec = SpawnSpec::for_agent(&agent, "codex".into(), &["app-server"]);
    assert_eq!(spec.args, vec!["app-server", "--verbose"]);
    assert!(spec.cwd.is_none());
}

/// Every waiter sees the same exit status, including late ones.
#[tokio::test]
async fn wait_for_exit_reports_code() {
    let process = spawn_agent("exit-3", &shell("exit 3")).expect("spawn");
    let handle = process.handle.clone();

    let first = tokio::time::timeout(Duration::from_secs(5), handle.wait_for_exit())
        .await
        .expect("exits");
    assert_eq!(first.code, Some(3));
    assert!(!first.success());
    assert!(!handle.is_running());
    assert_eq!(handle.try_exit(), Some(first));
    assert_eq!(process.handle.wait_for_exit().await, first);
    assert_eq!(first.to_string(), "exit code 3");
}

/// `terminate` stops a running process within its grace period.
#[tokio::test]
async fn terminate_stops_running_process() {
    let process = spawn_agent("sleeper", &shell("exec sleep 30")).expect("spawn");
    assert!(process.handle.is_running());

    let exit = tokio::time::timeout(
        Duration::from_secs(5),
        process.handle.terminate(Duration::from_millis(500)),
    )
    .await
    .expect("terminated");
    assert_eq!(exit.code, None);
    assert_eq!(exit.signal_name().as_deref(), Some("SIGTERM"));
    assert!(!process.handle.is_running());
}
