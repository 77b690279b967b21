//! Unit tests for the `terminal/*` client operations.
//!
//! Commands run through `sh`, so the process-backed tests are Unix-only.

use agent_conduit::client_ops::terminal::OutputBuffer;
use agent_conduit::client_ops::TerminalManager;
use agent_conduit::AppError;

// ── OutputBuffer ─────────────────────────────────────────────────────────────

/// Without a limit nothing is dropped.
#[test]
fn unlimited_buffer_keeps_everything() {
    let mut buffer = OutputBuffer::new(None);
    buffer.push_str("abc");
    buffer.push_str("def");
    assert_eq!(buffer.as_str(), "abcdef");
    assert!(!buffer.truncated());
}

/// The oldest bytes are dropped past the limit.
#[test]
fn limited_buffer_keeps_tail() {
    let mut buffer = OutputBuffer::new(Some(4));
    buffer.push_str("abc");
    assert!(!buffer.truncated());
    buffer.push_str("defg");
    assert_eq!(buffer.as_str(), "defg");
    assert!(buffer.truncated());
}

// ── TerminalManager ──────────────────────────────────────────────────────────

/// Unknown ids are not-found errors.
#[tokio::test]
async fn unknown_terminal_is_not_found() {
    let manager = TerminalManager::new();
    assert!(matches!(manager.output("nope"), Err(AppError::NotFound(_))));
    assert!(matches!(manager.kill("nope"), Err(AppError::NotFound(_))));
    assert!(matches!(manager.release("nope"), Err(AppError::NotFound(_))));
    assert!(matches!(
        manager.wait_for_exit("nope").await,
        Err(AppError::NotFound(_))
    ));
}

/// A missing program fails at create time.
#[test]
fn missing_program_fails_to_create() {
    let manager = TerminalManager::new();
    let params = agent_conduit::protocol::client_ops::CreateTerminalParams {
        command: "/definitely/not/a/program".into(),
        ..Default::default()
    };
    assert!(matches!(manager.create(&params), Err(AppError::Io(_))));
    assert!(manager.is_empty());
}

#[cfg(unix)]
mod unix {
    use agent_conduit::client_ops::TerminalManager;
    use agent_conduit::protocol::client_ops::{CreateTerminalParams, EnvVariable};
    use agent_conduit::AppError;

    fn shell(script: &str) -> CreateTerminalParams {
        CreateTerminalParams {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            ..Default::default()
        }
    }

    /// Output and exit code are reported once the command finishes.
    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let manager = TerminalManager::new();
        let mut params = shell("echo \"hello $GREETING\"; echo oops >&2; exit 3");
        params.env = vec![EnvVariable {
            name: "GREETING".into(),
            value: "world".into(),
        }];
        let id = manager.create(&params).expect("create");

        let status = manager.wait_for_exit(&id).await.expect("wait");
        assert_eq!(status.exit_code, Some(3));
        assert!(!status.success());

        let output = manager.output(&id).expect("output");
        assert!(output.output.contains("hello world"), "got {:?}", output.output);
        assert!(output.output.contains("oops"));
        assert_eq!(output.exit_status, Some(status));
    }

    /// The byte limit keeps only the newest output.
    #[tokio::test]
    async fn output_limit_truncates() {
        let manager = TerminalManager::new();
        let mut params = shell("printf 'aaaaaaaaaabbbbb'");
        params.output_byte_limit = Some(5);
        let id = manager.create(&params).expect("create");

        manager.wait_for_exit(&id).await.expect("wait");
        let output = manager.output(&id).expect("output");
        assert_eq!(output.output, "bbbbb");
        assert!(output.truncated);
    }

    /// Killing a running command ends it with a non-success status.
    #[tokio::test]
    async fn kill_stops_command() {
        let manager = TerminalManager::new();
        let id = manager.create(&shell("sleep 30")).expect("create");
        assert!(manager.output(&id).expect("output").exit_status.is_none());

        manager.kill(&id).expect("kill");
        let status = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            manager.wait_for_exit(&id),
        )
        .await
        .expect("exit within timeout")
        .expect("wait");
        assert!(!status.success());

        manager.kill(&id).expect("second kill is a no-op");
    }

    /// Released terminals are forgotten.
    #[tokio::test]
    async fn release_forgets_terminal() {
        let manager = TerminalManager::new();
        let first = manager.create(&shell("sleep 30")).expect("create");
        let _second = manager.create(&shell("sleep 30")).expect("create");
        assert_eq!(manager.len(), 2);

        manager.release(&first).expect("release");
        assert!(matches!(manager.output(&first), Err(AppError::NotFound(_))));
        assert_eq!(manager.len(), 1);

        manager.release_all();
        assert!(manager.is_empty());
    }
}
