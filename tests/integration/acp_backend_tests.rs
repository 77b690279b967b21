//! Integration tests for the shared-process ACP backend.

use std::sync::Arc;

use serial_test::serial;

use crate::integration::fake_agent::{limits, within, ScriptAgent, ACP_AGENT};
use agent_conduit::backend::acp::AcpBackend;
use agent_conduit::backend::{AgentBackend, AgentSession, SessionOptions};
use agent_conduit::protocol::{SessionUpdate, StopReason};
use agent_conduit::AppError;

/// Run one turn, answering its permission prompt with `option_id`.
async fn turn(session: &Arc<dyn AgentSession>, option_id: &str) -> StopReason {
    let mut prompts = session.permission_requests();
    let turn = {
        let session = Arc::clone(session);
        tokio::spawn(async move { session.send("list files").await })
    };

    let pending = within(prompts.recv()).await.expect("permission prompt");
    assert_eq!(pending.session_id(), session.session_id());
    assert_eq!(pending.request().tool_use_id, "tc-1");
    assert!(pending.allow(option_id));

    within(turn).await.expect("turn task").expect("turn result")
}

/// Sessions share one process; permission replies decide the stop reason.
#[tokio::test]
#[serial]
async fn sessions_share_one_process() {
    let agent = ScriptAgent::new(ACP_AGENT);
    let backend = AcpBackend::new(agent.config("acp"), limits());

    let first = within(backend.create_session(
        None,
        agent.dir().to_path_buf(),
        SessionOptions {
            mode_id: Some("plan".into()),
            ..SessionOptions::default()
        },
    ))
    .await
    .expect("first session");
    assert_eq!(first.session_id(), "sess-1");
    assert!(first.is_active());
    let pid = backend.connection().process().and_then(|p| p.pid());

    let mut events = first.events();
    assert_eq!(turn(&first, "yes").await, StopReason::EndTurn);
    let update = within(events.recv()).await.expect("update");
    assert_eq!(update.update, SessionUpdate::agent_text("working"));

    let second = within(backend.create_session(
        None,
        agent.dir().to_path_buf(),
        SessionOptions::default(),
    ))
    .await
    .expect("second session");
    assert_eq!(second.session_id(), "sess-2");
    assert_eq!(backend.connection().process().and_then(|p| p.pid()), pid);
    assert_eq!(backend.sessions().len(), 2);

    assert_eq!(turn(&second, "no").await, StopReason::Refusal);
    assert!(events.try_recv().is_none());

    second.kill().await;
    second.kill().await;
    assert!(!second.is_active());
    assert!(first.is_active());
    assert_eq!(backend.sessions().len(), 1);
    assert!(matches!(second.send("again").await, Err(AppError::State(_))));

    backend.dispose().await;
    assert!(!first.is_active());
    assert!(backend.sessions().is_empty());
}

/// The initial prompt runs in the background and its updates are buffered.
#[tokio::test]
#[serial]
async fn initial_prompt_updates_are_buffered() {
    let agent = ScriptAgent::new(ACP_AGENT);
    let backend = AcpBackend::new(agent.config("acp"), limits());

    let session = within(backend.create_session(
        Some("hello".into()),
        agent.dir().to_path_buf(),
        SessionOptions::default(),
    ))
    .await
    .expect("session");

    let pending = within(session.permission_requests().recv())
        .await
        .expect("permission prompt");
    assert!(pending.allow("yes"));

    let update = within(session.events().recv()).await.expect("update");
    assert_eq!(update.update, SessionUpdate::agent_text("working"));
    backend.dispose().await;
}

/// A backend whose agent cannot start reports the connection error.
#[tokio::test]
#[serial]
async fn unreachable_agent_fails_session_creation() {
    let backend = AcpBackend::new(
        agent_conduit::config::AgentConfig::new("ghost", "/nonexistent/agent-conduit-test-agent"),
        limits(),
    );
    let err = backend
        .create_session(None, std::env::temp_dir(), SessionOptions::default())
        .await
        .err()
        .expect("must fail");
    assert!(matches!(err, AppError::Connection(_)), "got {err:?}");
    assert!(backend.sessions().is_empty());
}
