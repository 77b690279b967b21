//! Integration tests for per-session fan-out over shared hubs.
//!
//! These drive [`SessionMux`] views directly over bare hubs, standing in
//! for the connection's reader task.

use agent_conduit::hub::Hub;
use agent_conduit::permission::PendingPermission;
use agent_conduit::protocol::{
    PermissionOption, PermissionOptionKind, PermissionRequest, SessionNotification, SessionUpdate,
};
use agent_conduit::session::SessionMux;
use agent_conduit::AppError;

fn text_of(notification: &SessionNotification) -> String {
    match &notification.update {
        SessionUpdate::AgentMessageChunk { content, .. } => {
            content.as_text().unwrap_or_default().to_owned()
        }
        other => panic!("expected agent text, got {other:?}"),
    }
}

fn permission_for(session_id: &str) -> PermissionRequest {
    PermissionRequest {
        session_id: session_id.into(),
        options: vec![PermissionOption::new(
            "ok",
            "Allow",
            PermissionOptionKind::AllowOnce,
        )],
        tool_name: "Bash".into(),
        input: serde_json::Value::Null,
        tool_use_id: format!("call-{session_id}"),
        suggestions: None,
        blocked_path: None,
        tool_call: None,
    }
}

/// Interleaved updates reach only their own session, in publish order.
#[tokio::test]
async fn interleaved_updates_keep_per_session_order() {
    let updates = Hub::new();
    let permissions = Hub::new();
    let a = SessionMux::detached("a", &updates, &permissions);
    let b = SessionMux::detached("b", &updates, &permissions);
    let mut a_rx = a.updates();
    let mut b_rx = b.updates();

    for i in 0..1000 {
        let session = if i % 2 == 0 { "a" } else { "b" };
        updates.publish(SessionNotification::new(
            session,
            SessionUpdate::agent_text(i.to_string()),
        ));
    }
    updates.close();

    let mut seen_a = Vec::new();
    while let Some(n) = a_rx.recv().await {
        assert_eq!(n.session_id, "a");
        seen_a.push(text_of(&n).parse::<u32>().expect("number"));
    }
    let mut seen_b = Vec::new();
    while let Some(n) = b_rx.recv().await {
        assert_eq!(n.session_id, "b");
        seen_b.push(text_of(&n).parse::<u32>().expect("number"));
    }

    assert_eq!(seen_a, (0..1000).step_by(2).collect::<Vec<u32>>());
    assert_eq!(seen_b, (1..1000).step_by(2).collect::<Vec<u32>>());
}

/// Permission prompts are filtered by session like updates.
#[tokio::test]
async fn permissions_are_filtered_by_session() {
    let updates = Hub::new();
    let permissions = Hub::new();
    let a = SessionMux::detached("a", &updates, &permissions);
    let b = SessionMux::detached("b", &updates, &permissions);
    let mut a_rx = a.permission_requests();
    let mut b_rx = b.permission_requests();

    let (pending, decision) = PendingPermission::new(permission_for("b"));
    assert_eq!(permissions.publish(pending), 1);

    assert!(a_rx.try_recv().is_none());
    let received = b_rx.try_recv().expect("b sees its prompt");
    assert_eq!(received.request().tool_use_id, "call-b");

    assert!(received.allow("ok"));
    assert_eq!(
        decision.await.expect("resolved").option_id(),
        Some("ok")
    );
}

/// Disposing one session ends its views and leaves the other untouched.
#[tokio::test]
async fn dispose_detaches_only_that_session() {
    let updates = Hub::new();
    let permissions = Hub::new();
    let a = SessionMux::detached("a", &updates, &permissions);
    let b = SessionMux::detached("b", &updates, &permissions);
    let mut a_rx = a.updates();
    let mut b_rx = b.updates();

    a.dispose();
    a.dispose();
    assert!(a.is_disposed());
    assert!(a_rx.recv().await.is_none());
    assert!(a.updates().recv().await.is_none());

    updates.publish(SessionNotification::new("a", SessionUpdate::agent_text("lost")));
    updates.publish(SessionNotification::new("b", SessionUpdate::agent_text("kept")));
    assert_eq!(text_of(&b_rx.try_recv().expect("b still attached")), "kept");
    assert!(!b.is_disposed());
}

/// A detached session has nothing to send requests on.
#[tokio::test]
async fn detached_session_rejects_requests() {
    let updates = Hub::new();
    let permissions = Hub::new();
    let mux = SessionMux::detached("a", &updates, &permissions);

    assert!(matches!(mux.prompt(Vec::new()).await, Err(AppError::State(_))));
    assert!(matches!(mux.cancel(), Err(AppError::State(_))));
    assert!(matches!(mux.set_mode("plan").await, Err(AppError::State(_))));

    mux.dispose();
    assert!(matches!(mux.cancel(), Err(AppError::State(msg)) if msg.contains("disposed")));
}

/// Closing the upstream hub ends every session's views.
#[tokio::test]
async fn upstream_close_ends_session_views() {
    let updates = Hub::<SessionNotification>::new();
    let permissions = Hub::new();
    let mux = SessionMux::detached("a", &updates, &permissions);
    let mut rx = mux.updates();

    updates.close();
    assert!(rx.recv().await.is_none());
}
