//! Unit tests for permission requests and their one-shot resolution.

use serde_json::json;

use agent_conduit::permission::PendingPermission;
use agent_conduit::protocol::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionRequest,
    PermissionResponse,
};
use agent_conduit::AppError;

fn request() -> PermissionRequest {
    PermissionRequest {
        session_id: "s1".into(),
        options: vec![
            PermissionOption::new("allow", "Allow", PermissionOptionKind::AllowOnce),
            PermissionOption::new("reject", "Reject", PermissionOptionKind::RejectOnce),
        ],
        tool_name: "Bash".into(),
        input: json!({ "command": "ls" }),
        tool_use_id: "call-1".into(),
        suggestions: None,
        blocked_path: None,
        tool_call: None,
    }
}

// ── PendingPermission ────────────────────────────────────────────────────────

/// `allow` delivers a selected outcome to the waiting reply.
#[tokio::test]
async fn allow_resolves_receiver() {
    let (pending, decision) = PendingPermission::new(request());
    assert_eq!(pending.session_id(), "s1");
    assert!(!pending.is_resolved());

    assert!(pending.allow("allow"));

    assert_eq!(
        decision.await.expect("resolved"),
        PermissionOutcome::selected("allow")
    );
    assert_eq!(pending.outcome(), Some(PermissionOutcome::selected("allow")));
}

/// Only the first resolution counts; later calls are ignored.
#[tokio::test]
async fn second_resolution_is_ignored() {
    let (pending, decision) = PendingPermission::new(request());

    assert!(pending.cancel());
    assert!(!pending.allow("allow"));
    assert!(!pending.cancel());

    assert_eq!(decision.await.expect("resolved"), PermissionOutcome::Cancelled);
    assert_eq!(pending.outcome(), Some(PermissionOutcome::Cancelled));
}

/// Clones share one resolution slot.
#[test]
fn clones_share_resolution() {
    let (pending, _decision) = PendingPermission::new(request());
    let clone = pending.clone();

    assert!(clone.allow("reject"));
    assert!(pending.is_resolved());
    assert!(!pending.allow("allow"));
}

/// Dropping every handle unresolved closes the receiver.
#[tokio::test]
async fn dropping_unresolved_closes_receiver() {
    let (pending, decision) = PendingPermission::new(request());
    drop(pending);
    assert!(decision.await.is_err());
}

/// Resolving after the reply side was abandoned still records the outcome.
#[test]
fn resolve_after_receiver_dropped() {
    let (pending, decision) = PendingPermission::new(request());
    drop(decision);
    assert!(pending.allow("allow"));
    assert!(pending.is_resolved());
}

// ── PermissionRequest ────────────────────────────────────────────────────────

/// ACP params fill the flat fields from the nested tool call.
#[test]
fn from_params_fills_from_tool_call() {
    let params = json!({
        "sessionId": "s9",
        "toolCall": {
            "toolCallId": "tc-1",
            "title": "Write",
            "kind": "edit",
            "rawInput": { "path": "/tmp/x" },
        },
        "options": [
            { "optionId": "ok", "name": "Allow once", "kind": "allow_once" },
            { "optionId": "no", "name": "Reject", "kind": "reject_once" },
        ],
    });

    let req = PermissionRequest::from_params(params).expect("valid params");
    assert_eq!(req.session_id, "s9");
    assert_eq!(req.tool_name, "Write");
    assert_eq!(req.tool_use_id, "tc-1");
    assert_eq!(req.input, json!({ "path": "/tmp/x" }));
    assert_eq!(req.options[0].label, "Allow once");
    assert!(req.options[0].kind.is_allow());
    assert_eq!(
        req.option_of_kind(PermissionOptionKind::RejectOnce).map(|o| o.id.as_str()),
        Some("no")
    );
    assert!(req.option("missing").is_none());
}

/// A request without a session id is a protocol error.
#[test]
fn from_params_requires_session() {
    let err = PermissionRequest::from_params(json!({ "options": [] })).expect_err("no session");
    assert!(matches!(err, AppError::Protocol(_)));
}

/// Outcomes serialise in the ACP wire shape.
#[test]
fn outcome_wire_shape() {
    let selected = serde_json::to_value(PermissionResponse {
        outcome: PermissionOutcome::selected("ok"),
    })
    .expect("serialise");
    assert_eq!(
        selected,
        json!({ "outcome": { "outcome": "selected", "optionId": "ok" } })
    );

    let cancelled = serde_json::to_value(PermissionOutcome::Cancelled).expect("serialise");
    assert_eq!(cancelled, json!({ "outcome": "cancelled" }));
}
