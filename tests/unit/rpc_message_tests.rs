//! Unit tests for JSON-RPC frame classification and construction.

use serde_json::json;

use agent_conduit::rpc::message::{
    classify, codes, error_frame, notification_frame, request_frame, response_frame, Incoming,
    RequestId,
};
use agent_conduit::AppError;

// ── classify ─────────────────────────────────────────────────────────────────

/// A frame with method and id is a server request; string ids survive.
#[test]
fn method_and_id_is_a_request() {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": "perm-1",
        "method": "session/request_permission",
        "params": { "sessionId": "s1" },
    });

    match classify(frame) {
        Incoming::Request(req) => {
            assert_eq!(req.id, RequestId::String("perm-1".into()));
            assert_eq!(req.method, "session/request_permission");
            assert_eq!(req.params["sessionId"], "s1");
        }
        other => panic!("expected request, got {other:?}"),
    }
}

/// A frame with method and no id is a notification with null params by default.
#[test]
fn method_without_id_is_a_notification() {
    match classify(json!({ "jsonrpc": "2.0", "method": "session/update" })) {
        Incoming::Notification(n) => {
            assert_eq!(n.method, "session/update");
            assert!(n.params.is_null());
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

/// A frame with an id and result is a successful response.
#[test]
fn id_and_result_is_a_success_response() {
    match classify(json!({ "jsonrpc": "2.0", "id": 4, "result": { "ok": true } })) {
        Incoming::Response { id, outcome } => {
            assert_eq!(id, RequestId::Number(4));
            assert_eq!(outcome.expect("success"), json!({ "ok": true }));
        }
        other => panic!("expected response, got {other:?}"),
    }
}

/// A response without result resolves with null.
#[test]
fn response_without_result_is_null() {
    match classify(json!({ "jsonrpc": "2.0", "id": 9 })) {
        Incoming::Response { outcome, .. } => {
            assert!(outcome.expect("success").is_null());
        }
        other => panic!("expected response, got {other:?}"),
    }
}

/// An error object converts into `AppError::Rpc`.
#[test]
fn error_object_becomes_rpc_error() {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "error": { "code": -32_000, "message": "busy" },
    });

    match classify(frame) {
        Incoming::Response { outcome, .. } => {
            let err: AppError = outcome.expect_err("error response").into();
            assert_eq!(
                err,
                AppError::Rpc {
                    code: -32_000,
                    message: "busy".into()
                }
            );
        }
        other => panic!("expected response, got {other:?}"),
    }
}

/// A frame with neither method nor id is invalid.
#[test]
fn shapeless_frame_is_invalid() {
    assert!(matches!(classify(json!({ "foo": 1 })), Incoming::Invalid(_)));
}

// ── RequestId ────────────────────────────────────────────────────────────────

/// Only non-negative numeric ids and numeric strings map to local ids.
#[test]
fn local_id_mapping() {
    assert_eq!(RequestId::Number(3).as_local(), Some(3));
    assert_eq!(RequestId::Number(-1).as_local(), None);
    assert_eq!(RequestId::String("12".into()).as_local(), Some(12));
    assert_eq!(RequestId::String("perm".into()).as_local(), None);
    assert_eq!(RequestId::from(8_u64).to_string(), "8");
}

// ── frame builders ───────────────────────────────────────────────────────────

/// Builders carry the protocol version and the expected members.
#[test]
fn builders_produce_versioned_frames() {
    let req = request_frame(1, "initialize", json!({}));
    assert_eq!(req["jsonrpc"], "2.0");
    assert_eq!(req["id"], 1);
    assert_eq!(req["method"], "initialize");

    let note = notification_frame("session/cancel", json!({ "sessionId": "s" }));
    assert!(note.get("id").is_none());

    let ok = response_frame(&RequestId::String("x".into()), json!({ "a": 1 }));
    assert_eq!(ok["id"], "x");
    assert_eq!(ok["result"]["a"], 1);

    let err = error_frame(&RequestId::Number(5), codes::METHOD_NOT_FOUND, "nope");
    assert_eq!(err["error"]["code"], -32_601);
    assert_eq!(err["error"]["message"], "nope");
}
