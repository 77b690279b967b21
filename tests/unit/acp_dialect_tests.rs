//! Unit tests for the ACP wire mapping.

use serde_json::json;

use agent_conduit::backend::acp::AcpDialect;
use agent_conduit::connection::ProtocolDialect;
use agent_conduit::protocol::{methods, PermissionOutcome, SessionUpdate, PROTOCOL_VERSION};
use agent_conduit::rpc::{Notification, RequestId, ServerRequest};
use agent_conduit::AppError;

/// The client advertises its protocol version and file/terminal support.
#[test]
fn initialize_params_advertise_capabilities() {
    let params = AcpDialect.initialize_params();
    assert_eq!(params["protocolVersion"], PROTOCOL_VERSION);
    assert_eq!(params["clientCapabilities"]["fs"]["readTextFile"], true);
    assert_eq!(params["clientCapabilities"]["terminal"], true);
    assert!(AcpDialect.serves_client_ops());
    assert!(AcpDialect.launch_args().is_empty());
}

/// A well-formed initialize result is accepted; a malformed one is a
/// connection error.
#[test]
fn initialize_result_parsing() {
    let init = AcpDialect
        .parse_initialize_result(json!({
            "protocolVersion": 1,
            "agentCapabilities": { "loadSession": true },
            "authMethods": [{ "id": "oauth", "name": "Log in" }],
        }))
        .expect("valid result");
    assert!(init.agent_capabilities.load_session);
    assert_eq!(init.auth_methods[0].id, "oauth");

    assert!(matches!(
        AcpDialect.parse_initialize_result(json!({ "authMethods": "nope" })),
        Err(AppError::Connection(_))
    ));
}

/// Session updates are parsed; other notifications and id-less updates are dropped.
#[test]
fn session_update_translation() {
    let update = Notification {
        method: methods::SESSION_UPDATE.into(),
        params: json!({
            "sessionId": "s1",
            "update": {
                "sessionUpdate": "agent_message_chunk",
                "content": { "type": "text", "text": "hi" },
            },
        }),
    };
    let translated = AcpDialect.translate_notification(&update);
    assert_eq!(translated.len(), 1);
    assert_eq!(translated[0].update, SessionUpdate::agent_text("hi"));

    let unknown_kind = Notification {
        method: methods::SESSION_UPDATE.into(),
        params: json!({ "sessionId": "s1", "update": { "sessionUpdate": "brand_new_kind" } }),
    };
    assert_eq!(
        AcpDialect.translate_notification(&unknown_kind)[0].update,
        SessionUpdate::Other
    );

    let other = Notification {
        method: "custom/ping".into(),
        params: json!({}),
    };
    assert!(AcpDialect.translate_notification(&other).is_empty());

    let no_session = Notification {
        method: methods::SESSION_UPDATE.into(),
        params: json!({ "sessionId": "", "update": { "sessionUpdate": "plan", "entries": [] } }),
    };
    assert!(AcpDialect.translate_notification(&no_session).is_empty());
}

/// Only `session/request_permission` is a permission request.
#[test]
fn permission_requests_and_responses() {
    let request = ServerRequest {
        id: RequestId::Number(3),
        method: methods::SESSION_REQUEST_PERMISSION.into(),
        params: json!({
            "sessionId": "s1",
            "toolCall": { "toolCallId": "tc", "title": "Bash" },
            "options": [{ "optionId": "ok", "name": "Allow", "kind": "allow_once" }],
        }),
    };
    let parsed = AcpDialect
        .permission_request(&request)
        .expect("permission method")
        .expect("valid request");
    assert_eq!(parsed.tool_name, "Bash");

    let reply = AcpDialect.permission_response(&parsed, &PermissionOutcome::selected("ok"));
    assert_eq!(reply, json!({ "outcome": { "outcome": "selected", "optionId": "ok" } }));

    let fs = ServerRequest {
        id: RequestId::Number(4),
        method: methods::FS_READ_TEXT_FILE.into(),
        params: json!({}),
    };
    assert!(AcpDialect.permission_request(&fs).is_none());
}
