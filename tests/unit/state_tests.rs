//! Unit tests for the connection state machine.

use agent_conduit::connection::ConnectionState::{self, Connected, Connecting, Disconnected, Error};

/// The allowed transitions, and nothing else.
#[test]
fn transition_table() {
    let allowed = [
        (Disconnected, Connecting),
        (Error, Connecting),
        (Connecting, Connected),
        (Connecting, Error),
        (Connecting, Disconnected),
        (Connected, Disconnected),
        (Connected, Error),
        (Error, Disconnected),
    ];
    let all = [Disconnected, Connecting, Connected, Error];

    for from in all {
        for to in all {
            let expected = allowed.contains(&(from, to));
            assert_eq!(
                from.can_transition_to(to),
                expected,
                "{from} -> {to} should be {}",
                if expected { "allowed" } else { "rejected" }
            );
        }
    }
}

/// Connecting is only possible from a resting state.
#[test]
fn can_connect_only_when_idle() {
    assert!(Disconnected.can_connect());
    assert!(Error.can_connect());
    assert!(!Connecting.can_connect());
    assert!(!Connected.can_connect());
    assert_eq!(ConnectionState::default(), Disconnected);
}

/// States display and serialise in lower case.
#[test]
fn names() {
    assert_eq!(Connecting.to_string(), "connecting");
    assert_eq!(
        serde_json::to_value(Connected).expect("serialise"),
        serde_json::json!("connected")
    );
}
