//! Unit tests for backend selection.

use serial_test::serial;

use agent_conduit::mode::{BackendKind, BACKEND_ENV_VAR};
use agent_conduit::AppError;

/// Canonical names and aliases parse case-insensitively.
#[test]
fn aliases_parse() {
    let cases = [
        ("acp", BackendKind::Acp),
        ("Agent-Client-Protocol", BackendKind::Acp),
        ("codex", BackendKind::Codex),
        ("app-server", BackendKind::Codex),
        (" CLAUDE ", BackendKind::Claude),
        ("stream-json", BackendKind::Claude),
        ("direct", BackendKind::Claude),
    ];
    for (raw, expected) in cases {
        assert_eq!(raw.parse::<BackendKind>().expect(raw), expected, "{raw}");
    }
}

/// An unknown selector is a config error, not a fallback.
#[test]
fn unknown_selector_is_config_error() {
    let err = "smoke-signals".parse::<BackendKind>().expect_err("unknown");
    assert!(matches!(err, AppError::Config(_)));
}

/// Only ACP hosts several sessions per process.
#[test]
fn multi_session_support() {
    assert!(BackendKind::Acp.supports_multiple_sessions());
    assert!(!BackendKind::Codex.supports_multiple_sessions());
    assert!(!BackendKind::Claude.supports_multiple_sessions());
    assert_eq!(BackendKind::default(), BackendKind::Acp);
}

/// Explicit beats environment beats configured; empty values are skipped.
#[test]
#[serial]
fn resolve_precedence() {
    std::env::remove_var(BACKEND_ENV_VAR);
    assert_eq!(BackendKind::resolve(None, None).expect("default"), BackendKind::Acp);
    assert_eq!(
        BackendKind::resolve(None, Some("codex")).expect("configured"),
        BackendKind::Codex
    );
    assert_eq!(
        BackendKind::resolve(Some(""), Some("codex")).expect("empty explicit"),
        BackendKind::Codex
    );

    std::env::set_var(BACKEND_ENV_VAR, "claude");
    assert_eq!(
        BackendKind::resolve(None, Some("codex")).expect("env"),
        BackendKind::Claude
    );
    assert_eq!(
        BackendKind::resolve(Some("acp"), Some("codex")).expect("explicit"),
        BackendKind::Acp
    );

    std::env::set_var(BACKEND_ENV_VAR, "bogus");
    assert!(matches!(
        BackendKind::resolve(None, Some("codex")),
        Err(AppError::Config(_))
    ));

    std::env::remove_var(BACKEND_ENV_VAR);
}
