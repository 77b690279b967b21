//! Unit tests for `AppError` display and conversions.

use agent_conduit::client_ops::{error_code, RESOURCE_NOT_FOUND};
use agent_conduit::AppError;

/// Every variant renders as `category: message`.
#[test]
fn display_prefixes_category() {
    assert_eq!(AppError::Config("x".into()).to_string(), "config: x");
    assert_eq!(AppError::Connection("x".into()).to_string(), "connection: x");
    assert_eq!(AppError::Timeout("x".into()).to_string(), "timeout: x");
    assert_eq!(AppError::State("x".into()).to_string(), "state: x");
    assert_eq!(
        AppError::ProcessCrashed("exit code 3".into()).to_string(),
        "process crashed: exit code 3"
    );
    assert_eq!(
        AppError::Rpc {
            code: -32_000,
            message: "busy".into()
        }
        .to_string(),
        "rpc error -32000: busy"
    );
}

/// Only errors that end a connection are fatal.
#[test]
fn fatality() {
    assert!(AppError::Connection(String::new()).is_fatal());
    assert!(AppError::Timeout(String::new()).is_fatal());
    assert!(AppError::ProcessCrashed(String::new()).is_fatal());
    assert!(!AppError::State(String::new()).is_fatal());
    assert!(!AppError::Rpc {
        code: 1,
        message: String::new()
    }
    .is_fatal());
}

/// Malformed TOML converts into a config error.
#[test]
fn toml_error_converts_to_config() {
    let err: AppError = toml::from_str::<toml::Value>("= nope")
        .expect_err("invalid toml")
        .into();
    assert!(matches!(err, AppError::Config(_)));
}

/// I/O errors convert into `AppError::Io`.
#[test]
fn io_error_converts() {
    let err: AppError = std::io::Error::other("pipe").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe")));
}

/// Client-operation failures map to JSON-RPC codes.
#[test]
fn client_op_error_codes() {
    assert_eq!(error_code(&AppError::Protocol(String::new())), -32_602);
    assert_eq!(error_code(&AppError::NotFound(String::new())), RESOURCE_NOT_FOUND);
    assert_eq!(error_code(&AppError::Io(String::new())), -32_603);
    assert_eq!(
        error_code(&AppError::Rpc {
            code: -1,
            message: String::new()
        }),
        -1
    );
}
