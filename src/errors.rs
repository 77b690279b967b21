//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the session protocol layer.
///
/// Variants carry owned strings so the value is cheap to clone: a single crash
/// cause is fanned out to every in-flight request and kept as the
/// connection's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Spawn failure, early exit during the handshake, or a handshake error response.
    Connection(String),
    /// Handshake or request exceeded its time bound.
    Timeout(String),
    /// Caller misuse, e.g. connecting twice or prompting a disposed session.
    State(String),
    /// A frame could not be parsed or framed.
    Protocol(String),
    /// The agent process exited after a successful connection.
    ProcessCrashed(String),
    /// Error response returned by the agent for one request.
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable message from the agent.
        message: String,
    },
    /// Requested entity does not exist.
    NotFound(String),
    /// File-system or pipe I/O failure.
    Io(String),
}

impl AppError {
    /// Whether the error ends the connection it was raised on.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::ProcessCrashed(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::State(msg) => write!(f, "state: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::ProcessCrashed(msg) => write!(f, "process crashed: {msg}"),
            Self::Rpc { code, message } => write!(f, "rpc error {code}: {message}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
