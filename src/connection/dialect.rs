//! Per-protocol hooks for JSON-RPC agents.
//!
//! [`AgentConnection`](crate::connection::AgentConnection) owns the
//! process, handshake, and state machine; a [`ProtocolDialect`] supplies the
//! parts that differ between JSON-RPC protocols: launch flags, handshake
//! payloads, how notifications map onto [`SessionNotification`]s, and how
//! permission prompts are parsed and answered.

use serde_json::Value;

use crate::protocol::{
    InitializeResult, PermissionOutcome, PermissionRequest, SessionNotification,
};
use crate::rpc::{Notification, ServerRequest};
use crate::Result;

/// Protocol-specific behaviour plugged into a connection.
pub trait ProtocolDialect: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Flags placed before the user-configured arguments.
    fn launch_args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Environment variable that overrides the executable path.
    fn executable_override_var(&self) -> Option<&'static str> {
        None
    }

    /// Parameters of the `initialize` request.
    fn initialize_params(&self) -> Value;

    /// Notification sent once the handshake succeeds, if the protocol has one.
    fn initialized_notification(&self) -> Option<(&'static str, Value)> {
        None
    }

    /// Interpret the `initialize` result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`](crate::AppError::Connection) if the
    /// result is unusable.
    fn parse_initialize_result(&self, result: Value) -> Result<InitializeResult>;

    /// Map one inbound notification to zero or more session updates.
    fn translate_notification(&self, notification: &Notification) -> Vec<SessionNotification>;

    /// Parse a server request as a permission prompt.
    ///
    /// Returns `None` when the request is not a permission prompt.
    fn permission_request(&self, request: &ServerRequest) -> Option<Result<PermissionRequest>>;

    /// Result payload answering a permission prompt with `outcome`.
    fn permission_response(&self, request: &PermissionRequest, outcome: &PermissionOutcome)
        -> Value;

    /// Whether `fs/*` and `terminal/*` requests are served for this protocol.
    fn serves_client_ops(&self) -> bool {
        false
    }
}
