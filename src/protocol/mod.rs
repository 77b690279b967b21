//! Agent Client Protocol wire types.
//!
//! Field names follow the protocol's camelCase JSON. Unknown enum values
//! deserialize into an `Other`/`Unknown` variant rather than failing, since
//! agents add update kinds faster than clients learn them.

pub mod client_ops;
pub mod permission;
pub mod update;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use permission::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionRequest,
    PermissionResponse,
};
pub use update::{
    AvailableCommand, PlanEntry, SessionNotification, SessionUpdate, ToolCallInfo,
    ToolCallStatus, ToolCallUpdateInfo, ToolKind,
};

/// Protocol version offered in `initialize`.
pub const PROTOCOL_VERSION: u64 = 1;

/// Method names.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Authentication request.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Create a session.
    pub const SESSION_NEW: &str = "session/new";
    /// Send a prompt turn.
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Cancel the current turn (notification).
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Switch session mode.
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Session update notification from the agent.
    pub const SESSION_UPDATE: &str = "session/update";
    /// Permission request from the agent.
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    /// Read a text file on the client.
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Write a text file on the client.
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    /// Start a terminal command.
    pub const TERMINAL_CREATE: &str = "terminal/create";
    /// Read terminal output.
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
    /// Wait for a terminal command to exit.
    pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
    /// Kill a terminal command.
    pub const TERMINAL_KILL: &str = "terminal/kill";
    /// Kill and forget a terminal.
    pub const TERMINAL_RELEASE: &str = "terminal/release";
}

/// Protocol version as either a number or a date-like string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolVersion {
    /// Integer version.
    Number(u64),
    /// String version.
    Text(String),
}

/// File-system capabilities offered to the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsCapabilities {
    /// `fs/read_text_file` is served.
    #[serde(default)]
    pub read_text_file: bool,
    /// `fs/write_text_file` is served.
    #[serde(default)]
    pub write_text_file: bool,
}

/// Capabilities offered by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCapabilities {
    /// File operations.
    #[serde(default)]
    pub fs: FsCapabilities,
    /// `terminal/*` is served.
    #[serde(default)]
    pub terminal: bool,
}

impl ClientCapabilities {
    /// Everything this crate can serve.
    #[must_use]
    pub fn full() -> Self {
        Self {
            fs: FsCapabilities {
                read_text_file: true,
                write_text_file: true,
            },
            terminal: true,
        }
    }
}

/// Name and version of the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// `initialize` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Offered protocol version.
    pub protocol_version: ProtocolVersion,
    /// Offered client capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_capabilities: Option<ClientCapabilities>,
    /// Client identity.
    pub client_info: ClientInfo,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::Number(PROTOCOL_VERSION),
            client_capabilities: Some(ClientCapabilities::full()),
            client_info: ClientInfo::default(),
        }
    }
}

/// Prompt content the agent accepts beyond plain text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Image blocks.
    #[serde(default)]
    pub image: bool,
    /// Audio blocks.
    #[serde(default)]
    pub audio: bool,
    /// Embedded resource blocks.
    #[serde(default)]
    pub embedded_context: bool,
}

/// Capabilities advertised by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// `session/load` is supported.
    #[serde(default)]
    pub load_session: bool,
    /// Prompt content support.
    #[serde(default)]
    pub prompt_capabilities: PromptCapabilities,
    /// MCP transport support, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_capabilities: Option<Value>,
}

/// Agent identity metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent name.
    #[serde(default)]
    pub name: String,
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Agent version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// One supported authentication method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMethod {
    /// Identifier passed back in `authenticate`.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `initialize` result. Set once during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<ProtocolVersion>,
    /// Agent capability flags.
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    /// Agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<AgentInfo>,
    /// Supported authentication methods.
    #[serde(default)]
    pub auth_methods: Vec<AuthMethod>,
}

/// `authenticate` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticateParams {
    /// One of the advertised [`AuthMethod::id`]s.
    pub method_id: String,
}

/// One unit of prompt or message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image.
    Image {
        /// Base64 payload.
        data: String,
        /// MIME type, e.g. `image/png`.
        mime_type: String,
    },
    /// Link to a resource the agent can fetch.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name.
        #[serde(default)]
        name: String,
    },
    /// Embedded resource contents.
    Resource {
        /// Resource payload, passed through untouched.
        resource: Value,
    },
    /// Any block type this crate does not model.
    #[serde(other)]
    Other,
}

impl ContentBlock {
    /// Text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The text of a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// `session/new` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Working directory for the session.
    pub cwd: PathBuf,
    /// MCP servers the agent should connect to.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// One selectable session mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMode {
    /// Mode id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Current and available modes for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Active mode id.
    pub current_mode_id: String,
    /// Modes the agent offers.
    #[serde(default)]
    pub available_modes: Vec<SessionMode>,
}

/// `session/new` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Agent-assigned session id.
    pub session_id: String,
    /// Mode state, if the agent supports modes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
}

/// `session/prompt` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Target session.
    pub session_id: String,
    /// Prompt content.
    pub prompt: Vec<ContentBlock>,
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent finished its turn.
    #[default]
    EndTurn,
    /// Token limit reached.
    MaxTokens,
    /// Turn request limit reached.
    MaxTurnRequests,
    /// The agent refused.
    Refusal,
    /// The turn was cancelled by the client.
    Cancelled,
    /// A reason this crate does not model.
    #[serde(other)]
    Other,
}

/// `session/prompt` result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Why the turn ended.
    #[serde(default)]
    pub stop_reason: StopReason,
}

/// `session/cancel` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Target session.
    pub session_id: String,
}

/// `session/set_mode` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetModeParams {
    /// Target session.
    pub session_id: String,
    /// One of the session's available mode ids.
    pub mode_id: String,
}
