//! `session/update` notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ContentBlock;
use crate::router::policy::{DefaultSubAgentPolicy, SubAgentPolicy};

/// `session/update` parameters: the multiplexing key plus one update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update itself.
    pub update: SessionUpdate,
}

impl SessionNotification {
    /// Pair an update with its session id.
    #[must_use]
    pub fn new(session_id: impl Into<String>, update: SessionUpdate) -> Self {
        Self {
            session_id: session_id.into(),
            update,
        }
    }
}

/// Discriminated union of session update kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "sessionUpdate",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SessionUpdate {
    /// Echo of user input.
    UserMessageChunk {
        /// Chunk content.
        content: ContentBlock,
        /// Extension metadata.
        #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    /// Streamed assistant text.
    AgentMessageChunk {
        /// Chunk content.
        content: ContentBlock,
        /// Extension metadata.
        #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    /// Streamed reasoning text.
    AgentThoughtChunk {
        /// Chunk content.
        content: ContentBlock,
        /// Extension metadata.
        #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
        meta: Option<Value>,
    },
    /// A tool call started.
    ToolCall(ToolCallInfo),
    /// A tool call progressed or finished.
    ToolCallUpdate(ToolCallUpdateInfo),
    /// The agent's plan changed.
    Plan {
        /// Full replacement list of entries.
        entries: Vec<PlanEntry>,
    },
    /// The session switched mode.
    CurrentModeUpdate {
        /// New mode id.
        current_mode_id: String,
    },
    /// The agent's slash commands changed.
    AvailableCommandsUpdate {
        /// Full replacement list.
        available_commands: Vec<AvailableCommand>,
    },
    /// An update kind this crate does not model.
    #[serde(other)]
    Other,
}

impl SessionUpdate {
    /// Assistant text chunk.
    #[must_use]
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::AgentMessageChunk {
            content: ContentBlock::text(text),
            meta: None,
        }
    }

    /// Reasoning text chunk.
    #[must_use]
    pub fn agent_thought(text: impl Into<String>) -> Self {
        Self::AgentThoughtChunk {
            content: ContentBlock::text(text),
            meta: None,
        }
    }

    /// Wire name of the kind, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessageChunk { .. } => "user_message_chunk",
            Self::AgentMessageChunk { .. } => "agent_message_chunk",
            Self::AgentThoughtChunk { .. } => "agent_thought_chunk",
            Self::ToolCall(_) => "tool_call",
            Self::ToolCallUpdate(_) => "tool_call_update",
            Self::Plan { .. } => "plan",
            Self::CurrentModeUpdate { .. } => "current_mode_update",
            Self::AvailableCommandsUpdate { .. } => "available_commands_update",
            Self::Other => "other",
        }
    }

    /// Tool call this update is nested under, if the agent reported one.
    #[must_use]
    pub fn parent_tool_call_id(&self) -> Option<&str> {
        let meta = match self {
            Self::UserMessageChunk { meta, .. }
            | Self::AgentMessageChunk { meta, .. }
            | Self::AgentThoughtChunk { meta, .. } => meta.as_ref(),
            Self::ToolCall(info) => info.meta.as_ref(),
            Self::ToolCallUpdate(info) => info.meta.as_ref(),
            _ => None,
        };
        parent_from_meta(meta)
    }

    /// Attach a parent tool call id to the update's metadata.
    #[must_use]
    pub fn with_parent(mut self, parent: Option<&str>) -> Self {
        let Some(parent) = parent else {
            return self;
        };
        let slot = match &mut self {
            Self::UserMessageChunk { meta, .. }
            | Self::AgentMessageChunk { meta, .. }
            | Self::AgentThoughtChunk { meta, .. } => Some(meta),
            Self::ToolCall(info) => Some(&mut info.meta),
            Self::ToolCallUpdate(info) => Some(&mut info.meta),
            _ => None,
        };
        if let Some(slot) = slot {
            let meta = slot.get_or_insert_with(|| Value::Object(serde_json::Map::new()));
            if let Some(map) = meta.as_object_mut() {
                map.insert("parentToolUseId".into(), Value::String(parent.to_owned()));
            }
        }
        self
    }
}

fn parent_from_meta(meta: Option<&Value>) -> Option<&str> {
    let meta = meta?;
    meta.get("parentToolUseId")
        .or_else(|| meta.get("parentToolCallId"))
        .or_else(|| meta.get("claudeCode").and_then(|c| c.get("parentToolUseId")))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Tool call lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Not started yet, or awaiting approval.
    #[default]
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// A status this crate does not model.
    #[serde(other)]
    Unknown,
}

impl ToolCallStatus {
    /// Whether the call has finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Semantic category of a tool call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reads files or data.
    Read,
    /// Modifies files.
    Edit,
    /// Deletes files.
    Delete,
    /// Moves or renames files.
    Move,
    /// Searches for information.
    Search,
    /// Runs a command.
    Execute,
    /// Internal reasoning.
    Think,
    /// Retrieves external data.
    Fetch,
    /// Anything else.
    #[default]
    #[serde(other)]
    Other,
}

/// A tool call as first reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallInfo {
    /// Call id, unique within the session.
    pub tool_call_id: String,
    /// Display title (often the tool name).
    #[serde(default)]
    pub title: String,
    /// Semantic kind.
    #[serde(default)]
    pub kind: ToolKind,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ToolCallStatus,
    /// Produced content blocks, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Value>,
    /// File locations the call touches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Value>,
    /// Raw tool input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Raw tool output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    /// Extension metadata.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolCallInfo {
    /// Whether this call spawns a sub-agent, under the default policy.
    #[must_use]
    pub fn is_task_tool(&self) -> bool {
        DefaultSubAgentPolicy::default().is_sub_agent(self)
    }
}

/// Fields of a tool call that changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdateInfo {
    /// Call id being updated.
    pub tool_call_id: String,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// Replacement content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Value>>,
    /// Updated raw input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Raw output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    /// Extension metadata.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// One plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Entry text.
    pub content: String,
    /// `high`, `medium`, or `low`.
    #[serde(default)]
    pub priority: String,
    /// `pending`, `in_progress`, or `completed`.
    #[serde(default)]
    pub status: String,
}

/// One slash command the agent offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableCommand {
    /// Command name without the slash.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Input hint, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}
