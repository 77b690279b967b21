//! Permission request and outcome wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ToolCallInfo;
use crate::{AppError, Result};

/// Category of a permission option.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this call only.
    AllowOnce,
    /// Allow this and future matching calls.
    AllowAlways,
    /// Reject this call only.
    RejectOnce,
    /// Reject this and future matching calls.
    RejectAlways,
    /// A kind this crate does not model.
    #[default]
    #[serde(other)]
    Other,
}

impl PermissionOptionKind {
    /// Whether choosing this option lets the tool run.
    #[must_use]
    pub fn is_allow(self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }
}

/// One selectable answer to a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOption {
    /// Option id returned in the outcome.
    #[serde(alias = "optionId")]
    pub id: String,
    /// Display label.
    #[serde(alias = "name", default)]
    pub label: String,
    /// Option category.
    #[serde(default)]
    pub kind: PermissionOptionKind,
}

impl PermissionOption {
    /// Build an option.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: PermissionOptionKind) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// A permission prompt raised by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Session the prompt belongs to.
    pub session_id: String,
    /// Choices offered to the human.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
    /// Name of the tool asking to run.
    #[serde(default)]
    pub tool_name: String,
    /// Tool input.
    #[serde(default)]
    pub input: Value,
    /// Id of the tool call awaiting the decision.
    #[serde(default)]
    pub tool_use_id: String,
    /// Agent-suggested follow-up settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Value>,
    /// Path that triggered the prompt, when a sandbox blocked access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_path: Option<String>,
    /// Full tool call, as sent by ACP agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallInfo>,
}

impl PermissionRequest {
    /// Parse request parameters, filling the flat fields from `toolCall`
    /// when the agent only sent the nested form.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if the parameters are malformed or
    /// carry no session id.
    pub fn from_params(params: Value) -> Result<Self> {
        let mut request: Self = serde_json::from_value(params)
            .map_err(|e| AppError::Protocol(format!("invalid permission request: {e}")))?;

        if request.session_id.is_empty() {
            return Err(AppError::Protocol(
                "permission request has no session id".into(),
            ));
        }

        if let Some(call) = &request.tool_call {
            if request.tool_name.is_empty() {
                request.tool_name.clone_from(&call.title);
            }
            if request.tool_use_id.is_empty() {
                request.tool_use_id.clone_from(&call.tool_call_id);
            }
            if request.input.is_null() {
                if let Some(raw) = &call.raw_input {
                    request.input = raw.clone();
                }
            }
        }

        Ok(request)
    }

    /// The option with the given id.
    #[must_use]
    pub fn option(&self, id: &str) -> Option<&PermissionOption> {
        self.options.iter().find(|opt| opt.id == id)
    }

    /// First option of the given kind.
    #[must_use]
    pub fn option_of_kind(&self, kind: PermissionOptionKind) -> Option<&PermissionOption> {
        self.options.iter().find(|opt| opt.kind == kind)
    }
}

/// Resolution of a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PermissionOutcome {
    /// The human chose an option.
    Selected {
        /// Chosen option id.
        #[serde(rename = "optionId")]
        option_id: String,
    },
    /// The prompt was dismissed or the turn cancelled.
    Cancelled,
}

impl PermissionOutcome {
    /// `Selected` outcome.
    #[must_use]
    pub fn selected(option_id: impl Into<String>) -> Self {
        Self::Selected {
            option_id: option_id.into(),
        }
    }

    /// Chosen option id, if any.
    #[must_use]
    pub fn option_id(&self) -> Option<&str> {
        match self {
            Self::Selected { option_id } => Some(option_id),
            Self::Cancelled => None,
        }
    }
}

/// Result sent back for `session/request_permission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    /// The resolution.
    pub outcome: PermissionOutcome,
}
