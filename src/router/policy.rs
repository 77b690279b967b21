//! Sub-agent detection.
//!
//! No protocol carries a canonical "this tool call is a nested agent"
//! signal, so detection is a pluggable heuristic. The default matches if any
//! one of its three signals fires; a false positive only creates an empty
//! conversation.

use crate::protocol::ToolCallInfo;

/// Decides whether a tool call spawns a sub-agent.
pub trait SubAgentPolicy: Send + Sync {
    /// Return `true` if `call` represents a spawned sub-agent.
    fn is_sub_agent(&self, call: &ToolCallInfo) -> bool;
}

impl<F> SubAgentPolicy for F
where
    F: Fn(&ToolCallInfo) -> bool + Send + Sync,
{
    fn is_sub_agent(&self, call: &ToolCallInfo) -> bool {
        self(call)
    }
}

/// Title, keyword, and input-key heuristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSubAgentPolicy {
    /// Titles that name an agent-spawning tool, compared case-insensitively.
    pub spawn_tool_names: Vec<String>,
    /// Substring that marks a title as agent-related, case-insensitive.
    pub title_keyword: String,
    /// Raw-input keys that only sub-agent spawns carry.
    pub input_keys: Vec<String>,
}

impl Default for DefaultSubAgentPolicy {
    fn default() -> Self {
        Self {
            spawn_tool_names: vec!["Task".to_owned()],
            title_keyword: "agent".to_owned(),
            input_keys: vec!["subagent_type".to_owned()],
        }
    }
}

impl SubAgentPolicy for DefaultSubAgentPolicy {
    fn is_sub_agent(&self, call: &ToolCallInfo) -> bool {
        let title = call.title.trim();

        if self
            .spawn_tool_names
            .iter()
            .any(|name| title.eq_ignore_ascii_case(name))
        {
            return true;
        }

        if !self.title_keyword.is_empty()
            && title
                .to_lowercase()
                .contains(&self.title_keyword.to_lowercase())
        {
            return true;
        }

        call.raw_input
            .as_ref()
            .and_then(|input| input.as_object())
            .is_some_and(|input| self.input_keys.iter().any(|key| input.contains_key(key)))
    }
}
