//! Tool-call id → conversation id map.
//!
//! Entries live until explicitly removed: conversation lifetime belongs to
//! the caller, so nothing here expires on its own.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Shared routing table. Clones see the same entries.
#[derive(Debug, Clone, Default)]
pub struct ToolCallRoutes {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl ToolCallRoutes {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route output nested under `tool_call_id` to `conversation_id`.
    ///
    /// Returns the conversation previously registered for the call, if any.
    pub fn register(
        &self,
        tool_call_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Option<String> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_call_id.into(), conversation_id.into())
    }

    /// Remove one registration, returning its conversation id.
    pub fn unregister(&self, tool_call_id: &str) -> Option<String> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool_call_id)
    }

    /// Remove every registration pointing at `conversation_id`.
    ///
    /// Returns the number of entries removed.
    pub fn unregister_conversation(&self, conversation_id: &str) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, conv| conv != conversation_id);
        before - entries.len()
    }

    /// Conversation registered for `tool_call_id`.
    #[must_use]
    pub fn lookup(&self, tool_call_id: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_call_id)
            .cloned()
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
