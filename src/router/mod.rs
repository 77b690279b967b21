//! Typed dispatch of session updates onto conversations.
//!
//! An [`EventRouter`] receives one session's updates and calls the callback
//! registered for each update kind, together with the conversation id the
//! update belongs to. Updates nested under a tool call that was registered
//! in [`ToolCallRoutes`] go to that call's conversation; everything else
//! goes to the primary conversation. Kinds without a callback are ignored.

pub mod policy;
pub mod routes;

use std::sync::Arc;

use tracing::{debug, info};

pub use policy::{DefaultSubAgentPolicy, SubAgentPolicy};
pub use routes::ToolCallRoutes;

use crate::hub::Subscription;
use crate::protocol::{
    AvailableCommand, ContentBlock, PlanEntry, SessionNotification, SessionUpdate, ToolCallInfo,
    ToolCallUpdateInfo,
};

type ContentCallback = Box<dyn Fn(&str, &ContentBlock) + Send + Sync>;
type ToolCallCallback = Box<dyn Fn(&str, &ToolCallInfo) + Send + Sync>;
type ToolCallUpdateCallback = Box<dyn Fn(&str, &ToolCallUpdateInfo) + Send + Sync>;
type PlanCallback = Box<dyn Fn(&str, &[PlanEntry]) + Send + Sync>;
type ModeCallback = Box<dyn Fn(&str, &str) + Send + Sync>;
type CommandsCallback = Box<dyn Fn(&str, &[AvailableCommand]) + Send + Sync>;
type SubAgentCallback = Box<dyn Fn(&str, &ToolCallInfo) -> Option<String> + Send + Sync>;

/// Routes one session's updates to typed callbacks.
pub struct EventRouter {
    primary: String,
    routes: ToolCallRoutes,
    policy: Arc<dyn SubAgentPolicy>,
    on_agent_message: Option<ContentCallback>,
    on_agent_thought: Option<ContentCallback>,
    on_user_message: Option<ContentCallback>,
    on_tool_call: Option<ToolCallCallback>,
    on_tool_call_update: Option<ToolCallUpdateCallback>,
    on_plan: Option<PlanCallback>,
    on_mode_change: Option<ModeCallback>,
    on_available_commands: Option<CommandsCallback>,
    on_sub_agent: Option<SubAgentCallback>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("primary", &self.primary)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    /// Route to `primary_conversation` unless a registered parent says otherwise.
    #[must_use]
    pub fn new(primary_conversation: impl Into<String>) -> Self {
        Self {
            primary: primary_conversation.into(),
            routes: ToolCallRoutes::new(),
            policy: Arc::new(DefaultSubAgentPolicy::default()),
            on_agent_message: None,
            on_agent_thought: None,
            on_user_message: None,
            on_tool_call: None,
            on_tool_call_update: None,
            on_plan: None,
            on_mode_change: None,
            on_available_commands: None,
            on_sub_agent: None,
        }
    }

    /// Share an existing routing table, e.g. one owned by the conversation store.
    #[must_use]
    pub fn with_routes(mut self, routes: ToolCallRoutes) -> Self {
        self.routes = routes;
        self
    }

    /// Replace the sub-agent detection policy.
    #[must_use]
    pub fn with_policy(mut self, policy: impl SubAgentPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Streamed assistant text.
    #[must_use]
    pub fn on_agent_message(mut self, f: impl Fn(&str, &ContentBlock) + Send + Sync + 'static) -> Self {
        self.on_agent_message = Some(Box::new(f));
        self
    }

    /// Streamed reasoning text.
    #[must_use]
    pub fn on_agent_thought(mut self, f: impl Fn(&str, &ContentBlock) + Send + Sync + 'static) -> Self {
        self.on_agent_thought = Some(Box::new(f));
        self
    }

    /// Echoed user input.
    #[must_use]
    pub fn on_user_message(mut self, f: impl Fn(&str, &ContentBlock) + Send + Sync + 'static) -> Self {
        self.on_user_message = Some(Box::new(f));
        self
    }

    /// Tool call started.
    #[must_use]
    pub fn on_tool_call(mut self, f: impl Fn(&str, &ToolCallInfo) + Send + Sync + 'static) -> Self {
        self.on_tool_call = Some(Box::new(f));
        self
    }

    /// Tool call updated.
    #[must_use]
    pub fn on_tool_call_update(
        mut self,
        f: impl Fn(&str, &ToolCallUpdateInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_tool_call_update = Some(Box::new(f));
        self
    }

    /// Plan replaced.
    #[must_use]
    pub fn on_plan(mut self, f: impl Fn(&str, &[PlanEntry]) + Send + Sync + 'static) -> Self {
        self.on_plan = Some(Box::new(f));
        self
    }

    /// Session mode changed.
    #[must_use]
    pub fn on_mode_change(mut self, f: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.on_mode_change = Some(Box::new(f));
        self
    }

    /// Slash commands replaced.
    #[must_use]
    pub fn on_available_commands(
        mut self,
        f: impl Fn(&str, &[AvailableCommand]) + Send + Sync + 'static,
    ) -> Self {
        self.on_available_commands = Some(Box::new(f));
        self
    }

    /// Sub-agent spawn detected. Receives the parent conversation and the
    /// spawning call; returning a conversation id registers the call so its
    /// nested output is routed there.
    #[must_use]
    pub fn on_sub_agent(
        mut self,
        f: impl Fn(&str, &ToolCallInfo) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.on_sub_agent = Some(Box::new(f));
        self
    }

    /// The primary conversation id.
    #[must_use]
    pub fn primary_conversation(&self) -> &str {
        &self.primary
    }

    /// The routing table.
    #[must_use]
    pub fn routes(&self) -> &ToolCallRoutes {
        &self.routes
    }

    /// Whether `call` spawns a sub-agent under this router's policy.
    #[must_use]
    pub fn is_sub_agent(&self, call: &ToolCallInfo) -> bool {
        self.policy.is_sub_agent(call)
    }

    /// Conversation an update belongs to.
    #[must_use]
    pub fn conversation_for(&self, update: &SessionUpdate) -> String {
        update
            .parent_tool_call_id()
            .and_then(|parent| self.routes.lookup(parent))
            .unwrap_or_else(|| self.primary.clone())
    }

    /// Dispatch one update. Returns the conversation it was attributed to.
    pub fn handle_update(&self, notification: &SessionNotification) -> String {
        let conversation = self.conversation_for(&notification.update);

        match &notification.update {
            SessionUpdate::AgentMessageChunk { content, .. } => {
                if let Some(f) = &self.on_agent_message {
                    f(&conversation, content);
                }
            }
            SessionUpdate::AgentThoughtChunk { content, .. } => {
                if let Some(f) = &self.on_agent_thought {
                    f(&conversation, content);
                }
            }
            SessionUpdate::UserMessageChunk { content, .. } => {
                if let Some(f) = &self.on_user_message {
                    f(&conversation, content);
                }
            }
            SessionUpdate::ToolCall(call) => {
                if let Some(f) = &self.on_tool_call {
                    f(&conversation, call);
                }
                self.detect_sub_agent(&conversation, call);
            }
            SessionUpdate::ToolCallUpdate(update) => {
                if let Some(f) = &self.on_tool_call_update {
                    f(&conversation, update);
                }
            }
            SessionUpdate::Plan { entries } => {
                if let Some(f) = &self.on_plan {
                    f(&conversation, entries);
                }
            }
            SessionUpdate::CurrentModeUpdate { current_mode_id } => {
                if let Some(f) = &self.on_mode_change {
                    f(&conversation, current_mode_id);
                }
            }
            SessionUpdate::AvailableCommandsUpdate { available_commands } => {
                if let Some(f) = &self.on_available_commands {
                    f(&conversation, available_commands);
                }
            }
            SessionUpdate::Other => {
                debug!(session_id = %notification.session_id, "ignoring unmodelled update kind");
            }
        }

        conversation
    }

    fn detect_sub_agent(&self, conversation: &str, call: &ToolCallInfo) {
        if self.routes.lookup(&call.tool_call_id).is_some() || !self.policy.is_sub_agent(call) {
            return;
        }
        let Some(create) = &self.on_sub_agent else {
            return;
        };
        if let Some(child) = create(conversation, call) {
            info!(
                tool_call_id = %call.tool_call_id,
                parent = conversation,
                conversation_id = %child,
                "sub-agent conversation registered"
            );
            self.routes.register(call.tool_call_id.clone(), child);
        }
    }

    /// Dispatch every update from `updates` until the stream ends.
    pub async fn run(&self, mut updates: Subscription<SessionNotification>) {
        while let Some(notification) = updates.recv().await {
            self.handle_update(&notification);
        }
    }
}
