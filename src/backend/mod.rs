//! Protocol-agnostic backend abstraction.
//!
//! An [`AgentBackend`] creates [`AgentSession`]s over one wire protocol.
//! ACP multiplexes every session over one shared process; Codex and the
//! direct Claude protocol start one process per session. Callers see the
//! same surface either way and pick the implementation through
//! [`create_backend`] or [`backend_from_config`].

pub mod acp;
pub mod claude;
pub mod codex;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{info, warn};

use crate::config::{AgentConfig, ClientConfig, ConnectionLimits};
use crate::hub::Subscription;
use crate::mode::BackendKind;
use crate::permission::PendingPermission;
use crate::protocol::{ContentBlock, SessionNotification, StopReason, ToolKind};
use crate::Result;

/// Boxed future returned by backend and session trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-session options for [`AgentBackend::create_session`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Mode to switch to once the session exists.
    pub mode_id: Option<String>,
    /// MCP server descriptors handed to the agent as-is.
    pub mcp_servers: Vec<Value>,
}

/// One logical conversation with an agent.
pub trait AgentSession: Send + Sync {
    /// Agent-assigned session id.
    fn session_id(&self) -> &str;

    /// Whether the session can still take prompts.
    fn is_active(&self) -> bool;

    /// Subscribe to session updates.
    ///
    /// The first call receives everything published since the session was
    /// created, including updates from the initial prompt.
    fn events(&self) -> Subscription<SessionNotification>;

    /// Subscribe to permission prompts. Same buffering as [`AgentSession::events`].
    fn permission_requests(&self) -> Subscription<PendingPermission>;

    /// Send a text prompt and wait for the turn to end.
    ///
    /// # Errors
    ///
    /// See [`AgentSession::send_with_content`].
    fn send(&self, text: &str) -> BoxFuture<'_, Result<StopReason>> {
        self.send_with_content(vec![ContentBlock::text(text)])
    }

    /// Send prompt content and wait for the turn to end.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`](crate::AppError::State) if the session is
    /// no longer active, or the protocol error that ended the turn.
    fn send_with_content(&self, content: Vec<ContentBlock>) -> BoxFuture<'_, Result<StopReason>>;

    /// Ask the agent to stop the current turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the stop request could not be written.
    fn interrupt(&self) -> BoxFuture<'_, Result<()>>;

    /// End the session and release its resources. Idempotent.
    fn kill(&self) -> BoxFuture<'_, ()>;
}

/// Factory and registry of sessions for one wire protocol.
pub trait AgentBackend: Send + Sync {
    /// Protocol this backend speaks.
    fn kind(&self) -> BackendKind;

    /// Start a session in `cwd`, optionally sending `prompt` as its first turn.
    ///
    /// # Errors
    ///
    /// Returns the connection or protocol error that prevented the session
    /// from starting.
    fn create_session(
        &self,
        prompt: Option<String>,
        cwd: PathBuf,
        options: SessionOptions,
    ) -> BoxFuture<'_, Result<Arc<dyn AgentSession>>>;

    /// Sessions that are still active.
    fn sessions(&self) -> Vec<Arc<dyn AgentSession>>;

    /// Kill every session and release shared resources. Idempotent.
    fn dispose(&self) -> BoxFuture<'_, ()>;
}

/// Build the backend for `kind`.
#[must_use]
pub fn create_backend(
    kind: BackendKind,
    agent: AgentConfig,
    limits: ConnectionLimits,
) -> Arc<dyn AgentBackend> {
    info!(backend = kind.as_str(), agent_id = %agent.id, "creating backend");
    match kind {
        BackendKind::Acp => Arc::new(acp::AcpBackend::new(agent, limits)),
        BackendKind::Codex => Arc::new(codex::CodexBackend::new(agent, limits)),
        BackendKind::Claude => Arc::new(claude::ClaudeBackend::new(agent, limits)),
    }
}

/// Resolve the backend kind and agent from configuration and build it.
///
/// # Errors
///
/// Returns [`AppError::Config`](crate::AppError::Config) for an unsupported
/// backend selector, or [`AppError::NotFound`](crate::AppError::NotFound)
/// for an unknown agent id.
pub fn backend_from_config(
    config: &ClientConfig,
    explicit: Option<&str>,
    agent_id: Option<&str>,
) -> Result<Arc<dyn AgentBackend>> {
    let kind = BackendKind::resolve(explicit, config.backend.as_deref())?;
    let agent = config.agent(agent_id)?.clone();
    Ok(create_backend(kind, agent, config.limits(kind)))
}

/// Subscription created at session construction, handed to the first caller.
pub(crate) struct Primed<T> {
    first: Mutex<Option<Subscription<T>>>,
}

impl<T> Primed<T> {
    pub(crate) fn new(subscription: Subscription<T>) -> Self {
        Self {
            first: Mutex::new(Some(subscription)),
        }
    }

    pub(crate) fn take_or(&self, fresh: impl FnOnce() -> Subscription<T>) -> Subscription<T> {
        let primed = self
            .first
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        primed.unwrap_or_else(fresh)
    }
}

/// Registry of a backend's sessions keyed by session id.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<dyn AgentSession>>>,
}

impl SessionRegistry {
    pub(crate) fn insert(&self, session: Arc<dyn AgentSession>) {
        let id = session.session_id().to_owned();
        let replaced = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), session);
        if replaced.is_some() {
            warn!(session_id = %id, "session id reused, previous session replaced");
        }
    }

    /// Active sessions; inactive ones are dropped from the registry.
    pub(crate) fn active(&self) -> Vec<Arc<dyn AgentSession>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, session| session.is_active());
        sessions.values().cloned().collect()
    }

    pub(crate) fn drain(&self) -> Vec<Arc<dyn AgentSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, session)| session)
            .collect()
    }
}

/// Send the initial prompt of a new session in the background.
pub(crate) fn spawn_initial_prompt(session: Arc<dyn AgentSession>, prompt: Option<String>) {
    let Some(prompt) = prompt.filter(|p| !p.is_empty()) else {
        return;
    };
    tokio::spawn(async move {
        match session.send(&prompt).await {
            Ok(stop_reason) => {
                info!(session_id = session.session_id(), ?stop_reason, "initial turn ended");
            }
            Err(err) => {
                warn!(session_id = session.session_id(), error = %err, "initial prompt failed");
            }
        }
    });
}

/// Best-effort tool kind for a tool name reported by a CLI agent.
#[must_use]
pub fn tool_kind_for_name(name: &str) -> ToolKind {
    match name.to_ascii_lowercase().as_str() {
        "read" | "notebookread" | "ls" => ToolKind::Read,
        "edit" | "multiedit" | "write" | "notebookedit" | "apply_patch" => ToolKind::Edit,
        "bash" | "shell" | "exec" | "local_shell" | "bashoutput" | "killshell" => ToolKind::Execute,
        "grep" | "glob" | "search" => ToolKind::Search,
        "webfetch" | "websearch" | "fetch" => ToolKind::Fetch,
        "think" | "todowrite" => ToolKind::Think,
        _ => ToolKind::Other,
    }
}

/// Concatenated text of `content`, for protocols that only take text.
pub(crate) fn joined_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(ContentBlock::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}
