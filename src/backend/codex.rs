//! Codex app-server backend.
//!
//! Codex speaks JSON-RPC but not ACP: a session is a *thread*, a prompt is a
//! *turn*, and progress arrives as fine-grained `item/*` notifications.
//! [`CodexDialect`] maps those onto the common [`SessionUpdate`] union and
//! turns approval requests into [`PendingPermission`]s. Each session gets
//! its own process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    joined_text, spawn_initial_prompt, tool_kind_for_name, AgentBackend, AgentSession, BoxFuture,
    Primed, SessionOptions, SessionRegistry,
};
use crate::config::{AgentConfig, ConnectionLimits};
use crate::connection::{AgentConnection, ProtocolDialect};
use crate::hub::Subscription;
use crate::mode::BackendKind;
use crate::permission::PendingPermission;
use crate::protocol::{
    AgentInfo, ContentBlock, InitializeResult, PermissionOption, PermissionOptionKind,
    PermissionOutcome, PermissionRequest, SessionNotification, SessionUpdate, StopReason,
    ToolCallInfo, ToolCallStatus, ToolCallUpdateInfo,
};
use crate::rpc::{Notification, ServerRequest};
use crate::session::SessionMux;
use crate::{AppError, Result};

/// Environment variable overriding the codex executable.
pub const CODEX_PATH_ENV_VAR: &str = "AGENT_CONDUIT_CODEX_PATH";

/// Codex method names.
pub mod methods {
    /// Post-handshake notification.
    pub const INITIALIZED: &str = "initialized";
    /// Start a thread (session).
    pub const THREAD_START: &str = "thread/start";
    /// Start a turn (prompt).
    pub const TURN_START: &str = "turn/start";
    /// Interrupt the running turn.
    pub const TURN_INTERRUPT: &str = "turn/interrupt";
    /// Turn finished.
    pub const TURN_COMPLETED: &str = "turn/completed";
    /// Streamed assistant text.
    pub const AGENT_MESSAGE_DELTA: &str = "item/agentMessage/delta";
    /// Streamed reasoning text.
    pub const REASONING_DELTA: &str = "item/reasoning/delta";
    /// Item started.
    pub const ITEM_STARTED: &str = "item/started";
    /// Item completed.
    pub const ITEM_COMPLETED: &str = "item/completed";
    /// Approval for a shell command.
    pub const COMMAND_APPROVAL: &str = "item/commandExecution/requestApproval";
    /// Approval for a file change.
    pub const FILE_CHANGE_APPROVAL: &str = "item/fileChange/requestApproval";
}

/// Option ids offered on approval prompts.
pub mod options {
    /// Approve once.
    pub const ACCEPT: &str = "accept";
    /// Approve for the rest of the session.
    pub const ACCEPT_SESSION: &str = "accept_session";
    /// Decline.
    pub const DENY: &str = "deny";
}

fn str_field<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| params.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

fn is_tool_item(params: &Value) -> bool {
    matches!(
        str_field(params, &["type"]),
        Some("tool_call" | "function_call")
    )
}

/// Map a codex stop reason or turn status.
#[must_use]
pub fn stop_reason_from(reason: &str) -> StopReason {
    match reason {
        "end_turn" | "completed" | "success" => StopReason::EndTurn,
        "interrupted" | "cancelled" | "canceled" => StopReason::Cancelled,
        "max_tokens" => StopReason::MaxTokens,
        "max_turn_requests" => StopReason::MaxTurnRequests,
        "refusal" => StopReason::Refusal,
        _ => StopReason::Other,
    }
}

#[derive(Default)]
struct DialectState {
    thread_id: Option<String>,
    tool_titles: HashMap<String, String>,
}

/// Codex wire mapping. Holds the active thread id, since codex
/// notifications do not always carry one.
#[derive(Default)]
pub struct CodexDialect {
    state: Mutex<DialectState>,
}

impl std::fmt::Debug for CodexDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodexDialect")
            .field("thread_id", &self.state().thread_id)
            .finish()
    }
}

impl CodexDialect {
    fn state(&self) -> MutexGuard<'_, DialectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attribute subsequent thread-less notifications to `thread_id`.
    pub fn set_thread(&self, thread_id: impl Into<String>) {
        self.state().thread_id = Some(thread_id.into());
    }

    fn thread_for(&self, params: &Value) -> Option<String> {
        str_field(params, &["threadId"])
            .map(str::to_owned)
            .or_else(|| self.state().thread_id.clone())
    }

    fn translate(&self, method: &str, params: &Value) -> Option<SessionUpdate> {
        match method {
            methods::AGENT_MESSAGE_DELTA => {
                str_field(params, &["delta"]).map(SessionUpdate::agent_text)
            }
            methods::REASONING_DELTA => {
                str_field(params, &["delta"]).map(SessionUpdate::agent_thought)
            }
            methods::ITEM_STARTED if is_tool_item(params) => {
                let id = str_field(params, &["itemId", "id"]).unwrap_or("tool-unknown");
                let name = str_field(params, &["name", "kind"]).unwrap_or("tool");
                self.state()
                    .tool_titles
                    .insert(id.to_owned(), name.to_owned());
                Some(SessionUpdate::ToolCall(ToolCallInfo {
                    tool_call_id: id.to_owned(),
                    title: name.to_owned(),
                    kind: tool_kind_for_name(name),
                    status: ToolCallStatus::InProgress,
                    raw_input: params
                        .get("arguments")
                        .or_else(|| params.get("rawInput"))
                        .cloned(),
                    ..ToolCallInfo::default()
                }))
            }
            methods::ITEM_COMPLETED if is_tool_item(params) => {
                let id = str_field(params, &["itemId", "id"]).unwrap_or("tool-unknown");
                let title = self.state().tool_titles.remove(id);
                let failed = params.get("error").is_some_and(|e| !e.is_null());
                Some(SessionUpdate::ToolCallUpdate(ToolCallUpdateInfo {
                    tool_call_id: id.to_owned(),
                    title,
                    status: Some(if failed {
                        ToolCallStatus::Failed
                    } else {
                        ToolCallStatus::Completed
                    }),
                    raw_output: params
                        .get("output")
                        .or_else(|| params.get("rawOutput"))
                        .cloned(),
                    ..ToolCallUpdateInfo::default()
                }))
            }
            _ => None,
        }
    }

    fn approval_options() -> Vec<PermissionOption> {
        vec![
            PermissionOption::new(options::ACCEPT, "Allow", PermissionOptionKind::AllowOnce),
            PermissionOption::new(
                options::ACCEPT_SESSION,
                "Allow for session",
                PermissionOptionKind::AllowAlways,
            ),
            PermissionOption::new(options::DENY, "Deny", PermissionOptionKind::RejectOnce),
        ]
    }
}

impl ProtocolDialect for CodexDialect {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn launch_args(&self) -> Vec<String> {
        vec!["app-server".to_owned()]
    }

    fn executable_override_var(&self) -> Option<&'static str> {
        Some(CODEX_PATH_ENV_VAR)
    }

    fn initialize_params(&self) -> Value {
        json!({
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {},
        })
    }

    fn initialized_notification(&self) -> Option<(&'static str, Value)> {
        Some((methods::INITIALIZED, json!({})))
    }

    fn parse_initialize_result(&self, result: Value) -> Result<InitializeResult> {
        if !result.is_object() {
            return Err(AppError::Connection(format!(
                "invalid initialize result: {result}"
            )));
        }
        let mut init: InitializeResult = serde_json::from_value(result.clone()).unwrap_or_default();
        if init.agent_info.is_none() {
            init.agent_info = str_field(&result, &["userAgent"]).map(|ua| AgentInfo {
                name: ua.to_owned(),
                title: None,
                version: None,
            });
        }
        Ok(init)
    }

    fn translate_notification(&self, notification: &Notification) -> Vec<SessionNotification> {
        let Some(update) = self.translate(&notification.method, &notification.params) else {
            return Vec::new();
        };
        match self.thread_for(&notification.params) {
            Some(thread_id) => vec![SessionNotification::new(thread_id, update)],
            None => {
                debug!(method = %notification.method, "codex notification before thread start dropped");
                Vec::new()
            }
        }
    }

    fn permission_request(&self, request: &ServerRequest) -> Option<Result<PermissionRequest>> {
        let (tool_name, title_key) = match request.method.as_str() {
            methods::COMMAND_APPROVAL => ("commandExecution", "command"),
            methods::FILE_CHANGE_APPROVAL => ("fileChange", "reason"),
            _ => return None,
        };
        let params = &request.params;

        let Some(session_id) = self.thread_for(params) else {
            return Some(Err(AppError::Protocol(
                "approval request has no thread id".into(),
            )));
        };
        let tool_use_id = str_field(params, &["itemId", "id"])
            .unwrap_or("tool-unknown")
            .to_owned();
        let title = str_field(params, &[title_key]).unwrap_or(tool_name).to_owned();

        Some(Ok(PermissionRequest {
            session_id,
            options: Self::approval_options(),
            tool_name: tool_name.to_owned(),
            input: params.clone(),
            tool_use_id: tool_use_id.clone(),
            suggestions: None,
            blocked_path: None,
            tool_call: Some(ToolCallInfo {
                tool_call_id: tool_use_id,
                title,
                kind: tool_kind_for_name(if tool_name == "fileChange" { "edit" } else { "shell" }),
                status: ToolCallStatus::Pending,
                raw_input: Some(params.clone()),
                ..ToolCallInfo::default()
            }),
        }))
    }

    fn permission_response(&self, _request: &PermissionRequest, outcome: &PermissionOutcome) -> Value {
        match outcome.option_id() {
            Some(options::ACCEPT_SESSION) => {
                json!({ "decision": "accept", "acceptSettings": { "forSession": true } })
            }
            Some(options::ACCEPT) => json!({ "decision": "accept" }),
            _ => json!({ "decision": "decline" }),
        }
    }
}

/// Backend starting one codex app-server per session.
pub struct CodexBackend {
    agent: AgentConfig,
    limits: ConnectionLimits,
    sessions: SessionRegistry,
}

impl CodexBackend {
    /// Backend for `agent`.
    #[must_use]
    pub fn new(agent: AgentConfig, limits: ConnectionLimits) -> Self {
        Self {
            agent,
            limits,
            sessions: SessionRegistry::default(),
        }
    }

    async fn open(
        &self,
        prompt: Option<String>,
        cwd: PathBuf,
        options: SessionOptions,
    ) -> Result<Arc<dyn AgentSession>> {
        let dialect = Arc::new(CodexDialect::default());
        let connection = AgentConnection::with_cwd(
            self.agent.clone(),
            Arc::clone(&dialect) as Arc<dyn ProtocolDialect>,
            self.limits,
            cwd.clone(),
        );
        connection.connect().await?;

        let thread = async {
            let mut params = json!({ "cwd": cwd });
            if let Some(mode) = &options.mode_id {
                params["approvalPolicy"] = json!(mode);
            }
            let response = connection.request(methods::THREAD_START, params).await?;
            str_field(&response, &["threadId", "id"])
                .or_else(|| response.get("thread").and_then(|t| str_field(t, &["id"])))
                .map(str::to_owned)
                .ok_or_else(|| AppError::Protocol(format!("invalid thread/start result: {response}")))
        };
        let thread_id = match thread.await {
            Ok(id) => id,
            Err(err) => {
                connection.dispose().await;
                return Err(err);
            }
        };

        dialect.set_thread(thread_id.clone());
        info!(session_id = %thread_id, "codex thread started");

        let session: Arc<dyn AgentSession> =
            Arc::new(CodexSession::new(thread_id, connection));
        self.sessions.insert(Arc::clone(&session));
        spawn_initial_prompt(Arc::clone(&session), prompt);
        Ok(session)
    }
}

impl AgentBackend for CodexBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Codex
    }

    fn create_session(
        &self,
        prompt: Option<String>,
        cwd: PathBuf,
        options: SessionOptions,
    ) -> BoxFuture<'_, Result<Arc<dyn AgentSession>>> {
        Box::pin(self.open(prompt, cwd, options))
    }

    fn sessions(&self) -> Vec<Arc<dyn AgentSession>> {
        self.sessions.active()
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            for session in self.sessions.drain() {
                session.kill().await;
            }
        })
    }
}

/// One codex thread and its dedicated process.
pub struct CodexSession {
    thread_id: String,
    connection: AgentConnection,
    mux: SessionMux,
    events: Primed<SessionNotification>,
    permissions: Primed<PendingPermission>,
    turn_id: Mutex<Option<String>>,
    turn_lock: tokio::sync::Mutex<()>,
    killed: AtomicBool,
}

impl CodexSession {
    fn new(thread_id: String, connection: AgentConnection) -> Self {
        let mux = SessionMux::new(thread_id.clone(), &connection);
        Self {
            events: Primed::new(mux.updates()),
            permissions: Primed::new(mux.permission_requests()),
            thread_id,
            connection,
            mux,
            turn_id: Mutex::new(None),
            turn_lock: tokio::sync::Mutex::new(()),
            killed: AtomicBool::new(false),
        }
    }

    fn turn_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.turn_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_turn(&self, content: Vec<ContentBlock>) -> Result<StopReason> {
        if !self.is_active() {
            return Err(AppError::State(format!(
                "session '{}' is not active",
                self.thread_id
            )));
        }
        let _turn = self.turn_lock.lock().await;

        // Subscribe before starting so turn/completed cannot be missed.
        let mut notifications = self.connection.notifications();
        let process = self.connection.process();
        let response = self
            .connection
            .request(
                methods::TURN_START,
                json!({
                    "threadId": self.thread_id,
                    "input": [{ "type": "text", "text": joined_text(&content) }],
                }),
            )
            .await?;
        let turn_id = response
            .get("turn")
            .and_then(|t| str_field(t, &["id"]))
            .map(str::to_owned);
        debug!(session_id = %self.thread_id, turn_id = ?turn_id, "turn started");
        *self.turn_slot() = turn_id;

        let exited = async {
            match &process {
                Some(process) => process.wait_for_exit().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(exited);

        let stop_reason = loop {
            let next = tokio::select! {
                biased;
                next = notifications.recv() => next,
                exit = &mut exited => {
                    *self.turn_slot() = None;
                    warn!(session_id = %self.thread_id, %exit, "codex exited during turn");
                    return Err(AppError::ProcessCrashed(format!(
                        "codex exited during turn ({exit})"
                    )));
                }
            };
            let Some(notification) = next else {
                *self.turn_slot() = None;
                return Err(self.connection.last_error().unwrap_or_else(|| {
                    AppError::ProcessCrashed("codex connection closed during turn".into())
                }));
            };
            if notification.method != methods::TURN_COMPLETED {
                continue;
            }
            let params = &notification.params;
            if str_field(params, &["threadId"]).is_some_and(|t| t != self.thread_id) {
                continue;
            }
            let reason = str_field(params, &["stopReason", "reason"])
                .or_else(|| params.get("turn").and_then(|t| str_field(t, &["status"])))
                .unwrap_or("end_turn");
            break stop_reason_from(reason);
        };

        *self.turn_slot() = None;
        Ok(stop_reason)
    }
}

impl AgentSession for CodexSession {
    fn session_id(&self) -> &str {
        &self.thread_id
    }

    fn is_active(&self) -> bool {
        !self.killed.load(Ordering::Acquire) && self.connection.is_connected()
    }

    fn events(&self) -> Subscription<SessionNotification> {
        self.events.take_or(|| self.mux.updates())
    }

    fn permission_requests(&self) -> Subscription<PendingPermission> {
        self.permissions.take_or(|| self.mux.permission_requests())
    }

    fn send_with_content(&self, content: Vec<ContentBlock>) -> BoxFuture<'_, Result<StopReason>> {
        Box::pin(self.run_turn(content))
    }

    fn interrupt(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut params = json!({ "threadId": self.thread_id });
            if let Some(turn_id) = self.turn_slot().clone() {
                params["turnId"] = json!(turn_id);
            }
            match self.connection.request(methods::TURN_INTERRUPT, params).await {
                Ok(_) => Ok(()),
                Err(AppError::Rpc { code, message }) => {
                    warn!(session_id = %self.thread_id, code, %message, "turn/interrupt rejected");
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    fn kill(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.killed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.mux.dispose();
            self.connection.dispose().await;
            info!(session_id = %self.thread_id, "codex session killed");
        })
    }
}
