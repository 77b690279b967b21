//! Direct Claude CLI backend over line-delimited stream-json.
//!
//! No JSON-RPC here: every frame is one JSON object tagged by `type`.
//!
//! - Handshake: `control_request{subtype:initialize}` answered by a
//!   `control_response`, then `session.create` answered by `session.created`.
//! - Turns: a `user` frame starts one; a `result` frame ends it.
//! - Permissions: `callback.request` / `callback.response`, or a
//!   `control_request{subtype:can_use_tool}` answered by a `control_response`.
//! - Interrupt: `control_request{subtype:interrupt}`.
//!
//! Each session owns its own process.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{
    spawn_initial_prompt, tool_kind_for_name, AgentBackend, AgentSession, BoxFuture, Primed,
    SessionOptions, SessionRegistry,
};
use crate::config::{AgentConfig, ConnectionLimits};
use crate::connection::spawner::{self, ProcessHandle, SpawnSpec};
use crate::hub::{Hub, Subscription};
use crate::mode::BackendKind;
use crate::permission::PendingPermission;
use crate::protocol::{
    ContentBlock, PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionRequest,
    SessionNotification, SessionUpdate, StopReason, ToolCallInfo, ToolCallStatus,
    ToolCallUpdateInfo,
};
use crate::transport::Transport;
use crate::{AppError, Result};

/// Environment variable overriding the claude executable.
pub const CLAUDE_PATH_ENV_VAR: &str = "AGENT_CONDUIT_CLAUDE_PATH";

/// Flags every claude process is started with.
pub const LAUNCH_ARGS: [&str; 7] = [
    "--output-format",
    "stream-json",
    "--input-format",
    "stream-json",
    "--permission-prompt-tool",
    "stdio",
    "--verbose",
];

const INIT_REQUEST_ID: &str = "init";
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Option ids offered on permission prompts.
pub mod options {
    /// Allow this call.
    pub const ALLOW: &str = "allow";
    /// Allow and apply the agent's suggested rules.
    pub const ALLOW_ALWAYS: &str = "allow_always";
    /// Deny.
    pub const DENY: &str = "deny";
}

fn field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| value.get(*key))
        .filter(|v| !v.is_null())
}

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    field(value, keys).and_then(Value::as_str)
}

fn frame_type(frame: &Value) -> &str {
    str_field(frame, &["type"]).unwrap_or_default()
}

fn content_blocks(content: Option<&Value>) -> Vec<Value> {
    match content {
        Some(Value::String(text)) => vec![json!({ "type": "text", "text": text })],
        Some(Value::Array(blocks)) => blocks.clone(),
        _ => Vec::new(),
    }
}

fn assistant_block(block: &Value) -> Option<SessionUpdate> {
    match frame_type(block) {
        "text" => str_field(block, &["text"])
            .filter(|t| !t.is_empty())
            .map(SessionUpdate::agent_text),
        "thinking" => str_field(block, &["thinking"])
            .filter(|t| !t.is_empty())
            .map(SessionUpdate::agent_thought),
        "tool_use" => {
            let name = str_field(block, &["name"]).unwrap_or("tool");
            Some(SessionUpdate::ToolCall(ToolCallInfo {
                tool_call_id: str_field(block, &["id"]).unwrap_or_default().to_owned(),
                title: name.to_owned(),
                kind: tool_kind_for_name(name),
                status: ToolCallStatus::InProgress,
                raw_input: field(block, &["input"]).cloned(),
                ..ToolCallInfo::default()
            }))
        }
        _ => None,
    }
}

fn user_block(block: &Value) -> Option<SessionUpdate> {
    match frame_type(block) {
        "tool_result" => {
            let failed = field(block, &["is_error"])
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Some(SessionUpdate::ToolCallUpdate(ToolCallUpdateInfo {
                tool_call_id: str_field(block, &["tool_use_id"])
                    .unwrap_or_default()
                    .to_owned(),
                status: Some(if failed {
                    ToolCallStatus::Failed
                } else {
                    ToolCallStatus::Completed
                }),
                raw_output: field(block, &["content"]).cloned(),
                ..ToolCallUpdateInfo::default()
            }))
        }
        "text" => str_field(block, &["text"]).map(|text| SessionUpdate::UserMessageChunk {
            content: ContentBlock::text(text),
            meta: None,
        }),
        _ => None,
    }
}

/// Translate one `assistant` or `user` frame into session updates.
///
/// Updates from a nested agent carry its `parent_tool_use_id` in `_meta`.
#[must_use]
pub fn translate_message(session_id: &str, frame: &Value) -> Vec<SessionNotification> {
    let blocks = content_blocks(frame.get("message").and_then(|m| m.get("content")));
    let convert: fn(&Value) -> Option<SessionUpdate> = match frame_type(frame) {
        "assistant" => assistant_block,
        "user" => user_block,
        _ => return Vec::new(),
    };
    let parent = str_field(frame, &["parent_tool_use_id"]);
    blocks
        .iter()
        .filter_map(convert)
        .map(|update| SessionNotification::new(session_id, update.with_parent(parent)))
        .collect()
}

/// Build a permission request from a `callback.request` frame or the body
/// of a `can_use_tool` control request.
#[must_use]
pub fn permission_request(session_id: &str, body: &Value) -> PermissionRequest {
    PermissionRequest {
        session_id: session_id.to_owned(),
        options: vec![
            PermissionOption::new(options::ALLOW, "Allow", PermissionOptionKind::AllowOnce),
            PermissionOption::new(
                options::ALLOW_ALWAYS,
                "Always allow",
                PermissionOptionKind::AllowAlways,
            ),
            PermissionOption::new(options::DENY, "Deny", PermissionOptionKind::RejectOnce),
        ],
        tool_name: str_field(body, &["tool_name", "toolName"])
            .unwrap_or("tool")
            .to_owned(),
        input: field(body, &["input"]).cloned().unwrap_or(Value::Null),
        tool_use_id: str_field(body, &["tool_use_id", "toolUseId"])
            .unwrap_or_default()
            .to_owned(),
        suggestions: field(body, &["permission_suggestions", "suggestions"]).cloned(),
        blocked_path: str_field(body, &["blocked_path", "blockedPath"]).map(str::to_owned),
        tool_call: None,
    }
}

/// The `behavior` payload answering a permission prompt.
#[must_use]
pub fn permission_reply(request: &PermissionRequest, outcome: &PermissionOutcome) -> Value {
    match outcome.option_id() {
        Some(options::ALLOW) => json!({ "behavior": "allow", "updatedInput": request.input }),
        Some(options::ALLOW_ALWAYS) => {
            let mut reply = json!({ "behavior": "allow", "updatedInput": request.input });
            if let Some(suggestions) = &request.suggestions {
                reply["updatedPermissions"] = suggestions.clone();
            }
            reply
        }
        Some(_) => json!({ "behavior": "deny", "message": "Permission denied by user" }),
        None => json!({ "behavior": "deny", "message": "Permission request cancelled" }),
    }
}

/// Stop reason of a `result` frame.
#[must_use]
pub fn stop_reason_for_result(frame: &Value, interrupted: bool) -> StopReason {
    if interrupted {
        return StopReason::Cancelled;
    }
    match str_field(frame, &["subtype"]) {
        Some("success") | None => StopReason::EndTurn,
        Some("error_max_turns") => StopReason::MaxTurnRequests,
        Some(_) => StopReason::Other,
    }
}

/// Where a permission reply goes.
enum ReplyRoute {
    Callback(String),
    Control(String),
}

impl ReplyRoute {
    fn frame(&self, reply: Value) -> Value {
        match self {
            Self::Callback(request_id) => json!({
                "type": "callback.response",
                "request_id": request_id,
                "response": reply,
            }),
            Self::Control(request_id) => json!({
                "type": "control_response",
                "response": {
                    "subtype": "success",
                    "request_id": request_id,
                    "response": reply,
                },
            }),
        }
    }
}

async fn next_frame_where(
    frames: &mut mpsc::UnboundedReceiver<Value>,
    expected: &str,
    matches: impl Fn(&Value) -> bool,
) -> Result<Value> {
    loop {
        let Some(frame) = frames.recv().await else {
            return Err(AppError::Connection(format!(
                "agent closed its output while waiting for {expected}"
            )));
        };
        if matches(&frame) {
            return Ok(frame);
        }
        debug!(frame_type = frame_type(&frame), expected, "skipping frame during handshake");
    }
}

async fn handshake(
    transport: &Transport,
    frames: &mut mpsc::UnboundedReceiver<Value>,
    cwd: &Path,
) -> Result<String> {
    transport.send(json!({
        "type": "control_request",
        "request_id": INIT_REQUEST_ID,
        "request": { "subtype": "initialize" },
    }))?;
    let response = next_frame_where(frames, "control_response", |frame| {
        frame_type(frame) == "control_response"
            && frame
                .get("response")
                .and_then(|r| str_field(r, &["request_id"]))
                == Some(INIT_REQUEST_ID)
    })
    .await?;
    let body = response.get("response").cloned().unwrap_or_default();
    if str_field(&body, &["subtype"]) == Some("error") {
        return Err(AppError::Connection(format!(
            "agent rejected initialize: {}",
            str_field(&body, &["error"]).unwrap_or("no reason given")
        )));
    }

    transport.send(json!({ "type": "session.create", "cwd": cwd }))?;
    let created = next_frame_where(frames, "session.created", |frame| {
        frame_type(frame) == "session.created"
    })
    .await?;
    str_field(&created, &["session_id", "sessionId"])
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| AppError::Protocol("session.created without session id".into()))
}

/// Backend starting one claude process per session.
pub struct ClaudeBackend {
    agent: AgentConfig,
    limits: ConnectionLimits,
    sessions: SessionRegistry,
}

impl ClaudeBackend {
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
        let label = self.agent.id.clone();
        let program = self.agent.executable(Some(CLAUDE_PATH_ENV_VAR));
        let mut spec = SpawnSpec::for_agent(&self.agent, program, &LAUNCH_ARGS).in_dir(&cwd);
        if let Some(mode) = &options.mode_id {
            spec.args.extend(["--permission-mode".to_owned(), mode.clone()]);
        }

        let process = spawner::spawn_agent(&label, &spec)?;
        let handle = process.handle.clone();
        let transport = Arc::new(Transport::start(
            label.clone(),
            process.stdout,
            process.stdin,
            Some(process.stderr),
            self.limits.stderr_line_cap,
        ));
        let Some(mut frames) = transport.take_frames() else {
            transport.close().await;
            handle.kill();
            return Err(AppError::State("claude transport frames already taken".into()));
        };

        let timeout = self.limits.initialize_timeout;
        let outcome = tokio::select! {
            biased;
            result = tokio::time::timeout(timeout, handshake(&transport, &mut frames, &cwd)) => {
                result.unwrap_or_else(|_| Err(AppError::Timeout(format!(
                    "claude handshake did not complete within {timeout:?}"
                ))))
            }
            exit = handle.wait_for_exit() => Err(AppError::Connection(format!(
                "agent exited during handshake ({exit})"
            ))),
        };

        let session_id = match outcome {
            Ok(id) => id,
            Err(err) => {
                warn!(agent_id = %label, error = %err, "claude handshake failed");
                transport.close().await;
                handle.kill();
                let _ = handle.wait_for_exit().await;
                return Err(err);
            }
        };
        info!(agent_id = %label, session_id = %session_id, "claude session created");

        let session: Arc<dyn AgentSession> =
            Arc::new(ClaudeSession::start(session_id, transport, handle, frames));
        self.sessions.insert(Arc::clone(&session));
        spawn_initial_prompt(Arc::clone(&session), prompt);
        Ok(session)
    }
}

impl AgentBackend for ClaudeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Claude
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

struct Shared {
    session_id: String,
    transport: Arc<Transport>,
    process: ProcessHandle,
    updates: Hub<SessionNotification>,
    permissions: Hub<PendingPermission>,
    interrupted: AtomicBool,
    in_turn: AtomicBool,
    cancel: CancellationToken,
}

impl Shared {
    fn dispatch(self: &Arc<Self>, frame: &Value, turns: &mpsc::UnboundedSender<StopReason>) {
        match frame_type(frame) {
            "assistant" | "user" => {
                for update in translate_message(&self.session_id, frame) {
                    self.updates.publish(update);
                }
            }
            "result" => {
                let reason =
                    stop_reason_for_result(frame, self.interrupted.swap(false, Ordering::AcqRel));
                debug!(session_id = %self.session_id, ?reason, "turn result");
                let _ = turns.send(reason);
            }
            "callback.request" => {
                let Some(request_id) = str_field(frame, &["request_id"]) else {
                    warn!(session_id = %self.session_id, "dropping callback.request without request_id");
                    return;
                };
                let request = permission_request(&self.session_id, frame);
                self.spawn_permission(request, ReplyRoute::Callback(request_id.to_owned()));
            }
            "control_request" => {
                let request_id = str_field(frame, &["request_id"]).unwrap_or_default().to_owned();
                let body = frame.get("request").cloned().unwrap_or_default();
                if str_field(&body, &["subtype"]) == Some("can_use_tool") {
                    let request = permission_request(&self.session_id, &body);
                    self.spawn_permission(request, ReplyRoute::Control(request_id));
                } else {
                    let reply = json!({
                        "type": "control_response",
                        "response": {
                            "subtype": "error",
                            "request_id": request_id,
                            "error": "unsupported control request",
                        },
                    });
                    if let Err(err) = self.transport.send(reply) {
                        debug!(error = %err, "could not reject control request");
                    }
                }
            }
            other => {
                debug!(session_id = %self.session_id, frame_type = other, "ignoring frame");
            }
        }
    }

    fn spawn_permission(self: &Arc<Self>, request: PermissionRequest, route: ReplyRoute) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let (pending, decision) = PendingPermission::new(request.clone());
            if shared.permissions.publish(pending) == 0 {
                warn!(session_id = %shared.session_id, tool = %request.tool_name, "no permission subscriber, request will be cancelled");
            }
            let outcome = tokio::select! {
                biased;
                () = shared.cancel.cancelled() => return,
                outcome = decision => outcome.unwrap_or(PermissionOutcome::Cancelled),
            };
            let frame = route.frame(permission_reply(&request, &outcome));
            if let Err(err) = shared.transport.send(frame) {
                debug!(session_id = %shared.session_id, error = %err, "could not send permission reply");
            }
        });
    }
}

/// One claude process and its single session.
pub struct ClaudeSession {
    shared: Arc<Shared>,
    turns: tokio::sync::Mutex<mpsc::UnboundedReceiver<StopReason>>,
    events: Primed<SessionNotification>,
    permissions: Primed<PendingPermission>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    next_control_id: AtomicU64,
    killed: AtomicBool,
}

impl ClaudeSession {
    fn start(
        session_id: String,
        transport: Arc<Transport>,
        process: ProcessHandle,
        mut frames: mpsc::UnboundedReceiver<Value>,
    ) -> Self {
        let shared = Arc::new(Shared {
            session_id,
            transport,
            process,
            updates: Hub::new(),
            permissions: Hub::new(),
            interrupted: AtomicBool::new(false),
            in_turn: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        let events = Primed::new(shared.updates.subscribe());
        let permissions = Primed::new(shared.permissions.subscribe());
        let (turn_tx, turn_rx) = mpsc::unbounded_channel();

        let task_shared = Arc::clone(&shared);
        let span = info_span!("claude_session", session_id = %shared.session_id);
        let dispatcher = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        biased;
                        () = task_shared.cancel.cancelled() => break,
                        next = frames.recv() => {
                            let Some(frame) = next else {
                                info!("agent output closed");
                                break;
                            };
                            task_shared.dispatch(&frame, &turn_tx);
                        }
                    }
                }
                task_shared.updates.close();
                task_shared.permissions.close();
            }
            .instrument(span),
        );

        Self {
            shared,
            turns: tokio::sync::Mutex::new(turn_rx),
            events,
            permissions,
            dispatcher: Mutex::new(Some(dispatcher)),
            next_control_id: AtomicU64::new(1),
            killed: AtomicBool::new(false),
        }
    }

    /// Handle of the claude process.
    #[must_use]
    pub fn process(&self) -> &ProcessHandle {
        &self.shared.process
    }

    async fn run_turn(&self, content: Vec<ContentBlock>) -> Result<StopReason> {
        if !self.is_active() {
            return Err(AppError::State(format!(
                "session '{}' is not active",
                self.shared.session_id
            )));
        }
        let mut turns = self.turns.lock().await;
        while turns.try_recv().is_ok() {}
        self.shared.interrupted.store(false, Ordering::Release);
        self.shared.in_turn.store(true, Ordering::Release);
        let reason = self.await_turn(&mut turns, content).await;
        self.shared.in_turn.store(false, Ordering::Release);
        reason
    }

    async fn await_turn(
        &self,
        turns: &mut mpsc::UnboundedReceiver<StopReason>,
        content: Vec<ContentBlock>,
    ) -> Result<StopReason> {
        self.shared.transport.send(json!({
            "type": "user",
            "message": { "role": "user", "content": content },
            "parent_tool_use_id": null,
            "session_id": self.shared.session_id,
        }))?;

        match turns.recv().await {
            Some(reason) => Ok(reason),
            None => {
                let exit = self.shared.process.try_exit().unwrap_or_default();
                Err(AppError::ProcessCrashed(format!(
                    "claude exited during turn ({exit})"
                )))
            }
        }
    }
}

impl AgentSession for ClaudeSession {
    fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    fn is_active(&self) -> bool {
        !self.killed.load(Ordering::Acquire) && self.shared.process.is_running()
    }

    fn events(&self) -> Subscription<SessionNotification> {
        self.events.take_or(|| self.shared.updates.subscribe())
    }

    fn permission_requests(&self) -> Subscription<PendingPermission> {
        self.permissions
            .take_or(|| self.shared.permissions.subscribe())
    }

    fn send_with_content(&self, content: Vec<ContentBlock>) -> BoxFuture<'_, Result<StopReason>> {
        Box::pin(self.run_turn(content))
    }

    fn interrupt(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let n = self.next_control_id.fetch_add(1, Ordering::Relaxed);
            if self.shared.in_turn.load(Ordering::Acquire) {
                self.shared.interrupted.store(true, Ordering::Release);
            }
            self.shared.transport.send(json!({
                "type": "control_request",
                "request_id": format!("interrupt-{n}"),
                "request": { "subtype": "interrupt" },
            }))?;
            info!(session_id = %self.shared.session_id, "interrupt sent");
            Ok(())
        })
    }

    fn kill(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.killed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.shared.cancel.cancel();
            self.shared.updates.close();
            self.shared.permissions.close();
            let dispatcher = self
                .dispatcher
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(task) = dispatcher {
                let _ = task.await;
            }
            self.shared.transport.close().await;
            let exit = self.shared.process.terminate(TERMINATE_GRACE).await;
            info!(session_id = %self.shared.session_id, %exit, "claude session killed");
        })
    }
}

impl Drop for ClaudeSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        self.shared.process.kill();
    }
}
