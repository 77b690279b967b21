//! Agent Client Protocol backend.
//!
//! Every session shares one agent process; [`SessionMux`] keeps their
//! updates and permission prompts apart.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    spawn_initial_prompt, AgentBackend, AgentSession, BoxFuture, Primed, SessionOptions,
    SessionRegistry,
};
use crate::config::{AgentConfig, ConnectionLimits};
use crate::connection::{AgentConnection, ProtocolDialect};
use crate::hub::Subscription;
use crate::mode::BackendKind;
use crate::permission::PendingPermission;
use crate::protocol::{
    methods, ContentBlock, InitializeParams, InitializeResult, NewSessionParams,
    NewSessionResult, PermissionOutcome, PermissionRequest, PermissionResponse,
    SessionNotification, StopReason,
};
use crate::rpc::{Notification, ServerRequest};
use crate::session::SessionMux;
use crate::{AppError, Result};

/// ACP wire mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcpDialect;

impl ProtocolDialect for AcpDialect {
    fn name(&self) -> &'static str {
        "acp"
    }

    fn initialize_params(&self) -> Value {
        serde_json::to_value(InitializeParams::default()).unwrap_or_else(|_| json!({}))
    }

    fn parse_initialize_result(&self, result: Value) -> Result<InitializeResult> {
        serde_json::from_value(result)
            .map_err(|e| AppError::Connection(format!("invalid initialize result: {e}")))
    }

    fn translate_notification(&self, notification: &Notification) -> Vec<SessionNotification> {
        if notification.method != methods::SESSION_UPDATE {
            debug!(method = %notification.method, "ignoring notification");
            return Vec::new();
        }
        match serde_json::from_value::<SessionNotification>(notification.params.clone()) {
            Ok(update) if !update.session_id.is_empty() => vec![update],
            Ok(_) => {
                warn!("session update without session id dropped");
                Vec::new()
            }
            Err(err) => {
                warn!(error = %err, "unparseable session update dropped");
                Vec::new()
            }
        }
    }

    fn permission_request(&self, request: &ServerRequest) -> Option<Result<PermissionRequest>> {
        (request.method == methods::SESSION_REQUEST_PERMISSION)
            .then(|| PermissionRequest::from_params(request.params.clone()))
    }

    fn permission_response(&self, _request: &PermissionRequest, outcome: &PermissionOutcome) -> Value {
        serde_json::to_value(PermissionResponse {
            outcome: outcome.clone(),
        })
        .unwrap_or_else(|_| json!({ "outcome": { "outcome": "cancelled" } }))
    }

    fn serves_client_ops(&self) -> bool {
        true
    }
}

/// Backend multiplexing ACP sessions over one process.
pub struct AcpBackend {
    connection: AgentConnection,
    sessions: SessionRegistry,
    connecting: tokio::sync::Mutex<()>,
}

impl AcpBackend {
    /// Backend for `agent`; the process starts with the first session.
    #[must_use]
    pub fn new(agent: AgentConfig, limits: ConnectionLimits) -> Self {
        Self {
            connection: AgentConnection::new(agent, Arc::new(AcpDialect), limits),
            sessions: SessionRegistry::default(),
            connecting: tokio::sync::Mutex::new(()),
        }
    }

    /// The shared connection.
    #[must_use]
    pub fn connection(&self) -> &AgentConnection {
        &self.connection
    }

    async fn ensure_connected(&self) -> Result<()> {
        let _serialised = self.connecting.lock().await;
        if self.connection.is_connected() {
            return Ok(());
        }
        self.connection.connect().await
    }

    async fn open(
        &self,
        prompt: Option<String>,
        cwd: PathBuf,
        options: SessionOptions,
    ) -> Result<Arc<dyn AgentSession>> {
        self.ensure_connected().await?;

        let params = serde_json::to_value(NewSessionParams {
            cwd,
            mcp_servers: options.mcp_servers,
        })
        .map_err(|e| AppError::Protocol(e.to_string()))?;
        let result = self.connection.request(methods::SESSION_NEW, params).await?;
        let created: NewSessionResult = serde_json::from_value(result)
            .map_err(|e| AppError::Protocol(format!("invalid session/new result: {e}")))?;

        let mux = SessionMux::new(created.session_id.clone(), &self.connection);
        let session = Arc::new(AcpSession::new(mux, self.connection.clone()));
        info!(session_id = %created.session_id, "acp session created");

        if let Some(mode_id) = options.mode_id {
            session.mux.set_mode(&mode_id).await?;
        }

        let session: Arc<dyn AgentSession> = session;
        self.sessions.insert(Arc::clone(&session));
        spawn_initial_prompt(Arc::clone(&session), prompt);
        Ok(session)
    }
}

impl AgentBackend for AcpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Acp
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
            self.connection.dispose().await;
        })
    }
}

/// One ACP session on the shared connection.
pub struct AcpSession {
    mux: SessionMux,
    connection: AgentConnection,
    events: Primed<SessionNotification>,
    permissions: Primed<PendingPermission>,
    killed: AtomicBool,
}

impl AcpSession {
    fn new(mux: SessionMux, connection: AgentConnection) -> Self {
        Self {
            events: Primed::new(mux.updates()),
            permissions: Primed::new(mux.permission_requests()),
            mux,
            connection,
            killed: AtomicBool::new(false),
        }
    }

    /// The session's multiplexed view.
    #[must_use]
    pub fn mux(&self) -> &SessionMux {
        &self.mux
    }
}

impl AgentSession for AcpSession {
    fn session_id(&self) -> &str {
        self.mux.session_id()
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
        Box::pin(self.mux.prompt(content))
    }

    fn interrupt(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.mux.cancel() })
    }

    fn kill(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.killed.swap(true, Ordering::AcqRel) {
                return;
            }
            if self.connection.is_connected() {
                if let Err(err) = self.mux.cancel() {
                    debug!(session_id = self.mux.session_id(), error = %err, "cancel on kill failed");
                }
            }
            self.mux.dispose();
        })
    }
}
