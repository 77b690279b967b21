//! Supervised agent connection.
//!
//! An [`AgentConnection`] owns one agent process together with its
//! [`Transport`] and [`RpcClient`]. It runs the `initialize` handshake,
//! tracks a [`ConnectionState`] machine, and republishes inbound traffic on
//! connection-wide hubs:
//!
//! - `updates`: translated [`SessionNotification`]s.
//! - `permissions`: [`PendingPermission`]s awaiting a human decision.
//! - `notifications`: raw notifications, for dialects that need them.
//!
//! Teardown order is fixed: close the hubs, cancel forwarding, dispose the
//! RPC client, kill the process, then await its exit.

pub mod dialect;
pub mod spawner;
pub mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

pub use dialect::ProtocolDialect;
pub use spawner::{ExitInfo, ProcessHandle, SpawnSpec};
pub use state::ConnectionState;

use crate::client_ops::{self, ClientOps};
use crate::config::{AgentConfig, ConnectionLimits};
use crate::hub::{Hub, Subscription};
use crate::permission::PendingPermission;
use crate::protocol::{methods, AuthenticateParams, InitializeResult, PermissionOutcome, SessionNotification};
use crate::rpc::message::codes;
use crate::rpc::{Notification, RpcClient, ServerRequest};
use crate::transport::stderr::StderrLog;
use crate::transport::Transport;
use crate::{AppError, Result};

/// Stderr lines appended to handshake failure messages.
const STDERR_TAIL: usize = 5;

/// Grace period between SIGTERM and SIGKILL on teardown.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Resources that exist only while a process is running.
struct Live {
    rpc: RpcClient,
    transport: Arc<Transport>,
    process: ProcessHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Live {
    async fn shutdown(self, label: &str) {
        self.cancel.cancel();
        for task in self.tasks {
            task.abort();
            let _ = task.await;
        }
        self.rpc.dispose().await;
        self.transport.close().await;
        let exit = self.process.terminate(TERMINATE_GRACE).await;
        debug!(agent = label, %exit, "connection resources released");
    }
}

#[derive(Default)]
struct Cell {
    state: ConnectionState,
    last_error: Option<AppError>,
    initialize_result: Option<InitializeResult>,
    rpc: Option<RpcClient>,
    stderr: Option<Arc<StderrLog>>,
    process: Option<ProcessHandle>,
    generation: u64,
    attempt: Option<CancellationToken>,
    disposed: bool,
}

struct Inner {
    agent: AgentConfig,
    dialect: Arc<dyn ProtocolDialect>,
    limits: ConnectionLimits,
    cwd: Option<PathBuf>,
    client_ops: Option<Arc<ClientOps>>,
    cell: Mutex<Cell>,
    states: Hub<ConnectionState>,
    updates: Hub<SessionNotification>,
    permissions: Hub<PendingPermission>,
    notifications: Hub<Notification>,
    live: tokio::sync::Mutex<Option<Live>>,
}

impl Inner {
    fn cell(&self) -> MutexGuard<'_, Cell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a transition under the cell lock and notify observers.
    fn set_state(&self, cell: &mut Cell, next: ConnectionState, error: Option<AppError>) -> bool {
        if !cell.state.can_transition_to(next) {
            debug!(agent_id = %self.agent.id, from = %cell.state, to = %next, "ignoring invalid transition");
            return false;
        }
        info!(agent_id = %self.agent.id, from = %cell.state, to = %next, "connection state changed");
        cell.state = next;
        cell.last_error = error;
        self.states.publish(next);
        true
    }

    fn on_process_exit(&self, generation: u64, exit: ExitInfo, rpc: &RpcClient) {
        let err = AppError::ProcessCrashed(format!("agent exited unexpectedly ({exit})"));
        let failed = rpc.fail_all_pending(&err);

        let mut cell = self.cell();
        if cell.generation != generation || cell.state != ConnectionState::Connected {
            return;
        }
        warn!(agent_id = %self.agent.id, %exit, failed, "agent process exited");
        cell.rpc = None;
        self.set_state(&mut cell, ConnectionState::Error, Some(err));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(live) = self.live.get_mut().take() {
            live.cancel.cancel();
            live.process.kill();
        }
    }
}

/// Handle to one supervised agent process.
///
/// Clones share the same process and hubs.
#[derive(Clone)]
pub struct AgentConnection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("agent_id", &self.inner.agent.id)
            .field("dialect", &self.inner.dialect.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AgentConnection {
    /// Create a disconnected connection for `agent`.
    #[must_use]
    pub fn new(
        agent: AgentConfig,
        dialect: Arc<dyn ProtocolDialect>,
        limits: ConnectionLimits,
    ) -> Self {
        Self::build(agent, dialect, limits, None)
    }

    /// Create a disconnected connection whose process starts in `cwd`.
    #[must_use]
    pub fn with_cwd(
        agent: AgentConfig,
        dialect: Arc<dyn ProtocolDialect>,
        limits: ConnectionLimits,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self::build(agent, dialect, limits, Some(cwd.into()))
    }

    fn build(
        agent: AgentConfig,
        dialect: Arc<dyn ProtocolDialect>,
        limits: ConnectionLimits,
        cwd: Option<PathBuf>,
    ) -> Self {
        let client_ops = dialect.serves_client_ops().then(|| Arc::new(ClientOps::new()));
        Self {
            inner: Arc::new(Inner {
                agent,
                dialect,
                limits,
                cwd,
                client_ops,
                cell: Mutex::new(Cell::default()),
                states: Hub::new(),
                updates: Hub::new(),
                permissions: Hub::new(),
                notifications: Hub::new(),
                live: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Agent configuration this connection launches.
    #[must_use]
    pub fn agent(&self) -> &AgentConfig {
        &self.inner.agent
    }

    /// Dialect name, e.g. `acp`.
    #[must_use]
    pub fn dialect_name(&self) -> &'static str {
        self.inner.dialect.name()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.cell().state
    }

    /// Cause of the most recent failure; cleared by a new connect attempt
    /// and by `disconnect`.
    #[must_use]
    pub fn last_error(&self) -> Option<AppError> {
        self.inner.cell().last_error.clone()
    }

    /// Whether the handshake has completed and the process is alive.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Result of the most recent successful handshake.
    #[must_use]
    pub fn initialize_result(&self) -> Option<InitializeResult> {
        self.inner.cell().initialize_result.clone()
    }

    /// Diagnostic log of the current (or last) process.
    #[must_use]
    pub fn stderr(&self) -> Option<Arc<StderrLog>> {
        self.inner.cell().stderr.clone()
    }

    /// Handle of the current (or last) process.
    #[must_use]
    pub fn process(&self) -> Option<ProcessHandle> {
        self.inner.cell().process.clone()
    }

    /// Client-side file and terminal service, if this dialect uses one.
    #[must_use]
    pub fn client_ops(&self) -> Option<Arc<ClientOps>> {
        self.inner.client_ops.clone()
    }

    /// Observe state transitions from now on.
    #[must_use]
    pub fn state_changes(&self) -> Subscription<ConnectionState> {
        self.inner.states.subscribe()
    }

    /// Connection-wide session update hub.
    #[must_use]
    pub fn updates(&self) -> &Hub<SessionNotification> {
        &self.inner.updates
    }

    /// Connection-wide permission prompt hub.
    #[must_use]
    pub fn permissions(&self) -> &Hub<PendingPermission> {
        &self.inner.permissions
    }

    /// Subscribe to raw inbound notifications.
    #[must_use]
    pub fn notifications(&self) -> Subscription<Notification> {
        self.inner.notifications.subscribe()
    }

    /// RPC client of the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`] unless connected.
    pub fn rpc(&self) -> Result<RpcClient> {
        let cell = self.inner.cell();
        match (&cell.rpc, cell.state) {
            (Some(rpc), ConnectionState::Connected) => Ok(rpc.clone()),
            (_, state) => Err(AppError::State(format!(
                "agent '{}' is not connected ({state})",
                self.inner.agent.id
            ))),
        }
    }

    /// Send a request on the live connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`] unless connected, or the request's error.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.rpc()?.send_request(method, params).await
    }

    /// Authenticate with one of the advertised methods.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the agent did not advertise
    /// `method_id`, or the request's error.
    pub async fn authenticate(&self, method_id: &str) -> Result<()> {
        let advertised = self
            .initialize_result()
            .is_some_and(|init| init.auth_methods.iter().any(|m| m.id == method_id));
        if !advertised {
            return Err(AppError::NotFound(format!(
                "auth method '{method_id}' not advertised by agent"
            )));
        }

        let params = serde_json::to_value(AuthenticateParams {
            method_id: method_id.to_owned(),
        })
        .map_err(|e| AppError::Protocol(e.to_string()))?;
        self.request(methods::AUTHENTICATE, params).await?;
        info!(agent_id = %self.inner.agent.id, method_id, "authenticated");
        Ok(())
    }

    /// Spawn the agent and run the handshake.
    ///
    /// # Errors
    ///
    /// - [`AppError::State`] if already connecting, connected, or disposed.
    /// - [`AppError::Connection`] if the spawn fails, the process exits
    ///   during the handshake, or the agent rejects `initialize`.
    /// - [`AppError::Timeout`] if the handshake exceeds its bound.
    pub async fn connect(&self) -> Result<()> {
        let span = info_span!("connect", agent_id = %self.inner.agent.id, dialect = self.inner.dialect.name());
        self.connect_inner().instrument(span).await
    }

    async fn connect_inner(&self) -> Result<()> {
        let inner = &self.inner;
        let attempt = CancellationToken::new();

        let generation = {
            let mut cell = inner.cell();
            if cell.disposed {
                return Err(AppError::State("connection has been disposed".into()));
            }
            if !cell.state.can_connect() {
                return Err(AppError::State(format!(
                    "cannot connect while {}",
                    cell.state
                )));
            }
            cell.generation += 1;
            cell.attempt = Some(attempt.clone());
            cell.initialize_result = None;
            inner.set_state(&mut cell, ConnectionState::Connecting, None);
            cell.generation
        };

        // A retry after a crash still holds the dead process's resources.
        if let Some(stale) = inner.live.lock().await.take() {
            stale.shutdown(&inner.agent.id).await;
        }

        match self.establish(generation, &attempt).await {
            Ok(live) => self.commit(generation, live).await,
            Err(err) => {
                let mut cell = inner.cell();
                if cell.generation == generation && cell.state == ConnectionState::Connecting {
                    warn!(agent_id = %inner.agent.id, error = %err, "connect failed");
                    cell.attempt = None;
                    inner.set_state(&mut cell, ConnectionState::Error, Some(err.clone()));
                }
                Err(err)
            }
        }
    }

    async fn establish(&self, generation: u64, attempt: &CancellationToken) -> Result<Live> {
        let inner = &self.inner;
        let dialect = &inner.dialect;
        let label = inner.agent.id.clone();

        let program = inner.agent.executable(dialect.executable_override_var());
        let launch_args = dialect.launch_args();
        let launch_refs: Vec<&str> = launch_args.iter().map(String::as_str).collect();
        let mut spec = SpawnSpec::for_agent(&inner.agent, program, &launch_refs);
        spec.cwd.clone_from(&inner.cwd);

        let process = spawner::spawn_agent(&label, &spec)?;
        let handle = process.handle.clone();
        let transport = Arc::new(Transport::start(
            label.clone(),
            process.stdout,
            process.stdin,
            Some(process.stderr),
            inner.limits.stderr_line_cap,
        ));

        {
            let mut cell = inner.cell();
            cell.stderr = Some(transport.stderr());
            cell.process = Some(handle.clone());
        }

        let rpc = match RpcClient::new(Arc::clone(&transport), inner.limits.request_timeout) {
            Ok(rpc) => rpc,
            Err(err) => {
                transport.close().await;
                handle.kill();
                return Err(err);
            }
        };
        let notifications = rpc.notifications();
        let server_requests = rpc.server_requests();
        rpc.listen();

        let handshake = async {
            let timeout = inner.limits.initialize_timeout;
            let request =
                rpc.send_request_with_timeout(methods::INITIALIZE, dialect.initialize_params(), None);
            tokio::select! {
                biased;
                () = attempt.cancelled() => Err(AppError::State("connect aborted by disconnect".into())),
                outcome = tokio::time::timeout(timeout, request) => match outcome {
                    Ok(Ok(result)) => dialect.parse_initialize_result(result),
                    Ok(Err(AppError::Rpc { code, message })) => Err(AppError::Connection(format!(
                        "agent rejected initialize ({code}): {message}"
                    ))),
                    Ok(Err(AppError::ProcessCrashed(message))) => Err(AppError::Connection(message)),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(AppError::Timeout(format!(
                        "initialize did not complete within {timeout:?}"
                    ))),
                },
                exit = handle.wait_for_exit() => Err(AppError::Connection(format!(
                    "agent exited during handshake ({exit})"
                ))),
            }
        };

        let init = match handshake.await {
            Ok(init) => init,
            Err(err) => {
                let err = with_stderr_tail(err, &transport.stderr());
                let live = Live {
                    rpc,
                    transport,
                    process: handle,
                    cancel: CancellationToken::new(),
                    tasks: Vec::new(),
                };
                live.shutdown(&label).await;
                return Err(err);
            }
        };

        if let Some((method, params)) = dialect.initialized_notification() {
            rpc.send_notification(method, params)?;
        }

        info!(
            agent_id = %label,
            agent = init.agent_info.as_ref().map_or("", |a| a.name.as_str()),
            auth_methods = init.auth_methods.len(),
            "handshake complete"
        );
        inner.cell().initialize_result = Some(init);

        let cancel = CancellationToken::new();
        let tasks = vec![
            self.spawn_notification_forwarder(notifications, cancel.clone()),
            self.spawn_request_dispatcher(server_requests, rpc.clone(), cancel.clone()),
            spawn_exit_watcher(
                Arc::downgrade(&self.inner),
                generation,
                handle.clone(),
                rpc.clone(),
                cancel.clone(),
            ),
        ];

        Ok(Live {
            rpc,
            transport,
            process: handle,
            cancel,
            tasks,
        })
    }

    async fn commit(&self, generation: u64, live: Live) -> Result<()> {
        let inner = &self.inner;
        let mut slot = inner.live.lock().await;
        let outcome = {
            let mut cell = inner.cell();
            let current = cell.generation == generation
                && cell.state == ConnectionState::Connecting
                && !cell.disposed;
            if !current {
                Err(AppError::State("connection closed during handshake".into()))
            } else if let Some(exit) = live.process.try_exit() {
                // The exit watcher ignores exits seen while still connecting.
                let err = AppError::ProcessCrashed(format!(
                    "agent exited right after the handshake ({exit})"
                ));
                warn!(agent_id = %inner.agent.id, %exit, "agent exited before connect completed");
                cell.attempt = None;
                inner.set_state(&mut cell, ConnectionState::Error, Some(err.clone()));
                Err(err)
            } else {
                cell.attempt = None;
                cell.rpc = Some(live.rpc.clone());
                inner.set_state(&mut cell, ConnectionState::Connected, None);
                Ok(())
            }
        };

        if outcome.is_ok() {
            *slot = Some(live);
        } else {
            drop(slot);
            live.shutdown(&inner.agent.id).await;
        }
        outcome
    }

    fn spawn_notification_forwarder(
        &self,
        mut notifications: Subscription<Notification>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dialect = Arc::clone(&self.inner.dialect);
        let raw = self.inner.notifications.clone();
        let updates = self.inner.updates.clone();
        let label = self.inner.agent.id.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = notifications.recv() => {
                        let Some(notification) = next else { break };
                        for update in dialect.translate_notification(&notification) {
                            updates.publish(update);
                        }
                        raw.publish(notification);
                    }
                }
            }
            debug!(agent_id = %label, "notification forwarding stopped");
        })
    }

    fn spawn_request_dispatcher(
        &self,
        mut requests: Subscription<ServerRequest>,
        rpc: RpcClient,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let dialect = Arc::clone(&self.inner.dialect);
        let permissions = self.inner.permissions.clone();
        let client_ops = self.inner.client_ops.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    next = requests.recv() => {
                        let Some(request) = next else { break };
                        let rpc = rpc.clone();
                        let cancel = cancel.clone();
                        let dialect = Arc::clone(&dialect);
                        let permissions = permissions.clone();
                        let client_ops = client_ops.clone();
                        tokio::spawn(async move {
                            serve_request(request, rpc, dialect, permissions, client_ops, cancel).await;
                        });
                    }
                }
            }
        })
    }

    /// Tear down the process and return to `disconnected` with no error.
    ///
    /// Safe to call at any time and any number of times.
    pub async fn disconnect(&self) {
        {
            let mut cell = self.inner.cell();
            cell.generation += 1;
            if let Some(attempt) = cell.attempt.take() {
                attempt.cancel();
            }
            cell.rpc = None;
            if cell.state != ConnectionState::Disconnected {
                self.inner
                    .set_state(&mut cell, ConnectionState::Disconnected, None);
            }
            cell.last_error = None;
        }

        let live = self.inner.live.lock().await.take();
        if let Some(live) = live {
            info!(agent_id = %self.inner.agent.id, "disconnecting");
            live.shutdown(&self.inner.agent.id).await;
        }
        if let Some(ops) = &self.inner.client_ops {
            ops.terminals().release_all();
        }
    }

    /// Close every hub and tear down the process. Idempotent.
    ///
    /// After disposal `connect` fails with [`AppError::State`] and new
    /// subscriptions end immediately.
    pub async fn dispose(&self) {
        let span = info_span!("dispose", agent_id = %self.inner.agent.id);
        async {
            {
                let mut cell = self.inner.cell();
                if cell.disposed {
                    return;
                }
                cell.disposed = true;
                cell.generation += 1;
                if let Some(attempt) = cell.attempt.take() {
                    attempt.cancel();
                }
                cell.rpc = None;
                if cell.state != ConnectionState::Disconnected {
                    self.inner
                        .set_state(&mut cell, ConnectionState::Disconnected, None);
                }
                cell.last_error = None;
            }

            self.inner.updates.close();
            self.inner.permissions.close();
            self.inner.notifications.close();

            let live = self.inner.live.lock().await.take();
            if let Some(live) = live {
                live.shutdown(&self.inner.agent.id).await;
            }
            if let Some(ops) = &self.inner.client_ops {
                ops.terminals().release_all();
            }

            self.inner.states.close();
            info!("connection disposed");
        }
        .instrument(span)
        .await;
    }
}

fn spawn_exit_watcher(
    inner: Weak<Inner>,
    generation: u64,
    process: ProcessHandle,
    rpc: RpcClient,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            exit = process.wait_for_exit() => {
                if let Some(inner) = inner.upgrade() {
                    inner.on_process_exit(generation, exit, &rpc);
                }
            }
        }
    })
}

async fn serve_request(
    request: ServerRequest,
    rpc: RpcClient,
    dialect: Arc<dyn ProtocolDialect>,
    permissions: Hub<PendingPermission>,
    client_ops: Option<Arc<ClientOps>>,
    cancel: CancellationToken,
) {
    let reply = if let Some(parsed) = dialect.permission_request(&request) {
        match parsed {
            Ok(permission) => {
                let (pending, decision) = PendingPermission::new(permission.clone());
                if permissions.publish(pending) == 0 {
                    warn!(session_id = %permission.session_id, tool = %permission.tool_name, "no permission subscriber, request will be cancelled");
                }
                let outcome = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    outcome = decision => outcome.unwrap_or_else(|_| {
                        warn!(session_id = %permission.session_id, tool = %permission.tool_name, "permission dropped unresolved, cancelling");
                        PermissionOutcome::Cancelled
                    }),
                };
                debug!(session_id = %permission.session_id, ?outcome, "permission resolved");
                Ok(dialect.permission_response(&permission, &outcome))
            }
            Err(err) => Err(err),
        }
    } else if let Some(ops) = client_ops.filter(|_| ClientOps::handles(&request.method)) {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            result = ops.handle(&request.method, request.params.clone()) => result,
        }
    } else {
        Err(AppError::Rpc {
            code: codes::METHOD_NOT_FOUND,
            message: format!("method not found: {}", request.method),
        })
    };

    let sent = match reply {
        Ok(result) => rpc.send_response(&request.id, result),
        Err(err) => {
            debug!(method = %request.method, error = %err, "server request failed");
            let message = match &err {
                AppError::Rpc { message, .. } => message.clone(),
                other => other.to_string(),
            };
            rpc.send_error(&request.id, client_ops::error_code(&err), &message)
        }
    };
    if let Err(err) = sent {
        debug!(method = %request.method, error = %err, "could not reply to server request");
    }
}

fn with_stderr_tail(err: AppError, stderr: &StderrLog) -> AppError {
    let AppError::Connection(message) = err else {
        return err;
    };
    let tail: Vec<String> = stderr
        .recent(STDERR_TAIL)
        .into_iter()
        .map(|line| line.text)
        .collect();
    if tail.is_empty() {
        AppError::Connection(message)
    } else {
        AppError::Connection(format!("{message}; stderr: {}", tail.join(" | ")))
    }
}

/// Params object carrying only a session id.
#[must_use]
pub fn session_params(session_id: &str) -> Value {
    json!({ "sessionId": session_id })
}
