//! Per-session view over a shared connection.
//!
//! A [`SessionMux`] filters the connection-wide update and permission hubs
//! down to one session id and issues that session's prompt, cancel, and
//! mode requests. Disposing a session detaches only its own views; the
//! connection and its other sessions are untouched.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, info, info_span, Instrument};

use crate::connection::AgentConnection;
use crate::hub::{FilteredHub, Hub, Subscription};
use crate::permission::PendingPermission;
use crate::protocol::{
    methods, CancelParams, ContentBlock, PromptParams, PromptResult, SessionNotification,
    SetModeParams, StopReason,
};
use crate::{AppError, Result};

/// Updates and permissions for one session id.
pub struct SessionMux {
    session_id: String,
    connection: Option<AgentConnection>,
    updates: FilteredHub<SessionNotification>,
    permissions: FilteredHub<PendingPermission>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for SessionMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMux")
            .field("session_id", &self.session_id)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl SessionMux {
    /// Attach a session view to `connection`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, connection: &AgentConnection) -> Self {
        let mut mux = Self::detached(session_id, connection.updates(), connection.permissions());
        mux.connection = Some(connection.clone());
        mux
    }

    /// Attach a view to bare hubs, without a connection to send requests on.
    ///
    /// Requests on a detached session fail with [`AppError::State`].
    #[must_use]
    pub fn detached(
        session_id: impl Into<String>,
        updates: &Hub<SessionNotification>,
        permissions: &Hub<PendingPermission>,
    ) -> Self {
        let session_id = session_id.into();
        let update_id = session_id.clone();
        let permission_id = session_id.clone();
        Self {
            updates: FilteredHub::attach(updates, move |n: &SessionNotification| {
                n.session_id == update_id
            }),
            permissions: FilteredHub::attach(permissions, move |p: &PendingPermission| {
                p.session_id() == permission_id
            }),
            session_id,
            connection: None,
            disposed: AtomicBool::new(false),
        }
    }

    /// Session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether [`SessionMux::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Subscribe to this session's updates.
    #[must_use]
    pub fn updates(&self) -> Subscription<SessionNotification> {
        self.updates.subscribe()
    }

    /// Subscribe to this session's permission prompts.
    #[must_use]
    pub fn permission_requests(&self) -> Subscription<PendingPermission> {
        self.permissions.subscribe()
    }

    fn connection(&self) -> Result<&AgentConnection> {
        if self.is_disposed() {
            return Err(AppError::State(format!(
                "session '{}' has been disposed",
                self.session_id
            )));
        }
        self.connection.as_ref().ok_or_else(|| {
            AppError::State(format!("session '{}' has no connection", self.session_id))
        })
    }

    /// Send a prompt and wait for the turn to end.
    ///
    /// Turns can run for a long time, so no request timeout applies.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`] if the session is disposed or the
    /// connection is down, or the request's error.
    pub async fn prompt(&self, content: Vec<ContentBlock>) -> Result<StopReason> {
        let rpc = self.connection()?.rpc()?;
        let params = to_params(&PromptParams {
            session_id: self.session_id.clone(),
            prompt: content,
        })?;

        let span = info_span!("prompt", session_id = %self.session_id);
        let result = rpc
            .send_request_with_timeout(methods::SESSION_PROMPT, params, None)
            .instrument(span)
            .await?;
        let result: PromptResult = serde_json::from_value(result)
            .map_err(|e| AppError::Protocol(format!("invalid prompt result: {e}")))?;
        debug!(session_id = %self.session_id, stop_reason = ?result.stop_reason, "turn ended");
        Ok(result.stop_reason)
    }

    /// Ask the agent to stop the current turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`] if the session is disposed or the
    /// connection is down.
    pub fn cancel(&self) -> Result<()> {
        let rpc = self.connection()?.rpc()?;
        rpc.send_notification(
            methods::SESSION_CANCEL,
            to_params(&CancelParams {
                session_id: self.session_id.clone(),
            })?,
        )?;
        info!(session_id = %self.session_id, "cancel sent");
        Ok(())
    }

    /// Switch the session to one of its advertised modes.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`] if the session is disposed or the
    /// connection is down, or the request's error.
    pub async fn set_mode(&self, mode_id: &str) -> Result<()> {
        let connection = self.connection()?;
        connection
            .request(
                methods::SESSION_SET_MODE,
                to_params(&SetModeParams {
                    session_id: self.session_id.clone(),
                    mode_id: mode_id.to_owned(),
                })?,
            )
            .await?;
        info!(session_id = %self.session_id, mode_id, "mode set");
        Ok(())
    }

    /// Detach this session's views. Idempotent; the connection is untouched.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.updates.dispose();
        self.permissions.dispose();
        debug!(session_id = %self.session_id, "session disposed");
    }
}

impl Drop for SessionMux {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn to_params<T: serde::Serialize>(params: &T) -> Result<Value> {
    serde_json::to_value(params).map_err(|e| AppError::Protocol(e.to_string()))
}
