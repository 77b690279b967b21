//! Request/response correlation over a [`Transport`].
//!
//! Outbound requests get a fresh id from an atomic counter and park a
//! oneshot sender in the pending table. The dispatch task classifies every
//! inbound frame: responses resolve their pending slot, requests and
//! notifications are published on their hubs.
//!
//! The pending table and the "closed" cause share one lock, so a request
//! registered after the connection failed is rejected instead of parked
//! forever.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hub::{Hub, Subscription};
use crate::rpc::message::{
    classify, codes, error_frame, notification_frame, request_frame, response_frame, Incoming,
    Notification, RequestId, ServerRequest,
};
use crate::transport::Transport;
use crate::{AppError, Result};

/// One in-flight outbound request.
struct PendingRequest {
    method: String,
    resolve: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    requests: HashMap<u64, PendingRequest>,
    closed: Option<AppError>,
}

struct Inner {
    label: String,
    transport: Arc<Transport>,
    next_id: AtomicU64,
    table: Mutex<PendingTable>,
    notifications: Hub<Notification>,
    server_requests: Hub<ServerRequest>,
    default_timeout: Option<Duration>,
    cancel: CancellationToken,
    frames: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self, id: u64) -> Option<PendingRequest> {
        self.table().requests.remove(&id)
    }

    fn fail_all(&self, err: &AppError) -> usize {
        let drained: Vec<(u64, PendingRequest)> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(err.clone());
            }
            table.requests.drain().collect()
        };

        let count = drained.len();
        for (id, pending) in drained {
            debug!(agent = %self.label, request_id = id, method = %pending.method, "failing in-flight request");
            let _ = pending.resolve.send(Err(err.clone()));
        }
        count
    }

    fn dispatch(&self, frame: Value) {
        match classify(frame) {
            Incoming::Response { id, outcome } => {
                let Some(pending) = id.as_local().and_then(|key| self.take_pending(key)) else {
                    warn!(agent = %self.label, request_id = %id, "response for unknown or expired request dropped");
                    return;
                };
                debug!(agent = %self.label, request_id = %id, method = %pending.method, "response received");
                let _ = pending.resolve.send(outcome.map_err(AppError::from));
            }
            Incoming::Request(request) => {
                debug!(agent = %self.label, request_id = %request.id, method = %request.method, "server request received");
                if self.server_requests.publish(request.clone()) == 0 {
                    warn!(agent = %self.label, method = %request.method, "no handler for server request");
                    let frame = error_frame(
                        &request.id,
                        codes::METHOD_NOT_FOUND,
                        &format!("method not found: {}", request.method),
                    );
                    if let Err(e) = self.transport.send(frame) {
                        debug!(agent = %self.label, error = %e, "failed to reject server request");
                    }
                }
            }
            Incoming::Notification(notification) => {
                debug!(agent = %self.label, method = %notification.method, "notification received");
                self.notifications.publish(notification);
            }
            Incoming::Invalid(frame) => {
                warn!(agent = %self.label, %frame, "frame is neither request, response, nor notification");
            }
        }
    }
}

/// JSON-RPC client bound to one connection.
///
/// Cloning shares the same pending table and hubs.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("label", &self.inner.label)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Bind a client to `transport`. Nothing is dispatched until
    /// [`RpcClient::listen`] is called, so subscriptions taken in between
    /// observe every inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::State`] if the transport's frames were already
    /// taken by another client.
    pub fn new(transport: Arc<Transport>, default_timeout: Option<Duration>) -> Result<Self> {
        let frames = transport
            .take_frames()
            .ok_or_else(|| AppError::State("transport frames already consumed".into()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                label: transport.label().to_owned(),
                transport,
                next_id: AtomicU64::new(1),
                table: Mutex::new(PendingTable::default()),
                notifications: Hub::new(),
                server_requests: Hub::new(),
                default_timeout,
                cancel: CancellationToken::new(),
                frames: Mutex::new(Some(frames)),
                dispatch: Mutex::new(None),
            }),
        })
    }

    /// Start dispatching inbound frames. Later calls are no-ops.
    pub fn listen(&self) {
        let Some(mut frames) = self
            .inner
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = inner.cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => inner.dispatch(frame),
                        None => {
                            debug!(agent = %inner.label, "inbound stream ended");
                            inner.fail_all(&AppError::ProcessCrashed(
                                "agent closed its output stream".into(),
                            ));
                            break;
                        }
                    },
                }
            }
            inner.notifications.close();
            inner.server_requests.close();
        });

        *self
            .inner
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Send a request bounded by the client's default timeout.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::send_request_with_timeout`].
    pub async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        self.send_request_with_timeout(method, params, self.inner.default_timeout)
            .await
    }

    /// Send a request and wait for its response.
    ///
    /// A timed-out request is removed from the pending table, so a late
    /// response is logged and discarded.
    ///
    /// # Errors
    ///
    /// - [`AppError::Rpc`] if the agent answers with an error.
    /// - [`AppError::Timeout`] if `timeout` elapses first.
    /// - The connection's failure cause if it failed before or during the wait.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut table = self.inner.table();
            if let Some(err) = table.closed.clone() {
                return Err(err);
            }
            table.requests.insert(
                id,
                PendingRequest {
                    method: method.to_owned(),
                    resolve: tx,
                },
            );
        }

        debug!(agent = %self.inner.label, request_id = id, method, "sending request");
        if let Err(e) = self.inner.transport.send(request_frame(id, method, params)) {
            self.inner.take_pending(id);
            return Err(e);
        }

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.inner.take_pending(id);
                    warn!(agent = %self.inner.label, request_id = id, method, "request timed out");
                    return Err(AppError::Timeout(format!(
                        "request '{method}' timed out after {limit:?}"
                    )));
                }
            },
            None => rx.await,
        };

        received.unwrap_or_else(|_| {
            Err(AppError::Connection(format!(
                "request '{method}' was abandoned"
            )))
        })
    }

    /// Send a notification. Returns once it is queued.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] if the transport is closed.
    pub fn send_notification(&self, method: &str, params: Value) -> Result<()> {
        debug!(agent = %self.inner.label, method, "sending notification");
        self.inner
            .transport
            .send(notification_frame(method, params))
    }

    /// Answer a server request with a result.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] if the transport is closed.
    pub fn send_response(&self, id: &RequestId, result: Value) -> Result<()> {
        self.inner.transport.send(response_frame(id, result))
    }

    /// Answer a server request with an error.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`] if the transport is closed.
    pub fn send_error(&self, id: &RequestId, code: i64, message: &str) -> Result<()> {
        self.inner.transport.send(error_frame(id, code, message))
    }

    /// Subscribe to inbound notifications.
    #[must_use]
    pub fn notifications(&self) -> Subscription<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Subscribe to inbound server requests.
    ///
    /// While no subscriber exists, server requests are rejected with
    /// method-not-found.
    #[must_use]
    pub fn server_requests(&self) -> Subscription<ServerRequest> {
        self.inner.server_requests.subscribe()
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.table().requests.len()
    }

    /// Fail every in-flight request with `err` and reject future ones.
    ///
    /// Returns the number of requests failed.
    pub fn fail_all_pending(&self, err: &AppError) -> usize {
        self.inner.fail_all(err)
    }

    /// Stop dispatching and fail in-flight requests. Idempotent.
    pub async fn dispose(&self) {
        self.inner.cancel.cancel();
        self.inner
            .fail_all(&AppError::Connection("connection closed".into()));
        self.inner.notifications.close();
        self.inner.server_requests.close();

        let handle = self
            .inner
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(agent = %self.inner.label, error = %e, "dispatch task join failed");
            }
        }
    }
}
