//! Single-resolution permission broker.
//!
//! A [`PendingPermission`] pairs a [`PermissionRequest`] with a oneshot
//! slot. The sender lives behind a mutex and is taken on the first
//! resolution, so `allow`/`cancel` race safely and only the first call
//! produces an outcome; later calls return `false` and do nothing.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::protocol::{PermissionOutcome, PermissionRequest};

struct Slot {
    sender: Option<oneshot::Sender<PermissionOutcome>>,
    outcome: Option<PermissionOutcome>,
}

struct Inner {
    request: PermissionRequest,
    slot: Mutex<Slot>,
}

/// One outstanding permission prompt.
///
/// Clones share the same slot; resolving any clone resolves them all.
#[derive(Clone)]
pub struct PendingPermission {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PendingPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingPermission")
            .field("session_id", &self.inner.request.session_id)
            .field("tool_name", &self.inner.request.tool_name)
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl PendingPermission {
    /// Create a pending permission and the receiver its protocol reply awaits.
    #[must_use]
    pub fn new(request: PermissionRequest) -> (Self, oneshot::Receiver<PermissionOutcome>) {
        let (tx, rx) = oneshot::channel();
        let pending = Self {
            inner: Arc::new(Inner {
                request,
                slot: Mutex::new(Slot {
                    sender: Some(tx),
                    outcome: None,
                }),
            }),
        };
        (pending, rx)
    }

    /// The originating request.
    #[must_use]
    pub fn request(&self) -> &PermissionRequest {
        &self.inner.request
    }

    /// Session the request belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.request.session_id
    }

    /// Resolve as `selected(option_id)`. Returns `false` if already resolved.
    pub fn allow(&self, option_id: impl Into<String>) -> bool {
        self.resolve(PermissionOutcome::selected(option_id))
    }

    /// Resolve as `cancelled`. Returns `false` if already resolved.
    pub fn cancel(&self) -> bool {
        self.resolve(PermissionOutcome::Cancelled)
    }

    /// Resolve with `outcome`. Only the first call has any effect.
    pub fn resolve(&self, outcome: PermissionOutcome) -> bool {
        let sender = {
            let mut slot = self
                .inner
                .slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(sender) = slot.sender.take() else {
                debug!(
                    session_id = %self.inner.request.session_id,
                    tool = %self.inner.request.tool_name,
                    "permission already resolved, ignoring"
                );
                return false;
            };
            slot.outcome = Some(outcome.clone());
            sender
        };

        if sender.send(outcome).is_err() {
            debug!(
                session_id = %self.inner.request.session_id,
                "permission resolved after its request was abandoned"
            );
        }
        true
    }

    /// Whether `allow` or `cancel` has been called.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.outcome().is_some()
    }

    /// The recorded outcome, once resolved.
    #[must_use]
    pub fn outcome(&self) -> Option<PermissionOutcome> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .outcome
            .clone()
    }
}
