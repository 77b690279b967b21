//! Publish/subscribe hub with per-subscriber buffering.
//!
//! A [`Hub`] has one logical writer and any number of subscribers. Every
//! subscriber owns an unbounded queue, so a slow or absent reader never
//! blocks the publisher or its siblings, and nothing is dropped for lag
//! (unlike `tokio::sync::broadcast`, which discards on overflow).
//!
//! A [`FilteredHub`] decorates an upstream hub: it registers exactly one
//! relay upstream and re-publishes matching items to its own subscriber set.
//! Disposing it removes only that relay; the upstream hub is untouched.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

enum Sink<T> {
    Queue(mpsc::UnboundedSender<T>),
    Relay {
        predicate: Predicate<T>,
        downstream: Weak<Mutex<HubState<T>>>,
    },
}

struct HubState<T> {
    next_id: u64,
    sinks: HashMap<u64, Sink<T>>,
    /// Registration order; delivery walks this so relays keep arrival order.
    order: Vec<u64>,
    closed: bool,
}

impl<T> HubState<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            sinks: HashMap::new(),
            order: Vec::new(),
            closed: false,
        }
    }

    fn insert(&mut self, sink: Sink<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.sinks.insert(id, sink);
        self.order.push(id);
        id
    }

    fn remove(&mut self, id: u64) {
        if self.sinks.remove(&id).is_some() {
            self.order.retain(|existing| *existing != id);
        }
    }
}

fn lock<T>(state: &Mutex<HubState<T>>) -> MutexGuard<'_, HubState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn publish_into<T: Clone>(state: &Mutex<HubState<T>>, item: &T) -> usize {
    let mut guard = lock(state);
    if guard.closed {
        return 0;
    }

    let mut delivered = 0;
    let mut dead = Vec::new();
    for id in &guard.order {
        match guard.sinks.get(id) {
            Some(Sink::Queue(tx)) => {
                if tx.send(item.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
            Some(Sink::Relay {
                predicate,
                downstream,
            }) => match downstream.upgrade() {
                Some(downstream) => {
                    if predicate(item) {
                        delivered += publish_into(&downstream, item);
                    }
                }
                None => dead.push(*id),
            },
            None => {}
        }
    }

    for id in dead {
        guard.remove(id);
    }
    delivered
}

fn close_state<T>(state: &Mutex<HubState<T>>) {
    let sinks = {
        let mut guard = lock(state);
        if guard.closed {
            return;
        }
        guard.closed = true;
        guard.order.clear();
        std::mem::take(&mut guard.sinks)
    };

    // Dropping queue senders ends every subscription stream; relays cascade
    // the close so filtered views end too.
    for sink in sinks.into_values() {
        if let Sink::Relay { downstream, .. } = sink {
            if let Some(downstream) = downstream.upgrade() {
                close_state(&downstream);
            }
        }
    }
}

/// Multi-subscriber fan-out channel.
pub struct Hub<T> {
    state: Arc<Mutex<HubState<T>>>,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for Hub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = lock(&self.state);
        f.debug_struct("Hub")
            .field("sinks", &guard.sinks.len())
            .field("closed", &guard.closed)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Hub<T> {
    /// Create an open hub with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::new())),
        }
    }

    /// Register a new subscriber.
    ///
    /// Subscribing to a closed hub yields a subscription that is already at
    /// end-of-stream.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = lock(&self.state);
        let id = if guard.closed {
            drop(tx);
            None
        } else {
            Some(guard.insert(Sink::Queue(tx)))
        };
        drop(guard);

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.state),
        }
    }

    /// Deliver `item` to every live subscriber without blocking.
    ///
    /// Returns the number of queues the item reached.
    pub fn publish(&self, item: T) -> usize {
        publish_into(&self.state, &item)
    }

    /// Close the hub, ending every subscription. Idempotent.
    pub fn close(&self) {
        close_state(&self.state);
    }

    /// Whether [`Hub::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    /// Number of registered subscribers and relays.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).sinks.len()
    }
}

/// Receiving half of a hub registration.
///
/// Dropping or [`cancel`](Subscription::cancel)ling a subscription removes
/// only this subscriber; items already queued for other subscribers are
/// unaffected.
pub struct Subscription<T> {
    id: Option<u64>,
    rx: mpsc::UnboundedReceiver<T>,
    hub: Weak<Mutex<HubState<T>>>,
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl<T> Subscription<T> {
    /// Wait for the next item; `None` once the hub is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next queued item without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving. Equivalent to dropping the subscription.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let (Some(id), Some(state)) = (self.id, self.hub.upgrade()) {
            lock(&state).remove(id);
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Filtered view over an upstream [`Hub`].
pub struct FilteredHub<T> {
    hub: Hub<T>,
    upstream: Weak<Mutex<HubState<T>>>,
    relay_id: Mutex<Option<u64>>,
}

impl<T> std::fmt::Debug for FilteredHub<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilteredHub").field("hub", &self.hub).finish()
    }
}

impl<T: Clone + Send + 'static> FilteredHub<T> {
    /// Attach a relay to `upstream` that forwards items matching `predicate`.
    pub fn attach<F>(upstream: &Hub<T>, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let hub = Hub::new();
        let mut guard = lock(&upstream.state);
        let relay_id = if guard.closed {
            None
        } else {
            Some(guard.insert(Sink::Relay {
                predicate: Arc::new(predicate),
                downstream: Arc::downgrade(&hub.state),
            }))
        };
        drop(guard);

        if relay_id.is_none() {
            hub.close();
        }

        Self {
            hub,
            upstream: Arc::downgrade(&upstream.state),
            relay_id: Mutex::new(relay_id),
        }
    }

    /// Subscribe to the filtered items.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        self.hub.subscribe()
    }

    /// Number of subscribers on the filtered side.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// Detach from upstream and end every filtered subscription. Idempotent.
    pub fn dispose(&self) {
        let relay_id = self
            .relay_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(id), Some(upstream)) = (relay_id, self.upstream.upgrade()) {
            lock(&upstream).remove(id);
        }
        self.hub.close();
    }

    /// Whether the view has been disposed or its upstream closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.hub.is_closed()
    }
}

impl<T> Drop for FilteredHub<T> {
    fn drop(&mut self) {
        let relay_id = self
            .relay_id
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(id), Some(upstream)) = (relay_id, self.upstream.upgrade()) {
            lock(&upstream).remove(id);
        }
    }
}
