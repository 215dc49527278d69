//! Type-routed message fan-out and lifecycle listener lists.
//!
//! Both registries hand out removal capabilities ([`SubscriptionHandle`],
//! [`ListenerHandle`]) keyed by a registration id, so removing one registration never
//! depends on closure identity.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::{DashMap, Entry};

use super::error::WsError;
use crate::error::Error;
use crate::types::{Message, WILDCARD};

/// Callback invoked for each routed message.
pub type Handler = Arc<dyn Fn(&Message) + Send + Sync>;
/// Callback invoked on open or close.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked on transport or handler errors.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

type RegistrationId = u64;

/// Maps message types to the handlers registered for them.
///
/// Handlers for one type keep their registration order. Empty entries are removed as
/// soon as their last handler goes away.
#[derive(Default)]
pub struct Router {
    next_id: AtomicU64,
    routes: DashMap<String, Vec<(RegistrationId, Handler)>>,
}

impl Router {
    pub(crate) fn insert(
        self: &Arc<Self>,
        msg_type: &str,
        handler: Handler,
    ) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes
            .entry(msg_type.to_owned())
            .or_default()
            .push((id, handler));

        #[cfg(feature = "tracing")]
        tracing::trace!(msg_type, id, "Registered subscription handler");

        SubscriptionHandle {
            router: Arc::downgrade(self),
            msg_type: msg_type.to_owned(),
            id,
        }
    }

    fn remove(&self, msg_type: &str, id: RegistrationId) -> bool {
        let Entry::Occupied(mut entry) = self.routes.entry(msg_type.to_owned()) else {
            return false;
        };

        let handlers = entry.get_mut();
        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            entry.remove();
        }

        removed
    }

    /// Handlers that should see `message`: exact-type handlers first, then wildcard handlers.
    ///
    /// The handlers are cloned out of the map so callbacks may subscribe or unsubscribe
    /// without deadlocking on the map's shard locks.
    fn matching(&self, message: &Message) -> Vec<Handler> {
        let mut handlers = Vec::new();
        if message.msg_type != WILDCARD
            && let Some(exact) = self.routes.get(&message.msg_type)
        {
            handlers.extend(exact.iter().map(|(_, handler)| Arc::clone(handler)));
        }
        if let Some(wildcard) = self.routes.get(WILDCARD) {
            handlers.extend(wildcard.iter().map(|(_, handler)| Arc::clone(handler)));
        }
        handlers
    }

    /// Invoke every matching handler.
    ///
    /// A panicking handler is isolated: the remaining handlers still run and the panic
    /// is returned as an error for the lifecycle emitter.
    pub(crate) fn dispatch(&self, message: &Message) -> Vec<Error> {
        let mut failures: Vec<Error> = Vec::new();
        for handler in self.matching(message) {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(msg_type = %message.msg_type, "Subscription handler panicked");
                failures.push(
                    WsError::HandlerPanicked {
                        msg_type: message.msg_type.clone(),
                    }
                    .into(),
                );
            }
        }
        failures
    }

    /// Number of handlers registered under exactly `msg_type`.
    #[must_use]
    pub fn handler_count(&self, msg_type: &str) -> usize {
        self.routes.get(msg_type).map_or(0, |handlers| handlers.len())
    }

    /// Number of distinct types (including the wildcard) with at least one handler.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.routes.len()
    }
}

/// Removes exactly one subscription.
///
/// Dropping the handle keeps the subscription alive; call [`unsubscribe`](Self::unsubscribe)
/// to remove it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    router: Weak<Router>,
    msg_type: String,
    id: RegistrationId,
}

impl SubscriptionHandle {
    /// Type this subscription was registered under.
    #[must_use]
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Remove the subscription. Returns `false` if it was already gone (for example
    /// because the client was dropped).
    #[expect(
        clippy::must_use_candidate,
        reason = "Callers usually unsubscribe for the side effect alone"
    )]
    pub fn unsubscribe(self) -> bool {
        self.router
            .upgrade()
            .is_some_and(|router| router.remove(&self.msg_type, self.id))
    }

    /// Convert into a guard that unsubscribes when dropped.
    #[must_use]
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard(Some(self))
    }
}

/// Unsubscribes on drop.
#[derive(Debug)]
pub struct SubscriptionGuard(Option<SubscriptionHandle>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.unsubscribe();
        }
    }
}

/// Lifecycle event a listener is registered for.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum LifecycleEvent {
    /// The connection opened
    Open,
    /// The connection closed, whether requested or not
    Close,
    /// A connection, transport or handler error occurred
    Error,
}

struct ListenerList<F: ?Sized> {
    entries: RwLock<Vec<(RegistrationId, Arc<F>)>>,
}

impl<F: ?Sized> Default for ListenerList<F> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<F: ?Sized> ListenerList<F> {
    // A poisoned lock still holds a consistent Vec: pushes and retains never leave it half-updated.
    fn push(&self, id: RegistrationId, callback: Arc<F>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback));
    }

    fn remove(&self, id: RegistrationId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(registered, _)| *registered != id);
        entries.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Open, close and error listeners.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    open: ListenerList<dyn Fn() + Send + Sync>,
    close: ListenerList<dyn Fn() + Send + Sync>,
    error: ListenerList<dyn Fn(&Error) + Send + Sync>,
}

impl Listeners {
    fn handle(self: &Arc<Self>, event: LifecycleEvent, id: RegistrationId) -> ListenerHandle {
        ListenerHandle {
            listeners: Arc::downgrade(self),
            event,
            id,
        }
    }

    fn next_id(&self) -> RegistrationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_open(self: &Arc<Self>, callback: LifecycleCallback) -> ListenerHandle {
        let id = self.next_id();
        self.open.push(id, callback);
        self.handle(LifecycleEvent::Open, id)
    }

    pub(crate) fn add_close(self: &Arc<Self>, callback: LifecycleCallback) -> ListenerHandle {
        let id = self.next_id();
        self.close.push(id, callback);
        self.handle(LifecycleEvent::Close, id)
    }

    pub(crate) fn add_error(self: &Arc<Self>, callback: ErrorCallback) -> ListenerHandle {
        let id = self.next_id();
        self.error.push(id, callback);
        self.handle(LifecycleEvent::Error, id)
    }

    pub(crate) fn emit_open(&self) {
        for callback in self.open.snapshot() {
            guard_listener(LifecycleEvent::Open, || callback());
        }
    }

    pub(crate) fn emit_close(&self) {
        for callback in self.close.snapshot() {
            guard_listener(LifecycleEvent::Close, || callback());
        }
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        for callback in self.error.snapshot() {
            guard_listener(LifecycleEvent::Error, || callback(error));
        }
    }

    /// Number of listeners registered for `event`.
    #[must_use]
    pub fn count(&self, event: LifecycleEvent) -> usize {
        match event {
            LifecycleEvent::Open => self.open.len(),
            LifecycleEvent::Close => self.close.len(),
            LifecycleEvent::Error => self.error.len(),
        }
    }
}

fn guard_listener<F: FnOnce()>(event: LifecycleEvent, callback: F) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(%event, "Lifecycle listener panicked");
        #[cfg(not(feature = "tracing"))]
        let _ = event;
    }
}

/// Removes exactly one lifecycle listener.
#[derive(Debug)]
pub struct ListenerHandle {
    listeners: Weak<Listeners>,
    event: LifecycleEvent,
    id: RegistrationId,
}

impl ListenerHandle {
    /// The lifecycle event this listener is registered for.
    #[must_use]
    pub fn event(&self) -> LifecycleEvent {
        self.event
    }

    /// Remove the listener. Returns `false` if it was already gone.
    #[expect(
        clippy::must_use_candidate,
        reason = "Callers usually remove listeners for the side effect alone"
    )]
    pub fn remove(self) -> bool {
        let Some(listeners) = self.listeners.upgrade() else {
            return false;
        };
        match self.event {
            LifecycleEvent::Open => listeners.open.remove(self.id),
            LifecycleEvent::Close => listeners.close.remove(self.id),
            LifecycleEvent::Error => listeners.error.remove(self.id),
        }
    }
}
