//! Typed synchronous fan-out notifier.
//!
//! A small observer primitive: listeners are invoked in registration order
//! on the caller's thread, their return values are discarded, and a panic
//! in one listener neither skips the remaining listeners nor reaches the
//! caller. The HTTP event store uses this to publish resumable event ids.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

/// Listener callback for an [`EventNotifier`].
pub type EventListener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handler receiving panics swallowed during fan-out.
pub type NotifierErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

struct NotifierInner<T> {
    listeners: Vec<(u64, EventListener<T>)>,
    on_error: Option<NotifierErrorHandler>,
    next_id: u64,
    closed: bool,
}

/// Typed publish/subscribe with synchronous, ordered fan-out and no
/// back-pressure.
pub struct EventNotifier<T> {
    inner: Arc<Mutex<NotifierInner<T>>>,
}

impl<T> Default for EventNotifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for EventNotifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("notifier lock poisoned");
        f.debug_struct("EventNotifier")
            .field("listeners", &inner.listeners.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> EventNotifier<T> {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NotifierInner {
                listeners: Vec::new(),
                on_error: None,
                next_id: 0,
                closed: false,
            })),
        }
    }

    /// Register a listener. The returned subscription unregisters it on
    /// [`NotifierSubscription::close`] (dropping the subscription does not).
    pub fn on_event(
        &self,
        listener: impl Fn(&T) + Send + Sync + 'static,
    ) -> NotifierSubscription<T> {
        let mut inner = self.inner.lock().expect("notifier lock poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        if !inner.closed {
            inner.listeners.push((id, Arc::new(listener)));
        }
        NotifierSubscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Set the handler that receives swallowed listener panics. Replaces
    /// any previous handler.
    pub fn set_on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        let mut inner = self.inner.lock().expect("notifier lock poisoned");
        if !inner.closed {
            inner.on_error = Some(Arc::new(handler));
        }
    }

    /// Invoke every listener with `event`, in registration order.
    pub fn notify(&self, event: &T) {
        let (listeners, on_error) = {
            let inner = self.inner.lock().expect("notifier lock poisoned");
            if inner.closed || inner.listeners.is_empty() {
                return;
            }
            (inner.listeners.clone(), inner.on_error.clone())
        };
        for (_, listener) in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                let detail = panic
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .or_else(|| panic.downcast_ref::<&str>().copied())
                    .unwrap_or("listener panicked");
                if let Some(handler) = &on_error {
                    handler(detail);
                }
            }
        }
    }

    /// Like [`notify`](Self::notify), but the event is only built when at
    /// least one listener is registered.
    pub fn notify_with(&self, make_event: impl FnOnce() -> T) {
        let has_listeners = {
            let inner = self.inner.lock().expect("notifier lock poisoned");
            !inner.closed && !inner.listeners.is_empty()
        };
        if has_listeners {
            self.notify(&make_event());
        }
    }

    /// Drop all listeners and the error handler; further registrations are
    /// ignored.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("notifier lock poisoned");
        inner.listeners.clear();
        inner.on_error = None;
        inner.closed = true;
    }
}

/// Handle to one registered listener.
#[derive(Debug)]
pub struct NotifierSubscription<T> {
    id: u64,
    inner: Weak<Mutex<NotifierInner<T>>>,
}

impl<T> NotifierSubscription<T> {
    /// Unregister the listener. Safe to call after the notifier closed.
    pub fn close(&self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock().expect("notifier lock poisoned");
            inner.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
