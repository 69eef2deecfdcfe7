//! Notification fan-out
//!
//! Listeners are keyed by exact method name (`Player.OnPlay`,
//! `Application.OnVolumeChanged`, ...). Dispatch works on a snapshot of the
//! listener list, so handlers can subscribe or unsubscribe from inside a
//! callback without deadlocking or disturbing the current pass.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{trace, warn};

use kodi_json_rpc::JsonRpcNotification;

/// Callback invoked with the notification's `params`
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle returned by [`NotificationRouter::register`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    method: String,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that returned normally
    pub delivered: usize,
    /// Handlers that panicked
    pub failed: usize,
}

/// Maps notification methods to listeners
pub struct NotificationRouter {
    listeners: RwLock<HashMap<String, Vec<(u64, NotificationHandler)>>>,
    next_id: AtomicU64,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a listener for `method`
    pub fn register<F>(&self, method: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let method = method.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.listeners
            .write()
            .entry(method.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        trace!(method = %method, subscription = id, "Listener registered");
        Subscription { id, method }
    }

    /// Remove a listener; `false` if it was already gone
    pub fn unregister(&self, subscription: &Subscription) -> bool {
        let mut listeners = self.listeners.write();
        let Some(handlers) = listeners.get_mut(&subscription.method) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        let removed = handlers.len() != before;

        if handlers.is_empty() {
            listeners.remove(&subscription.method);
        }
        removed
    }

    /// Deliver a notification to every current listener of its method
    pub fn dispatch(&self, notification: &JsonRpcNotification) -> DispatchReport {
        let snapshot: Vec<NotificationHandler> = match self.listeners.read().get(&notification.method) {
            Some(handlers) => handlers.iter().map(|(_, handler)| handler.clone()).collect(),
            None => {
                trace!(method = %notification.method, "No listeners for notification");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for handler in snapshot {
            let params = notification.params.clone();
            match catch_unwind(AssertUnwindSafe(|| handler(params))) {
                Ok(()) => report.delivered += 1,
                Err(panic) => {
                    report.failed += 1;
                    warn!(
                        method = %notification.method,
                        panic = panic_message(panic.as_ref()),
                        "Notification listener panicked"
                    );
                }
            }
        }
        report
    }

    pub fn listener_count(&self, method: &str) -> usize {
        self.listeners.read().get(method).map_or(0, Vec::len)
    }

    /// Methods with at least one listener
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.listeners.read().keys().cloned().collect();
        methods.sort();
        methods
    }
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotificationRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRouter")
            .field("methods", &self.methods())
            .finish()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
