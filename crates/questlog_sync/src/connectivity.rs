//! Connectivity monitor.
//!
//! Mirrors the platform's online/offline signal as a single boolean and lets
//! interested parties subscribe to transitions. The platform adapter (browser
//! `online`/`offline` events, a mobile reachability API, ...) calls
//! [`ConnectivityMonitor::set_online`]; tests call it directly.
//!
//! # Example
//!
//! ```ignore
//! use questlog_sync::connectivity::{ConnectivityEvent, ConnectivityMonitor};
//! use std::sync::Arc;
//!
//! let monitor = ConnectivityMonitor::new(false);
//!
//! let id = monitor.subscribe(Arc::new(|event| {
//!     if *event == ConnectivityEvent::WentOnline {
//!         println!("back online");
//!     }
//! }));
//!
//! monitor.set_online(true);
//! monitor.unsubscribe(id);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback invoked on every connectivity transition.
///
/// Callbacks run synchronously on the thread that reported the transition and
/// should not block.
pub type ConnectivityCallback = Arc<dyn Fn(&ConnectivityEvent) + Send + Sync>;

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    /// Offline to online
    WentOnline,
    /// Online to offline
    WentOffline,
}

/// Observable online/offline status with transition subscriptions.
pub struct ConnectivityMonitor {
    online: AtomicBool,
    callbacks: RwLock<HashMap<SubscriptionId, ConnectivityCallback>>,
    next_id: AtomicU64,
}

impl ConnectivityMonitor {
    /// Create a monitor seeded with the platform's current status.
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: AtomicBool::new(initially_online),
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Current status.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record the platform's status.
    ///
    /// Subscribers are notified only when the status actually changes.
    /// Returns the event that was emitted, if any.
    pub fn set_online(&self, online: bool) -> Option<ConnectivityEvent> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if was_online == online {
            return None;
        }

        let event = if online {
            ConnectivityEvent::WentOnline
        } else {
            ConnectivityEvent::WentOffline
        };
        log::info!("Connectivity changed: {:?}", event);
        self.emit(&event);
        Some(event)
    }

    /// Subscribe to transitions.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, callback: ConnectivityCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut callbacks = self.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        callbacks.insert(id, callback);
        id
    }

    /// Unsubscribe.
    ///
    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        callbacks.remove(&id).is_some()
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn emit(&self, event: &ConnectivityEvent) {
        // Snapshot first so a callback may (un)subscribe without deadlocking
        let callbacks: Vec<ConnectivityCallback> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for callback in callbacks {
            // A panicking subscriber must not starve the others
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            }));
            if result.is_err() {
                log::warn!("Connectivity subscriber panicked on {:?}", event);
            }
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("online", &self.is_online())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
