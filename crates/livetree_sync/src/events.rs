//! Entity events and a reentrancy-safe emitter.
//!
//! Listeners are stored as `Arc<dyn Fn>` and the listener list is
//! snapshotted before every emission, so a listener may register or remove
//! listeners (or mutate the entity) while it runs. The lock is never held
//! during a callback.

use crate::error::SyncError;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifier returned by [`EventEmitter::on`].
pub type SubscriptionId = u64;

/// Events emitted by models and collections.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    /// A remote operation was issued.
    Request {
        /// Store path the operation targets.
        path: String,
    },
    /// A remote operation completed successfully.
    Sync,
    /// A remote operation failed.
    Error(SyncError),
    /// A model was inserted into a collection.
    Add {
        /// Key of the inserted model.
        key: String,
        /// Position it was inserted at.
        index: usize,
    },
    /// A model was removed from a collection.
    Remove {
        /// Key of the removed model.
        key: String,
    },
    /// One or more attributes changed.
    Change,
    /// A single attribute changed (`change:<name>`).
    ChangeAttr {
        /// Attribute name.
        name: String,
        /// New value, `Null` when unset.
        value: Value,
    },
}

impl EntityEvent {
    /// Returns the conventional event name.
    pub fn name(&self) -> String {
        match self {
            EntityEvent::Request { .. } => "request".into(),
            EntityEvent::Sync => "sync".into(),
            EntityEvent::Error(_) => "error".into(),
            EntityEvent::Add { .. } => "add".into(),
            EntityEvent::Remove { .. } => "remove".into(),
            EntityEvent::Change => "change".into(),
            EntityEvent::ChangeAttr { name, .. } => format!("change:{name}"),
        }
    }
}

type ListenerFn = dyn Fn(&EntityEvent) + Send + Sync;

/// Typed synchronous event emitter.
pub struct EventEmitter {
    listeners: Mutex<Vec<(SubscriptionId, Arc<ListenerFn>)>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    /// Creates an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` and returns its id.
    pub fn on(&self, callback: impl Fn(&EntityEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Removes a listener. Unknown ids are ignored.
    pub fn off(&self, id: SubscriptionId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Emits `event` to a snapshot of the current listeners.
    pub fn emit(&self, event: &EntityEvent) {
        let snapshot: Vec<Arc<ListenerFn>> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for cb in snapshot {
            cb(event);
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Returns true if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
