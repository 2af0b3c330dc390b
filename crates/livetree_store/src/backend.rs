//! Store backend trait definition.

use crate::error::StoreResult;
use crate::path::StorePath;
use crate::query::QuerySpec;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Identifier of a registered listener.
pub type ListenerId = u64;

/// Identifier of a reference handle. Every reference (and every derived
/// query) gets its own handle, so listeners can be removed per handle.
pub type HandleId = u64;

/// Child-level change events a listener can observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildEvent {
    /// A child entered the query window.
    Added,
    /// A child inside the window changed value.
    Changed,
    /// A child left the query window.
    Removed,
}

impl ChildEvent {
    /// All child events, in registration order.
    pub const ALL: [ChildEvent; 3] = [ChildEvent::Added, ChildEvent::Changed, ChildEvent::Removed];

    /// Returns the wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildEvent::Added => "child_added",
            ChildEvent::Changed => "child_changed",
            ChildEvent::Removed => "child_removed",
        }
    }
}

impl fmt::Display for ChildEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable copy of the data at a location.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    key: Option<String>,
    value: Value,
}

impl Snapshot {
    /// Creates a snapshot.
    #[must_use]
    pub fn new(key: Option<String>, value: Value) -> Self {
        Self { key, value }
    }

    /// Returns the key of the location, `None` for the root.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns the stored value. Absent data is `Value::Null`.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Consumes the snapshot, returning the value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Returns true if the location holds data.
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.value.is_null()
    }
}

/// Placeholder values resolved by the store when a write is applied.
pub struct ServerValue;

impl ServerValue {
    /// Returns the sentinel replaced by the store's clock (milliseconds).
    #[must_use]
    pub fn timestamp() -> Value {
        json!({ ".sv": "timestamp" })
    }

    /// Returns true if `value` is the timestamp sentinel.
    #[must_use]
    pub fn is_timestamp(value: &Value) -> bool {
        matches!(value, Value::Object(map) if map.len() == 1
            && map.get(".sv").and_then(Value::as_str) == Some("timestamp"))
    }
}

/// Callback invoked for child events.
pub type ChildCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Continuation for a one-time read.
pub type ReadCallback = Box<dyn FnOnce(StoreResult<Snapshot>) + Send>;

/// Continuation for a write acknowledgement.
pub type WriteCallback = Box<dyn FnOnce(StoreResult<()>) + Send>;

/// A deferred unit of work run on the store's event queue.
pub type Task = Box<dyn FnOnce() + Send>;

/// A hierarchical key-value store that emits live child notifications.
///
/// Backends never invoke a continuation from inside the call that
/// registered it; all delivery happens from the backend's event queue.
///
/// # Implementors
///
/// - [`crate::MemoryStore`] - live in-memory store for tests and local use
pub trait StoreBackend: Send + Sync {
    /// Registers `callback` for `event` on the window of `query`.
    ///
    /// For [`ChildEvent::Added`], the current window is replayed as added
    /// events in key order.
    fn subscribe(
        &self,
        query: &QuerySpec,
        handle: HandleId,
        event: ChildEvent,
        callback: ChildCallback,
    ) -> ListenerId;

    /// Removes every listener registered through `handle`.
    fn unsubscribe_handle(&self, handle: HandleId);

    /// Removes a single listener.
    fn unsubscribe(&self, listener: ListenerId);

    /// Reads the window of `query` once.
    fn read(&self, query: &QuerySpec, callback: ReadCallback);

    /// Applies a multi-path partial update rooted at `path`.
    ///
    /// Keys of `data` are relative paths; a `null` value deletes the subtree.
    fn update(&self, path: &StorePath, data: Map<String, Value>, callback: WriteCallback);

    /// Generates a unique, chronologically ordered child key.
    fn generate_key(&self) -> String;

    /// Allocates a fresh handle id.
    fn next_handle(&self) -> HandleId;

    /// Schedules `task` on the event queue.
    fn defer(&self, task: Task);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_sentinel_roundtrip() {
        assert!(ServerValue::is_timestamp(&ServerValue::timestamp()));
        assert!(!ServerValue::is_timestamp(&json!({ ".sv": "other" })));
        assert!(!ServerValue::is_timestamp(&json!(12)));
    }

    #[test]
    fn snapshot_existence() {
        assert!(!Snapshot::new(Some("a".into()), Value::Null).exists());
        assert!(Snapshot::new(None, json!({ "a": 1 })).exists());
    }

    #[test]
    fn event_names() {
        assert_eq!(ChildEvent::Added.to_string(), "child_added");
        assert_eq!(ChildEvent::Removed.as_str(), "child_removed");
    }
}
