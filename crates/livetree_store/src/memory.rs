//! Live in-memory store.

use crate::backend::{
    ChildCallback, ChildEvent, HandleId, ListenerId, ReadCallback, ServerValue, Snapshot,
    StoreBackend, Task, WriteCallback,
};
use crate::error::{StoreError, StoreResult};
use crate::keys::PushKeyGenerator;
use crate::path::StorePath;
use crate::query::QuerySpec;
use crate::reference::StoreHandle;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Clock returning milliseconds since the Unix epoch.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// A write recorded by [`MemoryStore`].
#[derive(Clone, Debug, PartialEq)]
pub struct WriteRecord {
    /// Location the update was rooted at.
    pub path: StorePath,
    /// The partial tree, as submitted (sentinels unresolved).
    pub data: Map<String, Value>,
}

struct Listener {
    query: QuerySpec,
    handle: HandleId,
    event: ChildEvent,
    callback: ChildCallback,
    window: Vec<(String, Value)>,
}

struct Shared {
    data: Mutex<Value>,
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    queue: Mutex<VecDeque<Task>>,
    failures: Mutex<VecDeque<String>>,
    writes: Mutex<Vec<WriteRecord>>,
    keys: PushKeyGenerator,
    clock: Clock,
    next_listener: AtomicU64,
    next_handle: AtomicU64,
}

/// A hierarchical store held in memory that emits live child events.
///
/// Every continuation is placed on a single FIFO event queue and only runs
/// when the queue is driven with [`MemoryStore::run_until_idle`] or
/// [`MemoryStore::step`]. This models a single-threaded event loop: callers
/// can observe exactly what happened synchronously and what was deferred.
///
/// Cloning a `MemoryStore` yields another handle to the same tree.
///
/// # Example
///
/// ```rust
/// use livetree_store::MemoryStore;
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// store.set("/users/u1", json!({ "name": "Ada" })).unwrap();
/// store.run_until_idle();
/// assert_eq!(store.value("/users/u1/name").unwrap(), json!("Ada"));
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates an empty store using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(system_millis))
    }

    /// Creates an empty store with an injected clock.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            shared: Arc::new(Shared {
                data: Mutex::new(Value::Null),
                listeners: Mutex::new(BTreeMap::new()),
                queue: Mutex::new(VecDeque::new()),
                failures: Mutex::new(VecDeque::new()),
                writes: Mutex::new(Vec::new()),
                keys: PushKeyGenerator::new(),
                clock,
                next_listener: AtomicU64::new(1),
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Returns a store handle backed by this store.
    #[must_use]
    pub fn handle(&self) -> StoreHandle {
        StoreHandle::new(Arc::new(self.clone()))
    }

    /// Writes `value` at `path`, notifying listeners. The acknowledgement
    /// is discarded.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is invalid or is the root.
    pub fn set(&self, path: &str, value: Value) -> StoreResult<()> {
        let path = StorePath::parse(path)?;
        let (Some(parent), Some(key)) = (path.parent(), path.key()) else {
            return Err(StoreError::InvalidPath("cannot set the root".into()));
        };
        let mut data = Map::new();
        data.insert(key.to_string(), value);
        self.update(&parent, data, Box::new(|_| {}));
        Ok(())
    }

    /// Returns the value currently stored at `path` (`Null` if absent).
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is invalid.
    pub fn value(&self, path: &str) -> StoreResult<Value> {
        let path = StorePath::parse(path)?;
        let data = self.shared.data.lock();
        Ok(get_at(&data, path.segments()).cloned().unwrap_or(Value::Null))
    }

    /// Makes the next read or write fail with a transport error.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.shared.failures.lock().push_back(message.into());
    }

    /// Returns every update submitted so far.
    #[must_use]
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.shared.writes.lock().clone()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    /// Returns the number of listeners observing exactly `path`.
    #[must_use]
    pub fn listeners_at(&self, path: &str) -> usize {
        let Ok(path) = StorePath::parse(path) else {
            return 0;
        };
        self.shared
            .listeners
            .lock()
            .values()
            .filter(|listener| listener.query.path == path)
            .count()
    }

    /// Returns the number of queued continuations.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Runs one queued continuation. Returns false if the queue was empty.
    pub fn step(&self) -> bool {
        // The lock is released before the task runs; tasks may enqueue more.
        let task = self.shared.queue.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Runs queued continuations until the queue is empty. Returns the
    /// number of continuations run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.step() {
            ran += 1;
        }
        ran
    }

    fn enqueue(&self, task: Task) {
        self.shared.queue.lock().push_back(task);
    }

    fn take_failure(&self) -> Option<String> {
        self.shared.failures.lock().pop_front()
    }

    fn now(&self) -> u64 {
        (self.shared.clock)()
    }

    /// Re-evaluates every listener window and queues the resulting events.
    fn notify(&self) {
        let data = self.shared.data.lock().clone();
        let mut listeners = self.shared.listeners.lock();
        for (id, listener) in listeners.iter_mut() {
            let window = listener
                .query
                .window(get_at(&data, listener.query.path.segments()));
            let events = diff_windows(&listener.window, &window, listener.event);
            listener.window = window;
            for snapshot in events {
                trace!(listener = id, event = %listener.event, key = ?snapshot.key(), "queue child event");
                let callback = Arc::clone(&listener.callback);
                self.enqueue(Box::new(move || callback(&snapshot)));
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryStore {
    fn subscribe(
        &self,
        query: &QuerySpec,
        handle: HandleId,
        event: ChildEvent,
        callback: ChildCallback,
    ) -> ListenerId {
        let id = self.shared.next_listener.fetch_add(1, Ordering::SeqCst);
        let window = {
            let data = self.shared.data.lock();
            query.window(get_at(&data, query.path.segments()))
        };
        if event == ChildEvent::Added {
            for (key, value) in &window {
                let snapshot = Snapshot::new(Some(key.clone()), value.clone());
                let callback = Arc::clone(&callback);
                self.enqueue(Box::new(move || callback(&snapshot)));
            }
        }
        self.shared.listeners.lock().insert(
            id,
            Listener {
                query: query.clone(),
                handle,
                event,
                callback,
                window,
            },
        );
        id
    }

    fn unsubscribe_handle(&self, handle: HandleId) {
        self.shared
            .listeners
            .lock()
            .retain(|_, listener| listener.handle != handle);
    }

    fn unsubscribe(&self, listener: ListenerId) {
        self.shared.listeners.lock().remove(&listener);
    }

    fn read(&self, query: &QuerySpec, callback: ReadCallback) {
        if let Some(message) = self.take_failure() {
            self.enqueue(Box::new(move || callback(Err(StoreError::Transport(message)))));
            return;
        }
        let value = {
            let data = self.shared.data.lock();
            let node = get_at(&data, query.path.segments());
            if query.is_windowed() {
                let window: Map<String, Value> = query.window(node).into_iter().collect();
                if window.is_empty() {
                    Value::Null
                } else {
                    Value::Object(window)
                }
            } else {
                node.cloned().unwrap_or(Value::Null)
            }
        };
        let snapshot = Snapshot::new(query.path.key().map(str::to_string), value);
        self.enqueue(Box::new(move || callback(Ok(snapshot))));
    }

    fn update(&self, path: &StorePath, data: Map<String, Value>, callback: WriteCallback) {
        if let Some(message) = self.take_failure() {
            self.enqueue(Box::new(move || callback(Err(StoreError::Transport(message)))));
            return;
        }
        self.shared.writes.lock().push(WriteRecord {
            path: path.clone(),
            data: data.clone(),
        });

        let mut targets = Vec::with_capacity(data.len());
        for (relative, value) in data {
            match path.child(&relative) {
                Ok(target) if !target.is_root() => targets.push((target, value)),
                Ok(_) => {
                    let err = StoreError::InvalidPath("cannot update the root".into());
                    self.enqueue(Box::new(move || callback(Err(err))));
                    return;
                }
                Err(err) => {
                    self.enqueue(Box::new(move || callback(Err(err))));
                    return;
                }
            }
        }

        let now = self.now();
        {
            let mut root = self.shared.data.lock();
            for (target, value) in targets {
                let value = normalize(resolve_server_values(value, now));
                set_at(&mut root, target.segments(), value);
            }
        }
        self.notify();
        self.enqueue(Box::new(move || callback(Ok(()))));
    }

    fn generate_key(&self) -> String {
        self.shared.keys.generate(self.now())
    }

    fn next_handle(&self) -> HandleId {
        self.shared.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn defer(&self, task: Task) {
        self.enqueue(task);
    }
}

fn system_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn get_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Writes `value` at `segments`, creating intermediate objects. A `Null`
/// value deletes the subtree and prunes parents left empty.
fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if value.is_null() {
        if let Value::Object(children) = node {
            if rest.is_empty() {
                children.remove(head);
            } else if let Some(child) = children.get_mut(head) {
                set_at(child, rest, Value::Null);
                if child.is_null() {
                    children.remove(head);
                }
            }
            if children.is_empty() {
                *node = Value::Null;
            }
        }
        return;
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(children) = node {
        let child = children.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn resolve_server_values(value: Value, now: u64) -> Value {
    if ServerValue::is_timestamp(&value) {
        return Value::from(now);
    }
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_server_values(v, now)))
                .collect(),
        ),
        other => other,
    }
}

/// Drops null members and collapses empty objects to `Null`.
fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null())
                .collect();
            if map.is_empty() {
                Value::Null
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

fn diff_windows(
    old: &[(String, Value)],
    new: &[(String, Value)],
    event: ChildEvent,
) -> Vec<Snapshot> {
    let old_map: BTreeMap<&str, &Value> = old.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let new_map: BTreeMap<&str, &Value> = new.iter().map(|(k, v)| (k.as_str(), v)).collect();
    match event {
        ChildEvent::Added => new
            .iter()
            .filter(|(k, _)| !old_map.contains_key(k.as_str()))
            .map(|(k, v)| Snapshot::new(Some(k.clone()), v.clone()))
            .collect(),
        ChildEvent::Changed => new
            .iter()
            .filter(|(k, v)| old_map.get(k.as_str()).is_some_and(|old| *old != v))
            .map(|(k, v)| Snapshot::new(Some(k.clone()), v.clone()))
            .collect(),
        ChildEvent::Removed => old
            .iter()
            .filter(|(k, _)| !new_map.contains_key(k.as_str()))
            .map(|(k, v)| Snapshot::new(Some(k.clone()), v.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (ChildCallback, Arc<Mutex<Vec<(String, Value)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ChildCallback = Arc::new(move |snap: &Snapshot| {
            sink.lock()
                .push((snap.key().unwrap_or_default().to_string(), snap.value().clone()));
        });
        (callback, seen)
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::with_clock(Arc::new(|| 1_000));
        for i in 1..=5 {
            store.set(&format!("/messages/m{i}"), json!({ "n": i })).unwrap();
        }
        store.run_until_idle();
        store
    }

    #[test]
    fn nothing_is_delivered_synchronously() {
        let store = seeded();
        let handle = store.handle();
        let reference = handle.reference("/messages").unwrap();
        let (callback, seen) = recorder();
        reference.on(ChildEvent::Added, callback);
        assert!(seen.lock().is_empty());
        assert_eq!(store.pending(), 5);

        store.run_until_idle();
        let keys: Vec<String> = seen.lock().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["m1", "m2", "m3", "m4", "m5"]);
    }

    #[test]
    fn windowed_listener_sees_entries_and_exits() {
        let store = seeded();
        let reference = store
            .handle()
            .reference("/messages")
            .unwrap()
            .order_by_key()
            .limit_to_last(2);
        let (added, added_seen) = recorder();
        let (removed, removed_seen) = recorder();
        reference.on(ChildEvent::Added, added);
        reference.on(ChildEvent::Removed, removed);
        store.run_until_idle();
        assert_eq!(added_seen.lock().len(), 2);

        store.set("/messages/m6", json!({ "n": 6 })).unwrap();
        store.run_until_idle();
        assert_eq!(added_seen.lock().last().unwrap().0, "m6");
        assert_eq!(removed_seen.lock().as_slice(), &[("m4".to_string(), json!({ "n": 4 }))]);
    }

    #[test]
    fn changed_events_carry_new_value() {
        let store = seeded();
        let reference = store.handle().reference("/messages").unwrap();
        let (changed, seen) = recorder();
        reference.on(ChildEvent::Changed, changed);

        let mut data = Map::new();
        data.insert("m2/n".into(), json!(20));
        reference.update(data, |_| {});
        store.run_until_idle();
        assert_eq!(seen.lock().as_slice(), &[("m2".to_string(), json!({ "n": 20 }))]);
    }

    #[test]
    fn off_removes_only_that_handle() {
        let store = seeded();
        let base = store.handle().reference("/messages").unwrap();
        let first = base.order_by_key();
        let second = base.order_by_key();
        first.on(ChildEvent::Added, recorder().0);
        second.on(ChildEvent::Added, recorder().0);
        assert_eq!(store.listener_count(), 2);
        first.off();
        assert_eq!(store.listener_count(), 1);
        first.off();
        assert_eq!(store.listener_count(), 1);
    }

    #[test]
    fn multi_path_update_and_tombstone() {
        let store = seeded();
        let reference = store.handle().reference("/messages").unwrap();
        let mut data = Map::new();
        data.insert("m1".into(), Value::Null);
        data.insert("m2/text".into(), json!("hi"));
        reference.update(data, |_| {});
        store.run_until_idle();

        assert_eq!(store.value("/messages/m1").unwrap(), Value::Null);
        assert_eq!(store.value("/messages/m2").unwrap(), json!({ "n": 2, "text": "hi" }));
        assert_eq!(store.value("/messages/m3/n").unwrap(), json!(3));
    }

    #[test]
    fn server_timestamps_are_resolved() {
        let store = MemoryStore::with_clock(Arc::new(|| 42));
        store
            .set("/users/u1", json!({ "created": ServerValue::timestamp() }))
            .unwrap();
        assert_eq!(store.value("/users/u1/created").unwrap(), json!(42));
        assert_eq!(
            store.writes()[0].data["u1"]["created"],
            ServerValue::timestamp()
        );
    }

    #[test]
    fn injected_failure_reaches_continuation() {
        let store = seeded();
        store.fail_next("offline");
        let result = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&result);
        store
            .handle()
            .reference("/messages")
            .unwrap()
            .once_value(move |r| *sink.lock() = Some(r));
        assert!(result.lock().is_none());
        store.run_until_idle();
        assert_eq!(
            result.lock().take().unwrap().unwrap_err(),
            StoreError::Transport("offline".into())
        );
    }

    #[test]
    fn windowed_read_returns_only_window() {
        let store = seeded();
        let result = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&result);
        store
            .handle()
            .reference("/messages")
            .unwrap()
            .order_by_key()
            .start_at("m4")
            .limit_to_first(3)
            .once_value(move |r| *sink.lock() = Some(r));
        store.run_until_idle();
        let snapshot = result.lock().take().unwrap().unwrap();
        assert_eq!(snapshot.value(), &json!({ "m4": { "n": 4 }, "m5": { "n": 5 } }));
    }
}
