//! Reference handles and query combinators.

use crate::backend::{
    ChildCallback, ChildEvent, HandleId, ListenerId, ReadCallback, Snapshot, StoreBackend, Task,
    WriteCallback,
};
use crate::error::StoreResult;
use crate::path::StorePath;
use crate::query::{Limit, QuerySpec};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A shareable handle to a store backend.
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn StoreBackend>,
}

impl StoreHandle {
    /// Wraps a backend.
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Returns a reference to the root of the tree.
    #[must_use]
    pub fn root(&self) -> Reference {
        Reference::new(Arc::clone(&self.backend), QuerySpec::at(StorePath::root()))
    }

    /// Returns a reference to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a valid store path.
    pub fn reference(&self, path: &str) -> StoreResult<Reference> {
        let path = StorePath::parse(path)?;
        Ok(Reference::new(Arc::clone(&self.backend), QuerySpec::at(path)))
    }

    /// Generates a unique child key without writing anything.
    #[must_use]
    pub fn generate_key(&self) -> String {
        self.backend.generate_key()
    }

    /// Schedules `task` on the store's event queue.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        let task: Task = Box::new(task);
        self.backend.defer(task);
    }

    /// Returns true if both handles point at the same backend.
    #[must_use]
    pub fn same_store(&self, other: &StoreHandle) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

/// A handle to a location (optionally windowed) in the store.
///
/// Deriving a query with a combinator yields a new reference with its own
/// handle id; `off` on the derived reference only removes listeners that
/// were registered through it.
#[derive(Clone)]
pub struct Reference {
    backend: Arc<dyn StoreBackend>,
    query: QuerySpec,
    handle: HandleId,
}

impl Reference {
    fn new(backend: Arc<dyn StoreBackend>, query: QuerySpec) -> Self {
        let handle = backend.next_handle();
        Self {
            backend,
            query,
            handle,
        }
    }

    fn derive(&self, query: QuerySpec) -> Self {
        Self::new(Arc::clone(&self.backend), query)
    }

    /// Returns the location this reference points at.
    #[must_use]
    pub fn path(&self) -> &StorePath {
        &self.query.path
    }

    /// Returns the query parameters.
    #[must_use]
    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    /// Returns the handle id.
    #[must_use]
    pub fn handle(&self) -> HandleId {
        self.handle
    }

    /// Returns the last path segment.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.query.path.key()
    }

    /// Returns a store handle for the same backend.
    #[must_use]
    pub fn store(&self) -> StoreHandle {
        StoreHandle::new(Arc::clone(&self.backend))
    }

    /// Returns an unwindowed reference to a descendant location.
    ///
    /// # Errors
    ///
    /// Returns an error if `relative` is not a valid path.
    pub fn child(&self, relative: &str) -> StoreResult<Reference> {
        Ok(self.derive(QuerySpec::at(self.query.path.child(relative)?)))
    }

    /// Returns an unwindowed reference to the parent location.
    #[must_use]
    pub fn parent(&self) -> Option<Reference> {
        self.query
            .path
            .parent()
            .map(|path| self.derive(QuerySpec::at(path)))
    }

    /// Returns a child reference under a newly generated key.
    #[must_use]
    pub fn push(&self) -> Reference {
        let key = self.backend.generate_key();
        let path = self
            .query
            .path
            .child(&key)
            .unwrap_or_else(|_| self.query.path.clone());
        self.derive(QuerySpec::at(path))
    }

    /// Orders children by key.
    #[must_use]
    pub fn order_by_key(&self) -> Reference {
        let mut query = self.query.clone();
        query.order_by_key = true;
        self.derive(query)
    }

    /// Keeps the first `n` children of the range.
    #[must_use]
    pub fn limit_to_first(&self, n: usize) -> Reference {
        let mut query = self.query.clone();
        query.limit = Some(Limit::First(n));
        self.derive(query)
    }

    /// Keeps the last `n` children of the range.
    #[must_use]
    pub fn limit_to_last(&self, n: usize) -> Reference {
        let mut query = self.query.clone();
        query.limit = Some(Limit::Last(n));
        self.derive(query)
    }

    /// Restricts the range to keys `>= key`.
    #[must_use]
    pub fn start_at(&self, key: impl Into<String>) -> Reference {
        let mut query = self.query.clone();
        query.start_at = Some(key.into());
        self.derive(query)
    }

    /// Restricts the range to keys `<= key`.
    #[must_use]
    pub fn end_at(&self, key: impl Into<String>) -> Reference {
        let mut query = self.query.clone();
        query.end_at = Some(key.into());
        self.derive(query)
    }

    /// Registers a child event listener on this reference.
    pub fn on(&self, event: ChildEvent, callback: ChildCallback) -> ListenerId {
        self.backend
            .subscribe(&self.query, self.handle, event, callback)
    }

    /// Removes every listener registered through this reference.
    pub fn off(&self) {
        self.backend.unsubscribe_handle(self.handle);
    }

    /// Removes a single listener.
    pub fn off_listener(&self, listener: ListenerId) {
        self.backend.unsubscribe(listener);
    }

    /// Reads the current value of this reference's window once.
    pub fn once_value(&self, callback: impl FnOnce(StoreResult<Snapshot>) + Send + 'static) {
        let callback: ReadCallback = Box::new(callback);
        self.backend.read(&self.query, callback);
    }

    /// Applies a multi-path partial update below this location.
    pub fn update(
        &self,
        data: Map<String, Value>,
        callback: impl FnOnce(StoreResult<()>) + Send + 'static,
    ) {
        let callback: WriteCallback = Box::new(callback);
        self.backend.update(&self.query.path, data, callback);
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("query", &self.query)
            .field("handle", &self.handle)
            .finish()
    }
}

impl PartialEq for Reference {
    /// Two references are equal when they are the same handle.
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle && Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl Eq for Reference {}
