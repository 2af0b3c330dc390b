//! Synced collections.
//!
//! A collection owns one listener set on its active query and reconciles
//! the three child events into an ordered local sequence:
//!
//! - `child_added` inserts a model unless its key is already loaded, at
//!   the tail for ascending fetches and at the length captured when the
//!   page was bound for descending ones;
//! - `child_changed` merges into the loaded model, or does nothing;
//! - `child_removed` removes the loaded model, or does nothing.
//!
//! Fetch and page completions are read back with a one-time value read on
//! the same query. The store runs continuations in order, so by the time
//! the read arrives every replayed `child_added` of the page was applied.

use crate::completion::{pair, Completer, Completion};
use crate::config::{EntityOptions, FetchOptions, SortOrder, WriteOptions};
use crate::error::{SyncError, SyncResult};
use crate::events::{EntityEvent, EventEmitter, SubscriptionId};
use crate::listener::{ChildHandler, ChildHandlers, ListenerSet, ListenerState};
use crate::model::{Model, Origin};
use crate::pagination::{PageResult, Pagination, QueryState};
use crate::release::{release_owned, EntityToken, Releasable, ReleaseMode};
use crate::resolver::{resolve_reference, PathContext};
use crate::schema::CollectionSchema;
use livetree_store::{Reference, Snapshot};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

struct CollectionState {
    models: Vec<Model>,
    pagination: Pagination,
    owner: Option<EntityToken>,
    /// Models created after the fetch, waiting for their `child_added`.
    pending: HashMap<String, Model>,
}

impl CollectionState {
    fn position(&self, key: &str) -> Option<usize> {
        self.models
            .iter()
            .position(|model| model.id().as_deref() == Some(key))
    }
}

pub(crate) struct CollectionInner {
    token: EntityToken,
    schema: Arc<CollectionSchema>,
    options: EntityOptions,
    state: Mutex<CollectionState>,
    listeners: ListenerSet,
    events: EventEmitter,
}

/// Non-owning handle a member model keeps on its collection.
#[derive(Clone)]
pub(crate) struct WeakCollection(Weak<CollectionInner>);

impl WeakCollection {
    pub(crate) fn upgrade(&self) -> Option<Collection> {
        self.0.upgrade().map(|inner| Collection { inner })
    }
}

/// An ordered sequence of models mirrored against a store location.
///
/// # Example
///
/// ```rust
/// use livetree_store::MemoryStore;
/// use livetree_sync::{
///     Collection, CollectionSchema, EntityOptions, FetchOptions, ModelSchema, PathTemplate,
/// };
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let store = MemoryStore::new();
/// for key in ["m1", "m2", "m3"] {
///     store.set(&format!("/messages/{key}"), json!({ "id": key })).unwrap();
/// }
/// store.run_until_idle();
///
/// let model = Arc::new(ModelSchema::new(PathTemplate::parse("/messages/{id}").unwrap()));
/// let schema = CollectionSchema::new(PathTemplate::parse("/messages").unwrap(), model);
/// let messages = Collection::new(Arc::new(schema), EntityOptions::new(store.handle())).unwrap();
///
/// let mut page = messages.fetch(FetchOptions::new().with_page_size(2));
/// store.run_until_idle();
/// assert_eq!(page.try_take().unwrap().unwrap().new_items, 2);
/// assert_eq!(messages.keys(), vec!["m1", "m2"]);
/// ```
#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl Collection {
    /// Creates an empty, unfetched collection.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the schema path cannot be resolved
    /// from `options.params`.
    pub fn new(schema: Arc<CollectionSchema>, options: EntityOptions) -> SyncResult<Self> {
        let collection = Self {
            inner: Arc::new(CollectionInner {
                token: EntityToken::next(),
                schema,
                options,
                state: Mutex::new(CollectionState {
                    models: Vec::new(),
                    pagination: Pagination::new(),
                    owner: None,
                    pending: HashMap::new(),
                }),
                listeners: ListenerSet::new(),
                events: EventEmitter::new(),
            }),
        };
        collection.reference()?;
        Ok(collection)
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Arc<CollectionSchema> {
        &self.inner.schema
    }

    /// Returns the construction options.
    pub fn options(&self) -> &EntityOptions {
        &self.inner.options
    }

    /// Returns the collection location. Writes are rooted here.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path cannot be resolved.
    pub fn reference(&self) -> SyncResult<Reference> {
        let ctx = PathContext::new(&self.inner.options.params, None);
        resolve_reference(&self.inner.options.store, self.inner.schema.path(), &ctx)
    }

    /// Returns the base query fetches start from.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path cannot be resolved.
    pub fn query(&self) -> SyncResult<Reference> {
        let reference = self.reference()?;
        Ok(match &self.inner.schema.base_query {
            Some(customize) => customize(reference),
            None => reference,
        })
    }

    /// Number of loaded models.
    pub fn len(&self) -> usize {
        self.inner.state.lock().models.len()
    }

    /// Returns true if no model is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the loaded model with id `key`.
    pub fn get(&self, key: &str) -> Option<Model> {
        let state = self.inner.state.lock();
        state.position(key).map(|index| state.models[index].clone())
    }

    /// Returns the model at `index`.
    pub fn at(&self, index: usize) -> Option<Model> {
        self.inner.state.lock().models.get(index).cloned()
    }

    /// Returns the first model.
    pub fn first(&self) -> Option<Model> {
        self.inner.state.lock().models.first().cloned()
    }

    /// Returns the last model.
    pub fn last(&self) -> Option<Model> {
        self.inner.state.lock().models.last().cloned()
    }

    /// Returns the loaded models in order.
    pub fn models(&self) -> Vec<Model> {
        self.inner.state.lock().models.clone()
    }

    /// Returns the ids of the loaded models in order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .models
            .iter()
            .filter_map(Model::id)
            .collect()
    }

    /// Returns true if a model with id `key` is loaded.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.lock().position(key).is_some()
    }

    /// Appends `model`. Returns false if it has no id or its id is
    /// already loaded.
    pub fn add(&self, model: Model) -> bool {
        self.insert(model, None)
    }

    /// Inserts `model` at `index`, clamped to the length.
    pub fn add_at(&self, model: Model, index: usize) -> bool {
        self.insert(model, Some(index))
    }

    /// Removes the model with id `key`.
    pub fn remove(&self, key: &str) -> Option<Model> {
        let removed = {
            let mut state = self.inner.state.lock();
            let index = state.position(key)?;
            state.models.remove(index)
        };
        removed.clear_owner(self.inner.token);
        self.emit(&EntityEvent::Remove {
            key: key.to_string(),
        });
        Some(removed)
    }

    /// Removes `model` if it is loaded, whether or not it has an id.
    pub(crate) fn remove_model(&self, model: &Model) {
        let removed = {
            let mut state = self.inner.state.lock();
            let Some(index) = state.models.iter().position(|m| m == model) else {
                return;
            };
            state.models.remove(index)
        };
        removed.clear_owner(self.inner.token);
        if let Some(key) = removed.id() {
            self.emit(&EntityEvent::Remove { key });
        }
    }

    /// Builds a member model from `attributes` without adding it.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the model's child factories fails.
    pub fn build(&self, attributes: Map<String, Value>) -> SyncResult<Model> {
        Model::new(
            Arc::clone(self.inner.schema.model()),
            attributes,
            self.inner.options.clone(),
        )
    }

    /// Fetches the first page (or the full range) and keeps the loaded
    /// window mirrored.
    ///
    /// Listeners of a previous fetch are released first. The completion
    /// reports the number of models the fetch added. A paginated fetch
    /// always reports `more_to_load`; [`Collection::load_more`] finds out.
    pub fn fetch(&self, options: FetchOptions) -> Completion<PageResult> {
        match self.query() {
            Ok(base) => self.fetch_from(base, options),
            Err(err) => self.fail(err),
        }
    }

    /// Like [`Collection::fetch`], starting from `base` instead of the
    /// schema's base query, e.g. a key range of the collection.
    pub fn fetch_from(&self, base: Reference, options: FetchOptions) -> Completion<PageResult> {
        let (query, previous_len) = {
            let mut state = self.inner.state.lock();
            state.pending.clear();
            (state.pagination.begin(base, &options), state.models.len())
        };
        debug!(path = %query.path(), page_size = ?options.effective_page_size(), "fetch collection");
        let generation = self.bind_query(&query, options.order, previous_len);
        let (completer, completion) = pair();
        self.read_page(&query, generation, completer, move |collection| {
            let state = collection.inner.state.lock();
            PageResult {
                new_items: state.models.len().saturating_sub(previous_len),
                more_to_load: state.pagination.more_to_load(),
                previous_len,
            }
        });
        completion
    }

    /// Loads the page after the last loaded model.
    ///
    /// Before any fetch, after an unpaginated fetch, or once pagination is
    /// exhausted, this resolves through the store's queue with zero new
    /// items and `more_to_load = false`, without remote access.
    pub fn load_more(&self) -> Completion<PageResult> {
        let (completer, completion) = pair();
        let next = {
            let mut state = self.inner.state.lock();
            let previous_len = state.models.len();
            let last_key = state.models.last().and_then(Model::id);
            let order = state.pagination.order();
            state
                .pagination
                .next(last_key.as_deref())
                .map(|(query, page_size)| (query, page_size, order, previous_len))
                .ok_or(previous_len)
        };
        let (query, page_size, order, previous_len) = match next {
            Ok(next) => next,
            Err(previous_len) => {
                trace!("nothing more to load");
                self.inner.options.store.defer(move || {
                    completer.complete(Ok(PageResult::exhausted(previous_len)));
                });
                return completion;
            }
        };
        debug!(path = %query.path(), page_size, "load next page");
        let generation = self.bind_query(&query, order, previous_len);
        self.read_page(&query, generation, completer, move |collection| {
            let mut state = collection.inner.state.lock();
            let len = state.models.len();
            state.pagination.finish_page(page_size, previous_len, len)
        });
        completion
    }

    /// Creates a model and persists it.
    ///
    /// A store-generated key is assigned when `attributes` carry no id. If
    /// the collection was never fetched the model is added locally at once;
    /// otherwise its `child_added` notification adds this same instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be built. Persistence failures
    /// are reported through the returned completion.
    pub fn create(
        &self,
        mut attributes: Map<String, Value>,
        options: WriteOptions,
    ) -> SyncResult<(Model, Completion<()>)> {
        let id_attribute = self.inner.schema.model().id_attribute().to_string();
        let has_id = attributes
            .get(&id_attribute)
            .is_some_and(|id| !id.is_null() && id.as_str() != Some(""));
        if !has_id {
            attributes.insert(id_attribute, Value::String(self.new_key()));
        }
        let model = self.build(attributes)?;
        let key = model
            .id()
            .ok_or_else(|| SyncError::configuration("id attribute is not a string or number"))?;
        model.attach(self.inner.token, self.downgrade());

        let fetched = self.fetched();
        if fetched {
            self.inner
                .state
                .lock()
                .pending
                .insert(key.clone(), model.clone());
        }
        let weak = Arc::downgrade(&self.inner);
        let pending_key = key.clone();
        let saved = model.save_then(options, move |result| {
            if result.is_err() {
                if let Some(inner) = weak.upgrade() {
                    inner.state.lock().pending.remove(&pending_key);
                }
            }
        });
        if !fetched {
            self.add(model.clone());
        }
        debug!(%key, fetched, "create model");
        Ok((model, saved))
    }

    /// Generates a fresh store key.
    pub fn new_key(&self) -> String {
        self.inner.options.store.generate_key()
    }

    /// Returns true once a fetch has been issued.
    pub fn fetched(&self) -> bool {
        self.inner.state.lock().pagination.fetched()
    }

    /// Returns true if another page may exist.
    pub fn more_to_load(&self) -> bool {
        self.inner.state.lock().pagination.more_to_load()
    }

    /// Returns the parameters of the last fetch.
    pub fn query_state(&self) -> Option<QueryState> {
        self.inner.state.lock().pagination.state().cloned()
    }

    /// Returns the state of the collection's listeners.
    pub fn listener_state(&self) -> ListenerState {
        self.inner.listeners.state()
    }

    /// Registers an event listener.
    pub fn on(&self, callback: impl Fn(&EntityEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.events.on(callback)
    }

    /// Removes an event listener.
    pub fn off(&self, id: SubscriptionId) {
        self.inner.events.off(id);
    }

    pub(crate) fn set_owner(&self, owner: Option<EntityToken>) {
        self.inner.state.lock().owner = owner;
    }

    pub(crate) fn clear_owner(&self, owner: EntityToken) {
        let mut state = self.inner.state.lock();
        if state.owner == Some(owner) {
            state.owner = None;
        }
    }

    pub(crate) fn downgrade(&self) -> WeakCollection {
        WeakCollection(Arc::downgrade(&self.inner))
    }

    fn emit(&self, event: &EntityEvent) {
        self.inner.events.emit(event);
    }

    fn fail<T>(&self, err: SyncError) -> Completion<T> {
        self.emit(&EntityEvent::Error(err.clone()));
        Completion::resolved(Err(err))
    }

    fn insert(&self, model: Model, index: Option<usize>) -> bool {
        let Some(key) = model.id() else {
            warn!("cannot add a model without id");
            return false;
        };
        let index = {
            let mut state = self.inner.state.lock();
            if state.position(&key).is_some() {
                return false;
            }
            let index = index.map_or(state.models.len(), |i| i.min(state.models.len()));
            state.models.insert(index, model.clone());
            index
        };
        model.attach(self.inner.token, self.downgrade());
        self.emit(&EntityEvent::Add { key, index });
        true
    }

    /// Binds listeners for `query`. Descending pages insert at
    /// `insert_at`.
    fn bind_query(&self, query: &Reference, order: SortOrder, insert_at: usize) -> u64 {
        let weak = Arc::downgrade(&self.inner);
        let handler = |apply: Box<dyn Fn(&Collection, &Snapshot) + Send + Sync>| -> ChildHandler {
            let weak = Weak::clone(&weak);
            Arc::new(move |snapshot: &Snapshot| {
                if let Some(inner) = weak.upgrade() {
                    apply(&Collection { inner }, snapshot);
                }
            })
        };
        let handlers = ChildHandlers {
            added: handler(Box::new(move |collection: &Collection, snapshot: &Snapshot| {
                let at = match order {
                    SortOrder::Asc => None,
                    SortOrder::Desc => Some(insert_at),
                };
                collection.child_added(snapshot, at);
            })),
            changed: handler(Box::new(Collection::child_changed)),
            removed: handler(Box::new(Collection::child_removed)),
        };
        self.inner.listeners.bind(query.clone(), handlers)
    }

    /// Reads `query` once; on success computes the page outcome with
    /// `outcome`, unless the listener generation was superseded meanwhile.
    fn read_page<F>(
        &self,
        query: &Reference,
        generation: u64,
        completer: Completer<PageResult>,
        outcome: F,
    ) where
        F: FnOnce(&Collection) -> PageResult + Send + 'static,
    {
        self.emit(&EntityEvent::Request {
            path: query.path().to_string(),
        });
        let weak = Arc::downgrade(&self.inner);
        query.once_value(move |result| {
            let Some(collection) = weak.upgrade().map(|inner| Collection { inner }) else {
                return completer.complete(Err(SyncError::Dropped));
            };
            if !collection.inner.listeners.is_current(generation) {
                debug!(generation, "discard superseded page");
                return completer.complete(Err(SyncError::Dropped));
            }
            match result {
                Ok(_) => {
                    let page = outcome(&collection);
                    debug!(
                        new_items = page.new_items,
                        more_to_load = page.more_to_load,
                        "page loaded"
                    );
                    collection.emit(&EntityEvent::Sync);
                    completer.complete(Ok(page));
                }
                Err(err) => {
                    let err = SyncError::from(err);
                    collection.emit(&EntityEvent::Error(err.clone()));
                    completer.complete(Err(err));
                }
            }
        });
    }

    fn child_added(&self, snapshot: &Snapshot, at: Option<usize>) {
        let Some(key) = snapshot.key() else {
            return;
        };
        let Value::Object(attributes) = snapshot.value() else {
            warn!(%key, "ignore non-object child");
            return;
        };
        if self.contains(key) {
            trace!(%key, "skip loaded child");
            return;
        }
        let pending = self.inner.state.lock().pending.remove(key);
        let model = match pending {
            Some(model) => {
                model.set(attributes.clone(), Origin::Remote);
                model
            }
            None => {
                let mut attributes = attributes.clone();
                let id_attribute = self.inner.schema.model().id_attribute().to_string();
                attributes
                    .entry(id_attribute)
                    .or_insert_with(|| Value::String(key.to_string()));
                match self.build(attributes) {
                    Ok(model) => model,
                    Err(err) => {
                        warn!(%key, %err, "cannot build model");
                        self.emit(&EntityEvent::Error(err));
                        return;
                    }
                }
            }
        };
        model.mark_persisted();
        trace!(%key, ?at, "apply child_added");
        self.insert(model, at);
    }

    fn child_changed(&self, snapshot: &Snapshot) {
        let Some(key) = snapshot.key() else {
            return;
        };
        let Some(model) = self.get(key) else {
            trace!(%key, "skip change of unloaded child");
            return;
        };
        if let Value::Object(attributes) = snapshot.value() {
            trace!(%key, "apply child_changed");
            model.set(attributes.clone(), Origin::Remote);
        }
    }

    fn child_removed(&self, snapshot: &Snapshot) {
        if let Some(key) = snapshot.key() {
            trace!(%key, "apply child_removed");
            self.remove(key);
        }
    }
}

impl Releasable for Collection {
    fn token(&self) -> EntityToken {
        self.inner.token
    }

    fn owner(&self) -> Option<EntityToken> {
        self.inner.state.lock().owner
    }

    fn release_with(&self, mode: ReleaseMode) {
        self.inner.listeners.release();
        let models = {
            let mut state = self.inner.state.lock();
            state.pagination.unbind();
            state.pending.clear();
            match mode {
                ReleaseMode::Shallow => return,
                ReleaseMode::Cascade => state.models.clone(),
            }
        };
        release_owned(self.inner.token, models.iter().map(|m| m as &dyn Releasable));
    }
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Collection {}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Collection")
            .field("token", &self.inner.token)
            .field("len", &state.models.len())
            .field("fetched", &state.pagination.fetched())
            .finish_non_exhaustive()
    }
}
