//! Single synced models.

use crate::adapter::{self, WriteMethod};
use crate::collection::{Collection, WeakCollection};
use crate::completion::{pair, Completion};
use crate::config::{EntityOptions, WriteOptions};
use crate::error::{SyncError, SyncResult};
use crate::events::{EntityEvent, EventEmitter, SubscriptionId};
use crate::listener::{ChildHandler, ChildHandlers, ListenerSet, ListenerState};
use crate::release::{release_owned, EntityToken, Releasable, ReleaseMode};
use crate::resolver::{resolve_reference, PathContext};
use crate::schema::ModelSchema;
use livetree_store::{Reference, Snapshot};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Where an attribute mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Made by the application. Recorded for the next update.
    Local,
    /// Applied from a store notification. Never written back.
    Remote,
}

struct ModelState {
    attributes: Map<String, Value>,
    dirty: BTreeSet<String>,
    persisted: bool,
    owner: Option<EntityToken>,
    collection: Option<WeakCollection>,
    child_collections: BTreeMap<String, Collection>,
    child_models: BTreeMap<String, Model>,
}

pub(crate) struct ModelInner {
    token: EntityToken,
    schema: Arc<ModelSchema>,
    options: EntityOptions,
    state: Mutex<ModelState>,
    listeners: ListenerSet,
    events: EventEmitter,
}

/// A single entity mirrored against a store subtree.
///
/// `Model` is a cheap handle; clones share state. Attribute mutations
/// carry an [`Origin`]: local mutations are remembered as dirty and sent
/// by the next update, remote ones are applied silently with respect to
/// the write path so a notification is never echoed back to the store.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    /// Creates a model with `attributes`, then builds the child collections
    /// and child models registered on `schema`.
    ///
    /// `Null` attributes are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if a child factory fails, typically because the
    /// child's path needs the id and the model has none.
    pub fn new(
        schema: Arc<ModelSchema>,
        attributes: Map<String, Value>,
        options: EntityOptions,
    ) -> SyncResult<Self> {
        let attributes = attributes
            .into_iter()
            .filter(|(_, value)| !value.is_null())
            .collect();
        let model = Self {
            inner: Arc::new(ModelInner {
                token: EntityToken::next(),
                schema,
                options,
                state: Mutex::new(ModelState {
                    attributes,
                    dirty: BTreeSet::new(),
                    persisted: false,
                    owner: None,
                    collection: None,
                    child_collections: BTreeMap::new(),
                    child_models: BTreeMap::new(),
                }),
                listeners: ListenerSet::new(),
                events: EventEmitter::new(),
            }),
        };

        let schema = Arc::clone(&model.inner.schema);
        for (name, factory) in &schema.child_collections {
            model.add_child_collection(name.clone(), factory(&model)?);
        }
        for (name, factory) in &schema.child_models {
            model.add_child_model(name.clone(), factory(&model)?);
        }
        Ok(model)
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.inner.schema
    }

    /// Returns the construction options.
    pub fn options(&self) -> &EntityOptions {
        &self.inner.options
    }

    /// Returns the id, read from the schema's id attribute. Numeric ids
    /// are rendered in decimal.
    pub fn id(&self) -> Option<String> {
        let state = self.inner.state.lock();
        match state.attributes.get(self.inner.schema.id_attribute())? {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Returns true until the model has been stored or loaded from the
    /// store.
    pub fn is_new(&self) -> bool {
        !self.inner.state.lock().persisted
    }

    /// Returns one attribute.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().attributes.get(name).cloned()
    }

    /// Returns a copy of all attributes.
    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.state.lock().attributes.clone()
    }

    /// Returns the attributes as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(self.attributes())
    }

    /// Merges `attributes` into the model. A `Null` value unsets.
    pub fn set(&self, attributes: Map<String, Value>, origin: Origin) {
        let changes = {
            let mut state = self.inner.state.lock();
            attributes
                .into_iter()
                .filter_map(|(name, value)| state.write(name, value, origin))
                .collect::<Vec<_>>()
        };
        self.emit_changes(changes);
    }

    /// Sets one attribute. A `Null` value unsets.
    pub fn set_attr(&self, name: impl Into<String>, value: Value, origin: Origin) {
        let change = self.inner.state.lock().write(name.into(), value, origin);
        self.emit_changes(change.into_iter().collect());
    }

    /// Removes one attribute.
    pub fn unset(&self, name: &str, origin: Origin) {
        self.set_attr(name, Value::Null, origin);
    }

    /// Returns the locally changed attributes not yet written. Unset
    /// attributes map to `Null`.
    pub fn changed_attributes(&self) -> Map<String, Value> {
        let state = self.inner.state.lock();
        state
            .dirty
            .iter()
            .map(|name| {
                let value = state.attributes.get(name).cloned().unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect()
    }

    /// Returns the reference the model reads from.
    ///
    /// A collection member lives under its collection, keyed by id.
    /// Standalone models resolve their schema path.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the path cannot be resolved.
    pub fn reference(&self) -> SyncResult<Reference> {
        let id = self.id();
        if let Some(collection) = self.collection() {
            let id = id.ok_or_else(|| SyncError::configuration("collection member has no id"))?;
            return collection
                .reference()?
                .child(&id)
                .map_err(|err| SyncError::configuration(err.to_string()));
        }
        let ctx = PathContext::new(&self.inner.options.params, id.as_deref());
        resolve_reference(&self.inner.options.store, self.inner.schema.path(), &ctx)
    }

    /// Loads the model and keeps it mirrored against its subtree.
    ///
    /// Previous listeners of this model are released before the new ones
    /// are bound. The completion resolves with the raw stored value, or
    /// with [`SyncError::Dropped`] if a later fetch or a release superseded
    /// this one first.
    pub fn fetch(&self) -> Completion<Value> {
        let reference = match self.reference() {
            Ok(reference) => reference,
            Err(err) => return self.fail(err),
        };
        let generation = self.inner.listeners.bind(reference, self.child_handlers());
        let weak = Arc::downgrade(&self.inner);
        let (completer, completion) = pair();
        adapter::read_then(self, move |result| {
            let Some(model) = upgrade(&weak) else {
                return completer.complete(Err(SyncError::Dropped));
            };
            if !model.inner.listeners.is_current(generation) {
                debug!(generation, "discard superseded read");
                return completer.complete(Err(SyncError::Dropped));
            }
            match &result {
                Ok(value) => {
                    if let Value::Object(attributes) = value {
                        model.set(attributes.clone(), Origin::Remote);
                    }
                    if !value.is_null() {
                        model.inner.state.lock().persisted = true;
                    }
                    model.emit(&EntityEvent::Sync);
                }
                Err(err) => model.emit(&EntityEvent::Error(err.clone())),
            }
            completer.complete(result);
        });
        completion
    }

    /// Writes the model: a create if it was never stored, otherwise an
    /// update.
    pub fn save(&self, options: WriteOptions) -> Completion<()> {
        self.save_then(options, |_| {})
    }

    /// Like [`Model::save`]; `after` sees the outcome before the completion
    /// resolves.
    pub(crate) fn save_then<F>(&self, options: WriteOptions, after: F) -> Completion<()>
    where
        F: FnOnce(&SyncResult<()>) + Send + 'static,
    {
        let method = if self.is_new() {
            WriteMethod::Create
        } else {
            WriteMethod::Update
        };
        let request = match adapter::prepare(method, self, options) {
            Ok(request) => request,
            Err(err) => {
                after(&Err(err.clone()));
                return self.fail(err);
            }
        };
        let sent = std::mem::take(&mut self.inner.state.lock().dirty);
        let weak = Arc::downgrade(&self.inner);
        let (completer, completion) = pair();
        adapter::send(self, request, move |result| {
            if let Some(model) = upgrade(&weak) {
                match &result {
                    Ok(()) => {
                        model.inner.state.lock().persisted = true;
                        model.emit(&EntityEvent::Sync);
                    }
                    Err(err) => {
                        model.inner.state.lock().dirty.extend(sent);
                        model.emit(&EntityEvent::Error(err.clone()));
                    }
                }
            }
            after(&result);
            completer.complete(result);
        });
        completion
    }

    /// Deletes the model's subtree.
    ///
    /// A member of a collection that was never fetched is removed locally
    /// at once; otherwise the removal notification removes it. A model
    /// without an id has nothing stored and resolves without a write.
    pub fn destroy(&self) -> Completion<()> {
        let collection = self.collection();
        let Some(id) = self.id() else {
            if let Some(collection) = &collection {
                collection.remove_model(self);
            }
            return Completion::resolved(Ok(()));
        };
        let request = match adapter::prepare(WriteMethod::Delete, self, WriteOptions::new()) {
            Ok(request) => request,
            Err(err) => return self.fail(err),
        };
        if let Some(collection) = collection.filter(|c| !c.fetched()) {
            collection.remove(&id);
        }
        let weak = Arc::downgrade(&self.inner);
        let (completer, completion) = pair();
        adapter::send(self, request, move |result| {
            if let Some(model) = upgrade(&weak) {
                match &result {
                    Ok(()) => model.emit(&EntityEvent::Sync),
                    Err(err) => model.emit(&EntityEvent::Error(err.clone())),
                }
            }
            completer.complete(result);
        });
        completion
    }

    /// Registers an event listener.
    pub fn on(&self, callback: impl Fn(&EntityEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.events.on(callback)
    }

    /// Removes an event listener.
    pub fn off(&self, id: SubscriptionId) {
        self.inner.events.off(id);
    }

    /// Registers `collection` as a child, owned by this model. A child
    /// previously registered under `name` is detached.
    pub fn add_child_collection(&self, name: impl Into<String>, collection: Collection) {
        collection.set_owner(Some(self.inner.token));
        let previous = self
            .inner
            .state
            .lock()
            .child_collections
            .insert(name.into(), collection);
        if let Some(previous) = previous {
            previous.clear_owner(self.inner.token);
        }
    }

    /// Removes a child collection. Its owner is cleared if it still
    /// points at this model.
    pub fn remove_child_collection(&self, name: &str) -> Option<Collection> {
        let removed = self.inner.state.lock().child_collections.remove(name)?;
        removed.clear_owner(self.inner.token);
        Some(removed)
    }

    /// Returns a child collection.
    pub fn child_collection(&self, name: &str) -> Option<Collection> {
        self.inner.state.lock().child_collections.get(name).cloned()
    }

    /// Registers `model` as a child, owned by this model.
    pub fn add_child_model(&self, name: impl Into<String>, model: Model) {
        model.inner.state.lock().owner = Some(self.inner.token);
        let previous = self
            .inner
            .state
            .lock()
            .child_models
            .insert(name.into(), model);
        if let Some(previous) = previous {
            previous.clear_owner(self.inner.token);
        }
    }

    /// Removes a child model.
    pub fn remove_child_model(&self, name: &str) -> Option<Model> {
        let removed = self.inner.state.lock().child_models.remove(name)?;
        removed.clear_owner(self.inner.token);
        Some(removed)
    }

    /// Returns a child model.
    pub fn child_model(&self, name: &str) -> Option<Model> {
        self.inner.state.lock().child_models.get(name).cloned()
    }

    /// Returns the collection this model belongs to.
    pub fn collection(&self) -> Option<Collection> {
        self.inner
            .state
            .lock()
            .collection
            .as_ref()
            .and_then(WeakCollection::upgrade)
    }

    /// Returns the state of the model's own listeners.
    pub fn listener_state(&self) -> ListenerState {
        self.inner.listeners.state()
    }

    pub(crate) fn emit(&self, event: &EntityEvent) {
        self.inner.events.emit(event);
    }

    /// Makes `collection` the model's owner.
    pub(crate) fn attach(&self, token: EntityToken, collection: WeakCollection) {
        let mut state = self.inner.state.lock();
        state.owner = Some(token);
        state.collection = Some(collection);
    }

    /// Detaches the model from `owner`, if it is still the owner.
    pub(crate) fn clear_owner(&self, owner: EntityToken) {
        let mut state = self.inner.state.lock();
        if state.owner == Some(owner) {
            state.owner = None;
            state.collection = None;
        }
    }

    pub(crate) fn mark_persisted(&self) {
        self.inner.state.lock().persisted = true;
    }

    /// Applies one child of the model's subtree. An object child is merged
    /// into the attributes rather than replacing the whole set: attributes
    /// absent from the object are kept until a removal event unsets them.
    /// Any other value sets the attribute named by the child key.
    pub(crate) fn apply_remote_child(&self, snapshot: &Snapshot) {
        match (snapshot.value(), snapshot.key()) {
            (Value::Object(attributes), _) => self.set(attributes.clone(), Origin::Remote),
            (value, Some(key)) => self.set_attr(key, value.clone(), Origin::Remote),
            (_, None) => {}
        }
    }

    fn child_handlers(&self) -> ChildHandlers {
        let weak = Arc::downgrade(&self.inner);
        let handler = |apply: fn(&Model, &Snapshot)| -> ChildHandler {
            let weak = Weak::clone(&weak);
            Arc::new(move |snapshot: &Snapshot| {
                if let Some(model) = upgrade(&weak) {
                    trace!(key = ?snapshot.key(), "apply remote attribute");
                    apply(&model, snapshot);
                }
            })
        };
        ChildHandlers {
            added: handler(Model::apply_remote_child),
            changed: handler(Model::apply_remote_child),
            removed: handler(|model, snapshot| {
                if let Some(key) = snapshot.key() {
                    model.unset(key, Origin::Remote);
                }
            }),
        }
    }

    fn emit_changes(&self, changes: Vec<(String, Value)>) {
        if changes.is_empty() {
            return;
        }
        for (name, value) in changes {
            self.emit(&EntityEvent::ChangeAttr { name, value });
        }
        self.emit(&EntityEvent::Change);
    }

    fn fail<T>(&self, err: SyncError) -> Completion<T> {
        self.emit(&EntityEvent::Error(err.clone()));
        Completion::resolved(Err(err))
    }
}

impl ModelState {
    /// Writes one attribute and returns the change, if any.
    fn write(&mut self, name: String, value: Value, origin: Origin) -> Option<(String, Value)> {
        if origin == Origin::Remote {
            self.dirty.remove(&name);
        }
        let changed = if value.is_null() {
            self.attributes.remove(&name).is_some()
        } else if self.attributes.get(&name) != Some(&value) {
            self.attributes.insert(name.clone(), value.clone());
            true
        } else {
            false
        };
        if !changed {
            return None;
        }
        if origin == Origin::Local {
            self.dirty.insert(name.clone());
        }
        Some((name, value))
    }
}

fn upgrade(weak: &Weak<ModelInner>) -> Option<Model> {
    weak.upgrade().map(|inner| Model { inner })
}

impl Releasable for Model {
    fn token(&self) -> EntityToken {
        self.inner.token
    }

    fn owner(&self) -> Option<EntityToken> {
        self.inner.state.lock().owner
    }

    fn release_with(&self, mode: ReleaseMode) {
        self.inner.listeners.release();
        if mode == ReleaseMode::Shallow {
            return;
        }
        let (collections, models): (Vec<Collection>, Vec<Model>) = {
            let state = self.inner.state.lock();
            (
                state.child_collections.values().cloned().collect(),
                state.child_models.values().cloned().collect(),
            )
        };
        release_owned(
            self.inner.token,
            collections.iter().map(|c| c as &dyn Releasable),
        );
        release_owned(self.inner.token, models.iter().map(|m| m as &dyn Releasable));
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Model {}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Model")
            .field("token", &self.inner.token)
            .field("attributes", &state.attributes)
            .field("persisted", &state.persisted)
            .finish_non_exhaustive()
    }
}
