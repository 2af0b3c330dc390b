//! Translation of local persistence intents into store operations.
//!
//! Every operation resolves its target reference afresh and performs a
//! single round trip. Writes issued for a collection member are rooted at
//! the collection location and keyed by the member id, so several members
//! can be written with one multi-path update. No locking is attempted: the
//! store applies writes last-write-wins.

use crate::completion::{pair, Completion};
use crate::config::WriteOptions;
use crate::error::{SyncError, SyncResult};
use crate::events::EntityEvent;
use crate::model::Model;
use livetree_store::{Reference, ServerValue, Snapshot};
use serde_json::{Map, Value};
use tracing::debug;

/// Attribute stamped with the server time on creation.
pub const CREATED_ATTRIBUTE: &str = "created";

/// Attribute stamped with the server time on every write.
pub const MODIFIED_ATTRIBUTE: &str = "modified";

/// A remote write intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    /// Persist a model that has never been stored.
    Create,
    /// Persist attribute changes of a stored model.
    Update,
    /// Remove a model's subtree.
    Delete,
}

/// A prepared write: the reference it is rooted at and its partial tree.
#[derive(Debug, Clone)]
pub(crate) struct WriteRequest {
    pub(crate) reference: Reference,
    pub(crate) payload: Map<String, Value>,
}

/// Reads the model's location once. Absent data yields `Value::Null`.
pub fn read(model: &Model) -> Completion<Value> {
    let (completer, completion) = pair();
    read_then(model, move |result| completer.complete(result));
    completion
}

/// Issues `method` for `model` with a single store round trip.
pub fn write(method: WriteMethod, model: &Model, options: WriteOptions) -> Completion<()> {
    match prepare(method, model, options) {
        Ok(request) => {
            let (completer, completion) = pair();
            send(model, request, move |result| completer.complete(result));
            completion
        }
        Err(err) => Completion::resolved(Err(err)),
    }
}

/// Reads the model's location and hands the value to `done`. A path that
/// cannot be resolved is reported to `done` before this returns.
pub(crate) fn read_then<F>(model: &Model, done: F)
where
    F: FnOnce(SyncResult<Value>) + Send + 'static,
{
    let reference = match model.reference() {
        Ok(reference) => reference,
        Err(err) => return done(Err(err)),
    };
    model.emit(&EntityEvent::Request {
        path: reference.path().to_string(),
    });
    reference.once_value(move |result| {
        done(result.map(Snapshot::into_value).map_err(SyncError::from));
    });
}

/// Resolves the target reference and builds the payload of a write.
pub(crate) fn prepare(
    method: WriteMethod,
    model: &Model,
    options: WriteOptions,
) -> SyncResult<WriteRequest> {
    let (stamp_created, stamp_modified) = options.resolve(model.options());
    let member = member_key(model)?;
    let (reference, payload) = match (method, member) {
        (WriteMethod::Create, Some(key)) => (
            collection_reference(model)?,
            create_payload(&model.attributes(), Some(&key), stamp_created, stamp_modified),
        ),
        (WriteMethod::Create, None) => (
            model.reference()?,
            create_payload(&model.attributes(), None, stamp_created, stamp_modified),
        ),
        (WriteMethod::Update, Some(key)) => (
            collection_reference(model)?,
            update_payload(
                &model.attributes(),
                &model.changed_attributes(),
                Some(&key),
                stamp_created,
                stamp_modified,
            ),
        ),
        (WriteMethod::Update, None) => {
            let attributes = model.attributes();
            let mut written = attributes.clone();
            written.extend(
                model
                    .changed_attributes()
                    .into_iter()
                    .filter(|(_, value)| value.is_null()),
            );
            (
                model.reference()?,
                update_payload(&attributes, &written, None, stamp_created, stamp_modified),
            )
        }
        (WriteMethod::Delete, Some(key)) => (collection_reference(model)?, tombstone(&key)),
        (WriteMethod::Delete, None) => {
            let own = model.reference()?;
            let (Some(parent), Some(key)) = (own.parent(), own.key()) else {
                return Err(SyncError::configuration("cannot delete the store root"));
            };
            let payload = tombstone(key);
            (parent, payload)
        }
    };
    Ok(WriteRequest { reference, payload })
}

/// Sends a prepared write and hands the acknowledgement to `done`.
pub(crate) fn send<F>(model: &Model, request: WriteRequest, done: F)
where
    F: FnOnce(SyncResult<()>) + Send + 'static,
{
    let WriteRequest { reference, payload } = request;
    let path = reference.path().to_string();
    debug!(%path, keys = payload.len(), "issue write");
    model.emit(&EntityEvent::Request { path: path.clone() });
    reference.update(payload, move |result| {
        debug!(%path, ok = result.is_ok(), "write acknowledged");
        done(result.map_err(SyncError::from));
    });
}

/// Returns the member key if the model belongs to a collection.
fn member_key(model: &Model) -> SyncResult<Option<String>> {
    if model.collection().is_none() {
        return Ok(None);
    }
    model
        .id()
        .map(Some)
        .ok_or_else(|| SyncError::configuration("collection member has no id"))
}

fn collection_reference(model: &Model) -> SyncResult<Reference> {
    model
        .collection()
        .ok_or_else(|| SyncError::configuration("model left its collection"))?
        .reference()
}

/// Builds the payload of a create.
pub(crate) fn create_payload(
    attributes: &Map<String, Value>,
    member_key: Option<&str>,
    stamp_created: bool,
    stamp_modified: bool,
) -> Map<String, Value> {
    let mut snapshot = attributes.clone();
    if stamp_created {
        snapshot.insert(CREATED_ATTRIBUTE.into(), ServerValue::timestamp());
    }
    if stamp_modified {
        snapshot.insert(MODIFIED_ATTRIBUTE.into(), ServerValue::timestamp());
    }
    match member_key {
        Some(key) => {
            let mut payload = Map::new();
            payload.insert(key.to_string(), Value::Object(snapshot));
            payload
        }
        None => snapshot,
    }
}

/// Builds the payload of an update as multi-path entries.
pub(crate) fn update_payload(
    attributes: &Map<String, Value>,
    changed: &Map<String, Value>,
    member_key: Option<&str>,
    stamp_created: bool,
    stamp_modified: bool,
) -> Map<String, Value> {
    let path = |attr: &str| match member_key {
        Some(key) => format!("{key}/{attr}"),
        None => attr.to_string(),
    };
    let mut payload: Map<String, Value> = changed
        .iter()
        .map(|(attr, value)| (path(attr), value.clone()))
        .collect();
    if stamp_modified {
        payload.insert(path(MODIFIED_ATTRIBUTE), ServerValue::timestamp());
    }
    if stamp_created && !attributes.contains_key(CREATED_ATTRIBUTE) {
        payload.insert(path(CREATED_ATTRIBUTE), ServerValue::timestamp());
    }
    payload
}

fn tombstone(key: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(key.to_string(), Value::Null);
    payload
}
