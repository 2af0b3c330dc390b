//! Store fixtures and entity schemas.
//!
//! The fixture tree mirrors a small chat application:
//!
//! ```text
//! /messages/m1..mN            { id, sender, message }
//! /attachments/m1/a1          { id, url }
//! /users/u1                   { id, email, name }
//! ```
//!
//! A message owns an `attachments` collection parameterized by its id.

use livetree_store::{MemoryStore, StoreResult};
use livetree_sync::{
    Collection, CollectionSchema, Completion, EntityOptions, Model, ModelSchema, SyncError,
    SyncResult,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Clock value of [`fixed_clock_store`] and [`seeded_store`], in
/// milliseconds.
pub const FIXED_NOW: u64 = 1_700_000_000_000;

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Message id, equal to its key.
    pub id: String,
    /// Sender name.
    pub sender: String,
    /// Message body.
    pub message: String,
}

impl MessageRecord {
    /// The record seeded under key `m{n}`.
    pub fn numbered(n: usize) -> Self {
        Self {
            id: message_key(n),
            sender: format!("Sender{n}"),
            message: format!("Message {n}"),
        }
    }
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// User id.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name.
    pub name: String,
}

/// Returns the key of the `n`th seeded message.
pub fn message_key(n: usize) -> String {
    format!("m{n}")
}

/// Returns the keys `m1..mN` in insertion order.
pub fn message_keys(n: usize) -> Vec<String> {
    (1..=n).map(message_key).collect()
}

/// Creates an empty store whose clock always reads [`FIXED_NOW`].
pub fn fixed_clock_store() -> MemoryStore {
    MemoryStore::with_clock(Arc::new(|| FIXED_NOW))
}

/// Creates a fixed-clock store holding `n` messages, attachment `a1` of
/// `m1` and user `u1`. The queue is drained before returning.
pub fn seeded_store(n: usize) -> MemoryStore {
    let store = fixed_clock_store();
    seed_messages(&store, n).expect("seed messages");
    store
        .set("/attachments/m1/a1", serde_json::json!({ "id": "a1", "url": "file.zip" }))
        .expect("seed attachment");
    store
        .set("/users/u1", to_value(&user_record()))
        .expect("seed user");
    store.run_until_idle();
    store
}

/// Writes messages `m1..mN`. The queue is left undrained.
///
/// # Errors
///
/// Returns an error if a message path is invalid.
pub fn seed_messages(store: &MemoryStore, n: usize) -> StoreResult<()> {
    for i in 1..=n {
        let record = MessageRecord::numbered(i);
        store.set(&format!("/messages/{}", record.id), to_value(&record))?;
    }
    Ok(())
}

/// The user stored under `/users/u1`.
pub fn user_record() -> UserRecord {
    UserRecord {
        id: "u1".into(),
        email: "foo@bar.it".into(),
        name: "Foo".into(),
    }
}

/// Schema of users at `/users/{id}`.
pub fn user_schema() -> Arc<ModelSchema> {
    Arc::new(ModelSchema::from_template("/users/{id}").expect("user template"))
}

/// Schema of attachments at `/attachments/{messageId}/{id}`.
pub fn attachment_schema() -> Arc<ModelSchema> {
    Arc::new(
        ModelSchema::from_template("/attachments/{messageId}/{id}").expect("attachment template"),
    )
}

/// Schema of the attachments of one message.
pub fn attachments_schema() -> Arc<CollectionSchema> {
    Arc::new(
        CollectionSchema::from_template("/attachments/{messageId}", attachment_schema())
            .expect("attachments template"),
    )
}

/// Schema of messages at `/messages/{id}`. Every message owns an
/// `attachments` collection; building a message without id fails.
pub fn message_schema() -> Arc<ModelSchema> {
    let schema = ModelSchema::from_template("/messages/{id}")
        .expect("message template")
        .with_child_collection("attachments", |message: &Model| -> SyncResult<Collection> {
            let id = message
                .id()
                .ok_or_else(|| SyncError::configuration("message id is mandatory"))?;
            Collection::new(
                attachments_schema(),
                message.options().clone().with_param("messageId", id),
            )
        });
    Arc::new(schema)
}

/// Schema of the `/messages` collection.
pub fn messages_schema() -> Arc<CollectionSchema> {
    Arc::new(
        CollectionSchema::from_template("/messages", message_schema())
            .expect("messages template"),
    )
}

/// Creates an unfetched `/messages` collection on `store`.
pub fn messages_collection(store: &MemoryStore) -> Collection {
    Collection::new(messages_schema(), EntityOptions::new(store.handle()))
        .expect("messages collection")
}

/// Creates an unfetched attachments collection of `message_id`.
pub fn attachments_collection(store: &MemoryStore, message_id: &str) -> Collection {
    let options = EntityOptions::new(store.handle()).with_param("messageId", message_id);
    Collection::new(attachments_schema(), options).expect("attachments collection")
}

/// Creates a standalone user model with id `id`.
pub fn user_model(store: &MemoryStore, id: &str) -> Model {
    Model::new(
        user_schema(),
        object(serde_json::json!({ "id": id })),
        EntityOptions::new(store.handle()),
    )
    .expect("user model")
}

/// Creates a standalone attachment model of `message_id`.
pub fn attachment_model(store: &MemoryStore, message_id: &str, id: &str) -> Model {
    Model::new(
        attachment_schema(),
        object(serde_json::json!({ "id": id })),
        EntityOptions::new(store.handle()).with_param("messageId", message_id),
    )
    .expect("attachment model")
}

/// Unwraps a JSON object, returning an empty map for other values.
pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Serializes a fixture record.
pub fn to_value<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).expect("fixture records serialize")
}

/// Drains the store queue and takes the completion's result.
///
/// # Panics
///
/// Panics if the completion is still pending once the queue is idle.
pub fn drain<T>(store: &MemoryStore, completion: &mut Completion<T>) -> SyncResult<T> {
    store.run_until_idle();
    completion
        .try_take()
        .expect("completion pending after the queue drained")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_store_contains_fixture_tree() {
        let store = seeded_store(3);
        let m2: MessageRecord =
            serde_json::from_value(store.value("/messages/m2").unwrap()).unwrap();
        assert_eq!(m2, MessageRecord::numbered(2));
        assert_eq!(store.value("/messages/m4").unwrap(), Value::Null);
        assert_eq!(store.value("/users/u1").unwrap(), to_value(&user_record()));
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn message_owns_attachments() {
        let store = seeded_store(1);
        let message = Model::new(
            message_schema(),
            object(serde_json::json!({ "id": "m1" })),
            EntityOptions::new(store.handle()),
        )
        .unwrap();
        let attachments = message.child_collection("attachments").unwrap();
        assert_eq!(
            attachments.reference().unwrap().path().to_string(),
            "/attachments/m1"
        );
    }

    #[test]
    fn message_without_id_is_rejected() {
        let store = fixed_clock_store();
        let err = Model::new(message_schema(), Map::new(), EntityOptions::new(store.handle()))
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
