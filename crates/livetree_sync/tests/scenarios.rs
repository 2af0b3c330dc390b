//! End-to-end scenarios against a seeded in-memory store.

use livetree_store::ServerValue;
use livetree_sync::adapter::{self, WriteMethod};
use livetree_sync::{
    EntityEvent, EntityOptions, FetchOptions, ListenerState, Model, ModelSchema, Origin, PageResult,
    Releasable, SortOrder, WriteOptions,
};
use livetree_testkit::prelude::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

fn record_events(model: &Model) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    model.on(move |event| sink.lock().push(event.name()));
    seen
}

#[test]
fn ascending_pagination_loads_all_pages() {
    init_test_logging();
    let store = seeded_store(5);
    let messages = messages_collection(&store);

    let mut fetched = messages.fetch(FetchOptions::new().with_page_size(2));
    let page = drain(&store, &mut fetched).unwrap();
    assert_eq!(messages.keys(), ["m1", "m2"]);
    assert_eq!(
        page,
        PageResult {
            new_items: 2,
            more_to_load: true,
            previous_len: 0
        }
    );

    let mut second = messages.load_more();
    let page = drain(&store, &mut second).unwrap();
    assert_eq!(messages.keys(), ["m1", "m2", "m3", "m4"]);
    assert!(page.more_to_load);
    assert_eq!(page.new_items, 2);
    assert_eq!(page.previous_len, 2);

    let mut third = messages.load_more();
    let page = drain(&store, &mut third).unwrap();
    assert_eq!(messages.keys(), message_keys(5));
    assert!(!page.more_to_load);
    assert_eq!(page.new_items, 1);
    assert!(!messages.more_to_load());
}

#[test]
fn ascending_pagination_with_larger_page() {
    let store = seeded_store(5);
    let messages = messages_collection(&store);

    let mut fetched = messages.fetch(FetchOptions::new().with_page_size(3));
    drain(&store, &mut fetched).unwrap();
    assert_eq!(messages.keys(), ["m1", "m2", "m3"]);

    let mut more = messages.load_more();
    let page = drain(&store, &mut more).unwrap();
    assert_eq!(messages.keys(), message_keys(5));
    assert_eq!(page.new_items, 2);
    assert!(!page.more_to_load);
}

#[test]
fn descending_pagination_loads_most_recent_first() {
    let store = seeded_store(5);
    let messages = messages_collection(&store);
    let options = FetchOptions::new()
        .with_page_size(2)
        .with_order(SortOrder::Desc);

    let mut fetched = messages.fetch(options);
    drain(&store, &mut fetched).unwrap();
    assert_eq!(messages.keys(), ["m5", "m4"]);

    let mut second = messages.load_more();
    let page = drain(&store, &mut second).unwrap();
    assert!(page.more_to_load);
    assert_eq!(messages.keys(), ["m5", "m4", "m3", "m2"]);

    let mut third = messages.load_more();
    let page = drain(&store, &mut third).unwrap();
    assert!(!page.more_to_load);
    assert_eq!(messages.keys(), ["m5", "m4", "m3", "m2", "m1"]);
}

#[test]
fn create_before_fetch_inserts_synchronously() {
    let store = fixed_clock_store();
    let messages = messages_collection(&store);

    let (message, mut saved) = messages
        .create(object(json!({ "sender": "A" })), WriteOptions::new())
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert!(saved.try_take().is_none());
    assert!(message.is_new());

    let key = message.id().unwrap();
    assert_eq!(key.len(), livetree_store::PUSH_KEY_LEN);
    assert_eq!(messages.at(0), Some(message.clone()));

    store.run_until_idle();
    assert_eq!(saved.try_take(), Some(Ok(())));
    assert!(!message.is_new());

    let write = store.writes().pop().unwrap();
    assert_eq!(write.path.to_string(), "/messages");
    let payload = &write.data[&key];
    assert_eq!(payload["sender"], json!("A"));
    assert!(ServerValue::is_timestamp(&payload["created"]));
    assert_eq!(
        store.value(&format!("/messages/{key}/created")).unwrap(),
        json!(FIXED_NOW)
    );
}

#[test]
fn create_after_fetch_waits_for_notification() {
    let store = seeded_store(2);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    let adds = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&adds);
    messages.on(move |event| {
        if matches!(event, EntityEvent::Add { .. }) {
            *sink.lock() += 1;
        }
    });

    let (message, mut saved) = messages
        .create(object(json!({ "id": "m9", "sender": "B" })), WriteOptions::new())
        .unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!messages.contains("m9"));

    drain(&store, &mut saved).unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages.get("m9"), Some(message.clone()));
    assert_eq!(*adds.lock(), 1);
    assert_eq!(message.get("created"), Some(json!(FIXED_NOW)));
}

#[test]
fn cascade_release_detaches_the_ownership_tree() {
    let store = seeded_store(3);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    let message = messages.get("m1").unwrap();
    let attachments = message.child_collection("attachments").unwrap();
    let mut attachments_fetched = attachments.fetch(FetchOptions::new());
    drain(&store, &mut attachments_fetched).unwrap();
    assert_eq!(attachments.keys(), ["a1"]);

    let author = user_model(&store, "u1");
    message.add_child_model("author", author.clone());
    let mut author_fetched = author.fetch();
    drain(&store, &mut author_fetched).unwrap();
    assert_eq!(store.listener_count(), 9);

    let attachment = attachments.get("a1").unwrap();
    let attachment_events = record_events(&attachment);
    let author_events = record_events(&author);

    messages.release_cascade();
    assert_eq!(store.listener_count(), 0);

    store.set("/messages/m1/sender", json!("Edited")).unwrap();
    store.set("/messages/m7", json!({ "id": "m7" })).unwrap();
    store.set("/attachments/m1/a1/url", json!("modified.zip")).unwrap();
    store.set("/attachments/m1/a2", json!({ "id": "a2" })).unwrap();
    store.set("/users/u1/name", json!("Bar")).unwrap();
    store.run_until_idle();

    assert_eq!(messages.len(), 3);
    assert_eq!(message.get("sender"), Some(json!("Sender1")));
    assert_eq!(attachments.keys(), ["a1"]);
    assert_eq!(attachment.get("url"), Some(json!("file.zip")));
    assert_eq!(author.get("name"), Some(json!("Foo")));
    assert!(attachment_events.lock().is_empty());
    assert!(author_events.lock().is_empty());
}

#[test]
fn cascade_skips_reparented_children() {
    let store = seeded_store(2);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    let m1 = messages.get("m1").unwrap();
    let m2 = messages.get("m2").unwrap();
    let attachments = m1.child_collection("attachments").unwrap();
    m2.add_child_collection("borrowed", attachments.clone());
    assert_eq!(attachments.owner(), Some(m2.token()));

    let mut attachments_fetched = attachments.fetch(FetchOptions::new());
    drain(&store, &mut attachments_fetched).unwrap();

    m1.release_cascade();
    assert_eq!(attachments.listener_state(), ListenerState::Attached);

    m2.release_cascade();
    assert_eq!(attachments.listener_state(), ListenerState::Detached);
}

#[test]
fn fetch_single_model_without_collection() {
    let store = seeded_store(1);
    let user = user_model(&store, "u1");
    let mut fetched = user.fetch();
    drain(&store, &mut fetched).unwrap();
    assert_eq!(user.to_json(), to_value(&user_record()));
    user.release();
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn fetch_from_key_range() {
    let store = seeded_store(5);
    let messages = messages_collection(&store);
    let range = messages
        .query()
        .unwrap()
        .order_by_key()
        .start_at("m2")
        .end_at("m4");
    let mut fetched = messages.fetch_from(range, FetchOptions::new());
    let page = drain(&store, &mut fetched).unwrap();
    assert_eq!(page.new_items, 3);
    assert_eq!(messages.keys(), ["m2", "m3", "m4"]);
}

#[test]
fn destroy_through_limited_collection() {
    let store = seeded_store(5);
    let messages = messages_collection(&store);
    let removed = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&removed);
    messages.on(move |event| {
        if let EntityEvent::Remove { key } = event {
            sink.lock().push(key.clone());
        }
    });

    let limited = messages.query().unwrap().limit_to_first(2);
    let mut fetched = messages.fetch_from(limited, FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    let mut destroyed = messages.at(0).unwrap().destroy();
    assert_eq!(messages.len(), 2);
    drain(&store, &mut destroyed).unwrap();

    assert_eq!(removed.lock().first().map(String::as_str), Some("m1"));
    assert!(!messages.contains("m1"));
    assert_eq!(store.value("/messages/m1").unwrap(), Value::Null);
    assert_eq!(store.value("/messages/m2/id").unwrap(), json!("m2"));
}

#[test]
fn destroy_on_unfetched_collection_removes_locally() {
    let store = seeded_store(1);
    let messages = messages_collection(&store);
    let message = messages
        .build(object(json!({ "id": "m1" })))
        .unwrap();
    messages.add(message.clone());

    let mut destroyed = message.destroy();
    assert!(messages.is_empty());
    drain(&store, &mut destroyed).unwrap();
    assert_eq!(store.value("/messages/m1").unwrap(), Value::Null);
}

#[test]
fn edits_from_another_entity_propagate() {
    let store = seeded_store(5);
    let messages = messages_collection(&store);
    let range = messages
        .query()
        .unwrap()
        .order_by_key()
        .start_at("m2")
        .end_at("m4");
    let mut fetched = messages.fetch_from(range, FetchOptions::new());
    drain(&store, &mut fetched).unwrap();
    let loaded = messages.get("m2").unwrap();
    let changes = record_events(&loaded);

    let standalone = Model::new(
        message_schema(),
        object(json!({ "id": "m2" })),
        EntityOptions::new(store.handle()),
    )
    .unwrap();
    let mut standalone_fetched = standalone.fetch();
    drain(&store, &mut standalone_fetched).unwrap();

    standalone.set_attr("sender", json!("EditedSender"), Origin::Local);
    let mut saved = standalone.save(WriteOptions::new());
    drain(&store, &mut saved).unwrap();

    assert_eq!(loaded.get("sender"), Some(json!("EditedSender")));
    assert!(changes.lock().iter().any(|name| name == "change:sender"));
    assert!(loaded.changed_attributes().is_empty());
}

#[test]
fn member_update_writes_only_changed_paths() {
    let store = seeded_store(2);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    let m1 = messages.get("m1").unwrap();
    m1.set_attr("message", json!("edited"), Origin::Local);
    let mut saved = m1.save(WriteOptions::new());
    drain(&store, &mut saved).unwrap();

    let write = store.writes().pop().unwrap();
    assert_eq!(write.path.to_string(), "/messages");
    let mut keys: Vec<_> = write.data.keys().cloned().collect();
    keys.sort();
    assert_eq!(keys, ["m1/created", "m1/message", "m1/modified"]);
    assert_eq!(store.value("/messages/m1/sender").unwrap(), json!("Sender1"));
    assert_eq!(store.value("/messages/m1/modified").unwrap(), json!(FIXED_NOW));
}

#[test]
fn model_schema_with_custom_id_attribute() {
    let store = fixed_clock_store();
    store.set("/rooms/lobby", json!({ "title": "Lobby" })).unwrap();
    store.run_until_idle();

    let schema = Arc::new(
        ModelSchema::from_template("/rooms/{slug}")
            .unwrap()
            .with_id_attribute("slug"),
    );
    let room = Model::new(
        schema,
        object(json!({ "slug": "lobby" })),
        EntityOptions::new(store.handle()).with_param("slug", "lobby"),
    )
    .unwrap();
    assert_eq!(room.id().as_deref(), Some("lobby"));

    let mut fetched = room.fetch();
    drain(&store, &mut fetched).unwrap();
    assert_eq!(room.get("title"), Some(json!("Lobby")));
}

#[test]
fn adapter_reads_and_writes_a_standalone_model() {
    let store = seeded_store(0);
    let user = user_model(&store, "u1");

    let mut read = adapter::read(&user);
    assert_eq!(drain(&store, &mut read).unwrap(), to_value(&user_record()));
    assert!(user.get("email").is_none());
    assert_eq!(store.listener_count(), 0);

    user.set_attr("name", json!("Bar"), Origin::Local);
    let mut updated = adapter::write(
        WriteMethod::Update,
        &user,
        WriteOptions::without_timestamps(),
    );
    drain(&store, &mut updated).unwrap();
    assert_eq!(store.value("/users/u1/name").unwrap(), json!("Bar"));
    assert_eq!(store.value("/users/u1/email").unwrap(), json!("foo@bar.it"));

    let mut deleted = adapter::write(WriteMethod::Delete, &user, WriteOptions::new());
    drain(&store, &mut deleted).unwrap();
    assert_eq!(store.value("/users/u1").unwrap(), Value::Null);
    assert_eq!(store.writes().last().unwrap().path.to_string(), "/users");
}
