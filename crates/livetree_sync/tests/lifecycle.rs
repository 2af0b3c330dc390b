//! Listener lifecycle, feedback suppression and error propagation.

use livetree_sync::{
    Collection, EntityEvent, EntityOptions, FetchOptions, ListenerState, Model, Origin,
    PageResult, Releasable, SyncError, WriteOptions,
};
use livetree_testkit::prelude::*;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

fn record_errors(collection: &Collection) -> Arc<Mutex<Vec<SyncError>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    collection.on(move |event| {
        if let EntityEvent::Error(err) = event {
            sink.lock().push(err.clone());
        }
    });
    seen
}

#[test]
fn release_twice_matches_release_once() {
    let store = seeded_store(3);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    messages.release();
    let after_once = (store.listener_count(), messages.listener_state(), messages.keys());
    messages.release();
    let after_twice = (store.listener_count(), messages.listener_state(), messages.keys());
    assert_eq!(after_once, after_twice);
    assert_eq!(after_twice.1, ListenerState::Detached);
}

#[test]
fn refetch_releases_previous_listeners() {
    let store = seeded_store(3);
    let messages = messages_collection(&store);

    let mut first = messages.fetch(FetchOptions::new());
    let mut second = messages.fetch(FetchOptions::new());
    assert_eq!(store.listener_count(), 3);

    store.run_until_idle();
    assert_eq!(first.try_take(), Some(Err(SyncError::Dropped)));
    let page = second.try_take().unwrap().unwrap();
    assert_eq!(page.new_items, 3);
    assert_eq!(messages.keys(), message_keys(3));
}

#[test]
fn notifications_queued_before_release_are_discarded() {
    let store = seeded_store(2);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();

    store.set("/messages/m8", json!({ "id": "m8" })).unwrap();
    store.set("/messages/m1/sender", json!("Late")).unwrap();
    assert!(store.pending() > 0);
    messages.release();
    store.run_until_idle();

    assert_eq!(messages.keys(), ["m1", "m2"]);
    assert_eq!(
        messages.get("m1").unwrap().get("sender"),
        Some(json!("Sender1"))
    );
}

#[test]
fn remote_changes_are_never_written_back() {
    let store = seeded_store(2);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new());
    drain(&store, &mut fetched).unwrap();
    let user = user_model(&store, "u1");
    let mut user_fetched = user.fetch();
    drain(&store, &mut user_fetched).unwrap();
    let writes_before = store.writes().len();

    store.set("/messages/m1/sender", json!("Remote")).unwrap();
    store.set("/users/u1/name", json!("Remote")).unwrap();
    store.run_until_idle();
    assert_eq!(store.writes().len(), writes_before + 2);

    let m1 = messages.get("m1").unwrap();
    assert_eq!(m1.get("sender"), Some(json!("Remote")));
    assert!(m1.changed_attributes().is_empty());
    assert!(user.changed_attributes().is_empty());

    let mut saved = m1.save(WriteOptions::without_timestamps());
    drain(&store, &mut saved).unwrap();
    let write = store.writes().pop().unwrap();
    assert!(!write.data.contains_key("m1/sender"));
}

#[test]
fn load_more_before_fetch_resolves_through_queue() {
    let store = seeded_store(3);
    let messages = messages_collection(&store);

    let mut more = messages.load_more();
    assert!(more.try_take().is_none());
    store.run_until_idle();
    assert_eq!(more.try_take(), Some(Ok(PageResult::exhausted(0))));
    assert_eq!(store.listener_count(), 0);
    assert!(messages.is_empty());
    assert!(!messages.fetched());
}

#[test]
fn load_more_after_exhaustion_skips_the_store() {
    let store = seeded_store(3);
    let messages = messages_collection(&store);
    let mut fetched = messages.fetch(FetchOptions::new().with_page_size(2));
    drain(&store, &mut fetched).unwrap();
    let mut more = messages.load_more();
    assert!(!drain(&store, &mut more).unwrap().more_to_load);

    store.fail_next("would fail if the store were read");
    let mut again = messages.load_more();
    assert_eq!(drain(&store, &mut again), Ok(PageResult::exhausted(3)));
}

#[tokio::test]
async fn fetch_failure_reaches_completion_and_event() {
    let store = seeded_store(3);
    let messages = messages_collection(&store);
    let errors = record_errors(&messages);

    store.fail_next("connection reset");
    let fetched = messages.fetch(FetchOptions::new());
    store.run_until_idle();

    assert_eq!(fetched.await, Err(SyncError::transport("connection reset")));
    assert_eq!(
        errors.lock().as_slice(),
        &[SyncError::transport("connection reset")]
    );
}

#[test]
fn save_failure_emits_error_on_model() {
    let store = seeded_store(1);
    let user = user_model(&store, "u1");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    user.on(move |event| sink.lock().push(event.name()));

    store.fail_next("permission denied");
    let mut saved = user.save(WriteOptions::new());
    let result = drain(&store, &mut saved);
    assert_eq!(result, Err(SyncError::transport("permission denied")));
    assert_eq!(seen.lock().as_slice(), &["request", "error"]);
    assert!(user.is_new());
}

#[test]
fn unresolved_path_parameter_is_a_configuration_error() {
    let store = seeded_store(1);
    let err = Collection::new(attachments_schema(), EntityOptions::new(store.handle()))
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("messageId"));

    let anonymous = Model::new(
        user_schema(),
        Default::default(),
        EntityOptions::new(store.handle()),
    )
    .unwrap();
    let mut fetched = anonymous.fetch();
    assert!(matches!(
        fetched.try_take(),
        Some(Err(SyncError::Configuration { .. }))
    ));
    assert_eq!(anonymous.listener_state(), ListenerState::Detached);
    assert_eq!(store.listener_count(), 0);
}

#[test]
fn model_fetch_releases_previous_reference() {
    let store = seeded_store(1);
    let attachment = attachment_model(&store, "m1", "a1");
    let mut first = attachment.fetch();
    drain(&store, &mut first).unwrap();
    assert_eq!(store.listeners_at("/attachments/m1/a1"), 3);

    let mut second = attachment.fetch();
    drain(&store, &mut second).unwrap();
    assert_eq!(store.listeners_at("/attachments/m1/a1"), 3);
    assert_eq!(attachment.get("url"), Some(json!("file.zip")));

    attachment.set_attr("url", json!("local.zip"), Origin::Local);
    let mut saved = attachment.save(WriteOptions::new());
    drain(&store, &mut saved).unwrap();
    assert_eq!(
        store.value("/attachments/m1/a1/url").unwrap(),
        json!("local.zip")
    );
}
