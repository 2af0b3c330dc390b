//! # Livetree Store
//!
//! Reference/query abstraction over a remote hierarchical key-value store
//! that emits live child notifications.
//!
//! This crate is the boundary between the sync engine and the store client.
//! It knows nothing about models or collections.
//!
//! ## Design Principles
//!
//! - A [`Reference`] is a location plus optional ordering and windowing
//! - Range bounds (`start_at`, `end_at`) are inclusive
//! - Continuations never run inside the call that registered them
//! - Each reference handle owns the listeners registered through it
//!
//! ## Available Backends
//!
//! - [`MemoryStore`] - live in-memory store driven by an explicit event queue
//!
//! ## Example
//!
//! ```rust
//! use livetree_store::{ChildEvent, MemoryStore, Snapshot};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! store.set("/messages/m1", json!({ "text": "hello" })).unwrap();
//!
//! let messages = store.handle().reference("/messages").unwrap();
//! messages.on(ChildEvent::Added, Arc::new(|snap: &Snapshot| {
//!     assert_eq!(snap.key(), Some("m1"));
//! }));
//! store.run_until_idle();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod keys;
mod memory;
mod path;
mod query;
mod reference;

pub use backend::{
    ChildCallback, ChildEvent, HandleId, ListenerId, ReadCallback, ServerValue, Snapshot,
    StoreBackend, Task, WriteCallback,
};
pub use error::{StoreError, StoreResult};
pub use keys::{PushKeyGenerator, PUSH_KEY_LEN};
pub use memory::{Clock, MemoryStore, WriteRecord};
pub use path::{compare_keys, StorePath};
pub use query::{Limit, QuerySpec};
pub use reference::{Reference, StoreHandle};
