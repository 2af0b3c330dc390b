//! # Livetree Sync
//!
//! Synchronization and listener-lifecycle engine that mirrors local models
//! and collections against a live hierarchical store.
//!
//! This crate provides:
//! - Path resolution from templates and entity parameters
//! - Listener sets with generations, so stale notifications are discarded
//! - Cursor pagination over key-ordered queries
//! - A sync adapter mapping create/read/update/delete onto store writes
//! - Collection and model controllers with an explicit ownership tree
//!
//! ## Architecture
//!
//! A [`Collection`] or [`Model`] resolves its location, binds a
//! [`ListenerSet`] on it and applies `child_added`, `child_changed` and
//! `child_removed` notifications locally. Local writes go through the
//! [`adapter`]. Mutations applied from notifications carry
//! [`Origin::Remote`] and are never written back.
//!
//! ## Key Invariants
//!
//! - An entity holds at most one live listener set
//! - Rebinding releases the previous listener set first
//! - Releasing twice is a no-op
//! - A cascading release only reaches children still owned by the caller
//! - No loaded key appears twice in a collection
//!
//! ## Example
//!
//! ```rust
//! use livetree_store::MemoryStore;
//! use livetree_sync::{Collection, CollectionSchema, EntityOptions, ModelSchema, WriteOptions};
//! use serde_json::{json, Map};
//! use std::sync::Arc;
//!
//! let store = MemoryStore::new();
//! let model = Arc::new(ModelSchema::from_template("/messages/{id}").unwrap());
//! let schema = Arc::new(CollectionSchema::from_template("/messages", model).unwrap());
//! let messages = Collection::new(schema, EntityOptions::new(store.handle())).unwrap();
//!
//! let mut attributes = Map::new();
//! attributes.insert("sender".into(), json!("A"));
//! let (message, mut saved) = messages.create(attributes, WriteOptions::new()).unwrap();
//! assert_eq!(messages.len(), 1);
//!
//! store.run_until_idle();
//! assert_eq!(saved.try_take(), Some(Ok(())));
//! assert!(!message.is_new());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
mod collection;
mod completion;
mod config;
mod error;
mod events;
mod listener;
mod model;
mod pagination;
mod release;
mod resolver;
mod schema;

pub use adapter::{WriteMethod, CREATED_ATTRIBUTE, MODIFIED_ATTRIBUTE};
pub use collection::Collection;
pub use completion::Completion;
pub use config::{EntityOptions, FetchOptions, PathParams, SortOrder, WriteOptions};
pub use error::{SyncError, SyncResult};
pub use events::{EntityEvent, EventEmitter, SubscriptionId};
pub use listener::{ChildHandler, ChildHandlers, ListenerSet, ListenerState};
pub use model::{Model, Origin};
pub use pagination::{next_page_query, start_query, PageResult, Pagination, QueryState};
pub use release::{EntityToken, ReleaseMode, Releasable};
pub use resolver::{resolve_reference, PathContext, PathResolver, PathTemplate, ID_PARAM};
pub use schema::{
    ChildCollectionFactory, ChildModelFactory, CollectionSchema, ModelSchema, QueryCustomizer,
    DEFAULT_ID_ATTRIBUTE,
};
