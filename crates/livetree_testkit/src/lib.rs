//! # Livetree Testkit
//!
//! Test utilities for Livetree.
//!
//! This crate provides:
//! - Seeded stores and the message/attachment/user schemas used across tests
//! - Property-based test generators using proptest
//! - One-call test logging setup
//!
//! ## Usage
//!
//! ```rust
//! use livetree_sync::FetchOptions;
//! use livetree_testkit::prelude::*;
//!
//! let store = seeded_store(5);
//! let messages = messages_collection(&store);
//! let mut fetched = messages.fetch(FetchOptions::new());
//! let page = drain(&store, &mut fetched).unwrap();
//! assert_eq!(page.new_items, 5);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
