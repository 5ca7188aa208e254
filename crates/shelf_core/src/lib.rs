//! # ShelfDB Core
//!
//! Convenience layer over a versioned object-store engine.
//!
//! This crate provides:
//! - Declarative schema migrations driven by an ordered list of version
//!   deltas
//! - A per-collection query and mutation API synthesized from the
//!   collection's primary key and indexes
//! - Record and index-value normalization chains
//! - A one-shot, replay-capable outcome notifier for the open handshake
//!
//! ```rust
//! use shelf_core::{open, KeyOptions, MemoryEngine, VersionDelta};
//! use std::sync::Arc;
//!
//! let deltas: Vec<VersionDelta> = vec![Box::new(|ctx| {
//!     ctx.create_collection("users", KeyOptions::path("id"), "email")
//! })];
//! let ready = open(Arc::new(MemoryEngine::new()), "app", deltas).unwrap();
//! ready.on_success(|conn| {
//!     let users = conn.store("users").unwrap();
//!     assert_eq!(users.key_path(), Some("id"));
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod migration;
mod outcome;
mod store;

pub use connection::{Connection, ScanItem};
pub use error::{CoreError, CoreResult, OpenError};
pub use migration::{open, open_with, MigrationContext, VersionDelta};
pub use outcome::{Outcome, OutcomeNotifier};
pub use store::{accessor_name, IndexBinding, Normalizer, Store, StoreMeta};

pub use shelf_engine::{
    Engine, EngineError, IndexSpec, IntoIndexSpecs, Key, KeyOptions, KeyRange, MemoryEngine,
    TransactionMode,
};
