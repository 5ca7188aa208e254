//! # Shelf Engine
//!
//! Capability traits for versioned, transactional object-store engines,
//! plus an in-memory reference engine.
//!
//! This crate defines the seam between ShelfDB's migration/query layer and
//! whatever engine actually stores records:
//! - [`Engine`] / [`DatabaseHandle`] - versioned open protocol, including
//!   the legacy version-set generation
//! - [`EngineTransaction`] / [`CollectionRef`] / [`IndexRef`] / [`Cursor`] -
//!   scoped transactions, record access, index scans
//! - [`Key`], [`KeyRange`], [`KeyOptions`], [`IndexSpec`] - shared value
//!   types
//! - [`MemoryEngine`] - reference implementation for tests

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod key;
mod memory;
mod types;

pub use engine::{
    CollectionRef, Cursor, DatabaseHandle, Engine, EngineTransaction, IndexRef, OpenOutcome,
    UpgradeHandoff, UpgradeScope,
};
pub use error::{EngineError, EngineResult};
pub use key::{Key, KeyRange};
pub use memory::MemoryEngine;
pub use types::{IndexSpec, IntoIndexSpecs, KeyOptions, TransactionMode};
