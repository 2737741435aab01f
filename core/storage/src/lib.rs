//! Key/value storage abstraction for Lectio.
//!
//! This module provides a trait-based interface over a persistent,
//! transactional key/value medium (object stores keyed by id, with
//! secondary indices) and a registry for resolving a backend by name.
//!
//! # Design Principles
//! - Atomic batches: a write either fully lands or leaves the store unchanged
//! - Async operations: every call may suspend on storage I/O
//! - Backends are interchangeable behind `Arc<dyn KeyValueStore>`

pub mod memory;
pub mod provider;
pub mod registry;
pub mod sqlite;

pub use memory::MemoryStore;
pub use provider::{
    KeyValueStore, Record, Schema, StoreSchema, WriteBatch, WriteOp, BOOKMARKS, HIGHLIGHTS,
    SYNC_OUTBOX,
};
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use sqlite::SqliteStore;
