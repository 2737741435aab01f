//! Lectio offline sync
//!
//! This module keeps bookmarks and highlights available offline and
//! mirrors them to a server, including:
//! - Local-first writes: record and outbox entry land in one atomic batch
//! - An outbox with per-entity coalescing and a bounded retry budget
//! - Background sync driven by tags, with backoff and optional periodic flushes

pub mod model;
pub mod outbox;
pub mod scheduler;
pub mod store;
pub mod transport;
pub mod trigger;

// Re-export main types
pub use model::{
    Bookmark, BookmarkFilter, Highlight, HighlightFilter, SyncRecord, DEFAULT_COLLECTION,
};
pub use outbox::{
    coalesce, outbox_key, Coalesced, DroppedEntry, EntityKind, FlushReport, Operation,
    OutboxEntry,
};
pub use scheduler::{BackgroundSync, BackgroundSyncConfig, BackgroundSyncHandle};
pub use store::{OfflineSyncStore, SyncConfig};
pub use transport::{HttpTransport, SyncTransport};
pub use trigger::{SyncTag, SyncTrigger};
