//! Sync outbox entries and their coalescing rules.
//!
//! The outbox holds at most one entry per entity, keyed `kind:id`. A new
//! local write is folded into the queued entry instead of being appended,
//! so the server only ever sees the latest intent for an entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::trigger::SyncTag;
use lectio_storage::{BOOKMARKS, HIGHLIGHTS};

/// Kind of synchronized entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Bookmark,
    Highlight,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bookmark => "bookmark",
            Self::Highlight => "highlight",
        }
    }

    /// Remote collection path segment.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Bookmark => "bookmarks",
            Self::Highlight => "highlights",
        }
    }

    /// Local object store.
    pub fn store(&self) -> &'static str {
        match self {
            Self::Bookmark => BOOKMARKS,
            Self::Highlight => HIGHLIGHTS,
        }
    }

    pub fn tag(&self) -> SyncTag {
        match self {
            Self::Bookmark => SyncTag::Bookmarks,
            Self::Highlight => SyncTag::Highlights,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote operation an entry asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create or replace the remote record.
    Create,
    Delete,
}

/// Outbox key of an entity.
pub fn outbox_key(kind: EntityKind, id: &str) -> String {
    format!("{}:{}", kind.as_str(), id)
}

/// A pending remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: String,
    pub kind: EntityKind,
    pub operation: Operation,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    /// Position in the outbox; every enqueue takes a fresh, larger value.
    pub seq: u64,
    /// Failed delivery attempts.
    #[serde(default)]
    pub attempts: u32,
    /// The server cannot know about this entity yet.
    #[serde(default)]
    pub local_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn create(kind: EntityKind, id: impl Into<String>, payload: Value, seq: u64) -> Self {
        Self::new(kind, id.into(), Operation::Create, payload, seq)
    }

    pub fn delete(kind: EntityKind, id: impl Into<String>, seq: u64) -> Self {
        let id = id.into();
        let payload = serde_json::json!({ "id": id });
        Self::new(kind, id, Operation::Delete, payload, seq)
    }

    fn new(kind: EntityKind, id: String, operation: Operation, payload: Value, seq: u64) -> Self {
        Self {
            id,
            kind,
            operation,
            payload,
            enqueued_at: Utc::now(),
            seq,
            attempts: 0,
            local_only: false,
            last_error: None,
        }
    }

    /// Mark that no earlier version of the entity reached the server.
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    pub fn key(&self) -> String {
        outbox_key(self.kind, &self.id)
    }

    /// A queued create that can vanish without the server noticing.
    fn is_cancellable(&self, in_flight: bool) -> bool {
        self.operation == Operation::Create && self.local_only && self.attempts == 0 && !in_flight
    }
}

/// Result of folding a new write into the outbox.
#[derive(Debug, Clone, PartialEq)]
pub enum Coalesced {
    /// Store this entry under the entity key.
    Enqueue(OutboxEntry),
    /// Remove the queued entry; nothing needs to reach the server.
    Cancel,
}

/// Fold `incoming` into the entry already queued for the same entity.
///
/// - Create over Create replaces the payload; it stays local-only only if
///   the queued create never left the device.
/// - Create over Delete replaces the delete.
/// - Delete over a cancellable Create (never attempted, not in flight, no
///   earlier remote version) cancels both.
/// - Delete over anything else becomes a Delete.
pub fn coalesce(existing: Option<&OutboxEntry>, incoming: OutboxEntry, in_flight: bool) -> Coalesced {
    let Some(existing) = existing else {
        return Coalesced::Enqueue(incoming);
    };

    match (existing.operation, incoming.operation) {
        (Operation::Create, Operation::Create) => {
            let local_only = incoming.local_only && existing.is_cancellable(in_flight);
            Coalesced::Enqueue(incoming.local_only(local_only))
        }
        (Operation::Delete, Operation::Create) => Coalesced::Enqueue(incoming.local_only(false)),
        (Operation::Create, Operation::Delete) if existing.is_cancellable(in_flight) => {
            Coalesced::Cancel
        }
        (_, Operation::Delete) => Coalesced::Enqueue(incoming.local_only(false)),
    }
}

/// An entry given up on after exhausting its attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedEntry {
    pub kind: EntityKind,
    pub id: String,
    pub operation: Operation,
    pub attempts: u32,
    pub last_error: String,
}

impl From<&OutboxEntry> for DroppedEntry {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            kind: entry.kind,
            id: entry.id.clone(),
            operation: entry.operation,
            attempts: entry.attempts,
            last_error: entry.last_error.clone().unwrap_or_default(),
        }
    }
}

/// Outcome of one outbox flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub delivered: usize,
    /// Failed deliveries left queued for another attempt.
    pub retried: usize,
    /// Entries rewritten locally while their delivery was running.
    pub superseded: usize,
    pub dropped: Vec<DroppedEntry>,
    /// Entries still queued after the flush.
    pub remaining: usize,
    /// Stored entries that could not be decoded and were skipped.
    pub unreadable: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.retried == 0 && self.dropped.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(seq: u64, local_only: bool) -> OutboxEntry {
        OutboxEntry::create(EntityKind::Bookmark, "John-3-16", json!({"v": seq}), seq)
            .local_only(local_only)
    }

    fn delete(seq: u64) -> OutboxEntry {
        OutboxEntry::delete(EntityKind::Bookmark, "John-3-16", seq)
    }

    #[test]
    fn test_first_write_is_enqueued() {
        let entry = create(1, true);
        assert_eq!(coalesce(None, entry.clone(), false), Coalesced::Enqueue(entry));
    }

    #[test]
    fn test_create_then_delete_cancels() {
        assert_eq!(coalesce(Some(&create(1, true)), delete(2), false), Coalesced::Cancel);
    }

    #[test]
    fn test_delete_after_attempted_create_is_kept() {
        let mut attempted = create(1, true);
        attempted.attempts = 1;
        let Coalesced::Enqueue(entry) = coalesce(Some(&attempted), delete(2), false) else {
            panic!("expected delete to be enqueued");
        };
        assert_eq!(entry.operation, Operation::Delete);
        assert_eq!(entry.seq, 2);
    }

    #[test]
    fn test_delete_during_flight_is_kept() {
        assert!(matches!(
            coalesce(Some(&create(1, true)), delete(2), true),
            Coalesced::Enqueue(OutboxEntry { operation: Operation::Delete, .. })
        ));
    }

    #[test]
    fn test_update_of_synced_record_is_not_cancelled() {
        // Create that rewrote a record the server already has.
        assert!(matches!(
            coalesce(Some(&create(1, false)), delete(2), false),
            Coalesced::Enqueue(OutboxEntry { operation: Operation::Delete, .. })
        ));
    }

    #[test]
    fn test_create_over_create_replaces_payload() {
        let Coalesced::Enqueue(entry) = coalesce(Some(&create(1, true)), create(2, true), false)
        else {
            panic!("expected create to be enqueued");
        };
        assert_eq!(entry.payload, json!({"v": 2}));
        assert!(entry.local_only);

        let Coalesced::Enqueue(entry) = coalesce(Some(&create(1, true)), create(2, true), true)
        else {
            panic!("expected create to be enqueued");
        };
        assert!(!entry.local_only);
    }

    #[test]
    fn test_create_over_delete_is_never_cancellable() {
        let Coalesced::Enqueue(entry) = coalesce(Some(&delete(1)), create(2, true), false) else {
            panic!("expected create to be enqueued");
        };
        assert_eq!(entry.operation, Operation::Create);
        assert!(!entry.local_only);
        assert!(matches!(
            coalesce(Some(&entry), delete(3), false),
            Coalesced::Enqueue(OutboxEntry { operation: Operation::Delete, .. })
        ));
    }

    #[test]
    fn test_entry_wire_format() {
        let entry = create(7, true);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["kind"], "bookmark");
        assert_eq!(value["operation"], "create");
        assert_eq!(value["seq"], 7);
        assert_eq!(entry.key(), "bookmark:John-3-16");

        let back: OutboxEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }
}
