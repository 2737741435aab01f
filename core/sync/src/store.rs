//! Offline-first store for bookmarks and highlights.
//!
//! Every write lands in the local key/value store together with its outbox
//! entry in one atomic batch, then asks the trigger for a background sync.
//! Reads never touch the network.

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::model::{Bookmark, BookmarkFilter, Highlight, HighlightFilter, SyncRecord};
use crate::outbox::{coalesce, Coalesced, DroppedEntry, EntityKind, FlushReport, OutboxEntry};
use crate::transport::SyncTransport;
use crate::trigger::{SyncTag, SyncTrigger};
use lectio_common::{canon, Error, Result};
use lectio_storage::{KeyValueStore, WriteBatch, SYNC_OUTBOX};

/// Outbox delivery settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed attempts after which an entry is dropped.
    pub max_retries: u32,
    /// Entries delivered concurrently during a flush.
    pub flush_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            flush_concurrency: 1,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_flush_concurrency(mut self, concurrency: usize) -> Self {
        self.flush_concurrency = concurrency.max(1);
        self
    }
}

/// What one flush did with one entry.
enum Settled {
    Delivered,
    Retried,
    Superseded,
    Dropped(DroppedEntry),
}

/// Bookmarks and highlights with a sync outbox.
pub struct OfflineSyncStore {
    store: Arc<dyn KeyValueStore>,
    config: SyncConfig,
    trigger: Option<Arc<dyn SyncTrigger>>,
    /// Serializes read-modify-write of records and outbox entries.
    write_lock: AsyncMutex<()>,
    flush_lock: AsyncMutex<()>,
    /// Outbox keys whose delivery is running.
    in_flight: Mutex<HashSet<String>>,
    next_seq: AtomicU64,
}

fn decode<R: SyncRecord>(records: Vec<(String, serde_json::Value)>) -> Result<Vec<R>> {
    records
        .into_iter()
        .map(|(_, value)| serde_json::from_value(value).map_err(Error::from))
        .collect()
}

impl OfflineSyncStore {
    /// Open the sync store over a key/value backend.
    ///
    /// # Errors
    /// - `Storage` if the outbox cannot be read
    pub async fn open(store: Arc<dyn KeyValueStore>, config: SyncConfig) -> Result<Self> {
        let queued = store.list(SYNC_OUTBOX).await?;
        let mut last_seq = 0;
        for (key, value) in &queued {
            match serde_json::from_value::<OutboxEntry>(value.clone()) {
                Ok(entry) => last_seq = last_seq.max(entry.seq),
                Err(e) => warn!(%key, error = %e, "unreadable outbox entry"),
            }
        }
        info!(backend = store.name(), queued = queued.len(), "sync store opened");

        Ok(Self {
            store,
            config,
            trigger: None,
            write_lock: AsyncMutex::new(()),
            flush_lock: AsyncMutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
            next_seq: AtomicU64::new(last_seq + 1),
        })
    }

    /// Request background syncs through `trigger` after every write.
    pub fn with_trigger(mut self, trigger: Arc<dyn SyncTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // Bookmarks

    /// Store a bookmark and queue it for sync.
    ///
    /// An existing bookmark with the same id is replaced.
    ///
    /// # Errors
    /// - `InvalidInput` for an invalid bookmark
    /// - `Storage` if the write fails; nothing becomes visible
    pub async fn add_bookmark(&self, bookmark: Bookmark) -> Result<()> {
        self.upsert(&bookmark).await
    }

    /// Replace the note of a bookmark.
    ///
    /// # Errors
    /// - `NotFound` if no bookmark has this id
    pub async fn update_bookmark_note(&self, id: &str, note: Option<String>) -> Result<Bookmark> {
        self.modify(id, |bookmark: &mut Bookmark| bookmark.note = note)
            .await
    }

    /// Remove a bookmark. Returns `false` if it did not exist.
    pub async fn remove_bookmark(&self, id: &str) -> Result<bool> {
        self.remove::<Bookmark>(id).await
    }

    /// Remove every bookmark. Returns how many were removed.
    pub async fn clear_bookmarks(&self) -> Result<usize> {
        self.clear::<Bookmark>().await
    }

    pub async fn get_bookmark(&self, id: &str) -> Result<Option<Bookmark>> {
        self.get(id).await
    }

    /// Bookmarks matching `filter`, newest first.
    pub async fn list_bookmarks(&self, filter: &BookmarkFilter) -> Result<Vec<Bookmark>> {
        let mut bookmarks: Vec<Bookmark> = self
            .list::<Bookmark>(filter.book.as_deref())
            .await?
            .into_iter()
            .filter(|b| filter.matches(b))
            .collect();
        bookmarks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(bookmarks)
    }

    /// Distinct bookmark collections, sorted.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let bookmarks: Vec<Bookmark> = self.list(None).await?;
        let collections: BTreeSet<String> =
            bookmarks.into_iter().map(|b| b.collection).collect();
        Ok(collections.into_iter().collect())
    }

    // Highlights

    /// Store a highlight and queue it for sync.
    pub async fn add_highlight(&self, highlight: Highlight) -> Result<()> {
        self.upsert(&highlight).await
    }

    /// Change the color of a highlight.
    ///
    /// # Errors
    /// - `NotFound` if no highlight has this id
    pub async fn update_highlight_color(&self, id: &str, color: &str) -> Result<Highlight> {
        let color = color.to_string();
        self.modify(id, |highlight: &mut Highlight| highlight.color = color)
            .await
    }

    pub async fn remove_highlight(&self, id: &str) -> Result<bool> {
        self.remove::<Highlight>(id).await
    }

    pub async fn clear_highlights(&self) -> Result<usize> {
        self.clear::<Highlight>().await
    }

    pub async fn get_highlight(&self, id: &str) -> Result<Option<Highlight>> {
        self.get(id).await
    }

    /// Highlights matching `filter`, in canonical verse order.
    pub async fn list_highlights(&self, filter: &HighlightFilter) -> Result<Vec<Highlight>> {
        let mut highlights: Vec<Highlight> = self
            .list::<Highlight>(filter.book.as_deref())
            .await?
            .into_iter()
            .filter(|h| filter.matches(h))
            .collect();
        highlights.sort_by(|a, b| {
            canon::compare_books(&a.book, &b.book)
                .then_with(|| a.chapter.cmp(&b.chapter))
                .then_with(|| a.verse.cmp(&b.verse))
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(highlights)
    }

    // Outbox

    /// Queued outbox entries in FIFO order, optionally of one kind.
    ///
    /// Entries that cannot be decoded are skipped and logged.
    pub async fn pending_outbox(&self, kind: Option<EntityKind>) -> Result<Vec<OutboxEntry>> {
        let (entries, _) = self.read_outbox(kind).await?;
        Ok(entries)
    }

    /// Decodable entries in FIFO order and the number of unreadable ones.
    async fn read_outbox(&self, kind: Option<EntityKind>) -> Result<(Vec<OutboxEntry>, usize)> {
        let mut unreadable = 0;
        let mut entries = Vec::new();
        for (key, value) in self.store.list(SYNC_OUTBOX).await? {
            match serde_json::from_value::<OutboxEntry>(value) {
                Ok(entry) if kind.map_or(true, |k| entry.kind == k) => entries.push(entry),
                Ok(_) => {}
                Err(e) => {
                    warn!(%key, error = %e, "skipping unreadable outbox entry");
                    unreadable += 1;
                }
            }
        }
        entries.sort_by_key(|e| e.seq);
        Ok((entries, unreadable))
    }

    /// Deliver every queued entry.
    pub async fn flush_outbox(&self, transport: &dyn SyncTransport) -> Result<FlushReport> {
        self.flush(transport, None).await
    }

    /// Deliver queued entries of one kind.
    pub async fn flush_kind(
        &self,
        transport: &dyn SyncTransport,
        kind: EntityKind,
    ) -> Result<FlushReport> {
        self.flush(transport, Some(kind)).await
    }

    /// Approximate bytes held by the local store.
    pub async fn storage_size(&self) -> Result<u64> {
        self.store.approximate_size().await
    }

    async fn flush(
        &self,
        transport: &dyn SyncTransport,
        kind: Option<EntityKind>,
    ) -> Result<FlushReport> {
        let _flushing = self.flush_lock.lock().await;
        let (entries, unreadable) = self.read_outbox(kind).await?;
        let mut report = FlushReport {
            unreadable,
            ..FlushReport::default()
        };
        if entries.is_empty() {
            return Ok(report);
        }

        debug!(
            transport = transport.name(),
            entries = entries.len(),
            "flushing outbox"
        );

        // Each delivery claims, sends and settles its own entry so that no
        // lock is awaited outside the stream.
        let mut deliveries = stream::iter(entries)
            .map(|entry| self.deliver(transport, entry))
            .buffer_unordered(self.config.flush_concurrency.max(1));

        let mut failure = None;
        while let Some(settled) = deliveries.next().await {
            match settled {
                Ok(Settled::Delivered) => report.delivered += 1,
                Ok(Settled::Retried) => report.retried += 1,
                Ok(Settled::Superseded) => report.superseded += 1,
                Ok(Settled::Dropped(dropped)) => report.dropped.push(dropped),
                Err(e) => {
                    error!(error = %e, "failed to record delivery outcome");
                    failure.get_or_insert(e);
                }
            }
        }
        drop(deliveries);

        if let Some(e) = failure {
            return Err(e);
        }

        report.remaining = self.read_outbox(kind).await?.0.len();
        info!(
            delivered = report.delivered,
            retried = report.retried,
            dropped = report.dropped.len(),
            remaining = report.remaining,
            "outbox flushed"
        );
        Ok(report)
    }

    async fn deliver(&self, transport: &dyn SyncTransport, entry: OutboxEntry) -> Result<Settled> {
        if !self.claim(&entry).await? {
            debug!(key = %entry.key(), "entry changed before delivery");
            return Ok(Settled::Superseded);
        }
        let outcome = transport.deliver(&entry).await;
        self.settle(entry, outcome).await
    }

    /// Mark `entry` in flight if it is still the queued version.
    ///
    /// Runs under the write lock, so a local write either lands before the
    /// claim (and the stale entry is skipped) or sees the entry in flight.
    async fn claim(&self, entry: &OutboxEntry) -> Result<bool> {
        let key = entry.key();
        let _writing = self.write_lock.lock().await;
        match self.load_entry(&key).await? {
            Some(current) if current.seq == entry.seq => {
                self.in_flight.lock().insert(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn settle(&self, entry: OutboxEntry, outcome: Result<()>) -> Result<Settled> {
        let key = entry.key();
        let _writing = self.write_lock.lock().await;
        self.in_flight.lock().remove(&key);

        let current = match self.load_entry(&key).await? {
            Some(current) if current.seq == entry.seq => current,
            _ => {
                debug!(%key, "entry rewritten during delivery");
                return Ok(Settled::Superseded);
            }
        };

        let mut batch = WriteBatch::new();
        match outcome {
            Ok(()) => {
                batch.delete(SYNC_OUTBOX, key.as_str());
                self.store.apply(batch).await?;
                debug!(%key, operation = ?current.operation, "entry delivered");
                Ok(Settled::Delivered)
            }
            Err(e) => {
                let mut failed = current;
                failed.attempts += 1;
                failed.last_error = Some(e.to_string());

                if failed.attempts >= self.config.max_retries {
                    batch.delete(SYNC_OUTBOX, key.as_str());
                    self.store.apply(batch).await?;
                    warn!(%key, attempts = failed.attempts, error = %e, "dropping outbox entry");
                    Ok(Settled::Dropped(DroppedEntry::from(&failed)))
                } else {
                    batch.put(SYNC_OUTBOX, key.as_str(), serde_json::to_value(&failed)?);
                    self.store.apply(batch).await?;
                    warn!(%key, attempts = failed.attempts, error = %e, "delivery failed, will retry");
                    Ok(Settled::Retried)
                }
            }
        }
    }

    // Record plumbing shared by bookmarks and highlights.

    async fn get<R: SyncRecord>(&self, id: &str) -> Result<Option<R>> {
        self.store
            .get(R::STORE, id)
            .await?
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .transpose()
    }

    async fn list<R: SyncRecord>(&self, book: Option<&str>) -> Result<Vec<R>> {
        let records = match book {
            Some(book) => {
                let book = canon::resolve_book(book);
                self.store.list_by_index(R::STORE, "book", &book).await?
            }
            None => self.store.list(R::STORE).await?,
        };
        decode(records)
    }

    async fn load_entry(&self, key: &str) -> Result<Option<OutboxEntry>> {
        self.store
            .get(SYNC_OUTBOX, key)
            .await?
            .map(|value| serde_json::from_value(value).map_err(Error::from))
            .transpose()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Fold `incoming` into the queued entry and stage the result.
    async fn stage_outbox(&self, batch: &mut WriteBatch, incoming: OutboxEntry) -> Result<()> {
        let key = incoming.key();
        let existing = self.load_entry(&key).await?;
        let in_flight = self.in_flight.lock().contains(&key);

        match coalesce(existing.as_ref(), incoming, in_flight) {
            Coalesced::Enqueue(entry) => {
                batch.put(SYNC_OUTBOX, key.as_str(), serde_json::to_value(&entry)?);
            }
            Coalesced::Cancel => {
                debug!(%key, "queued create cancelled by delete");
                batch.delete(SYNC_OUTBOX, key.as_str());
            }
        }
        Ok(())
    }

    async fn upsert<R: SyncRecord>(&self, record: &R) -> Result<()> {
        record.validate()?;
        {
            let _writing = self.write_lock.lock().await;
            self.write_locked(record).await?;
        }
        self.request_sync(R::KIND.tag());
        Ok(())
    }

    async fn write_locked<R: SyncRecord>(&self, record: &R) -> Result<()> {
        let existed = self.store.get(R::STORE, record.id()).await?.is_some();
        let value = serde_json::to_value(record)?;
        let entry = OutboxEntry::create(R::KIND, record.id(), value.clone(), self.next_seq())
            .local_only(!existed);

        let mut batch = WriteBatch::new();
        batch.put(R::STORE, record.id(), value);
        self.stage_outbox(&mut batch, entry).await?;
        self.store.apply(batch).await?;

        debug!(kind = %R::KIND, id = record.id(), "record written");
        Ok(())
    }

    async fn modify<R, F>(&self, id: &str, change: F) -> Result<R>
    where
        R: SyncRecord,
        F: FnOnce(&mut R),
    {
        let record = {
            let _writing = self.write_lock.lock().await;
            let mut record: R = self
                .get(id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("{} '{}' not found", R::KIND, id)))?;
            change(&mut record);
            record.validate()?;
            self.write_locked(&record).await?;
            record
        };
        self.request_sync(R::KIND.tag());
        Ok(record)
    }

    async fn remove<R: SyncRecord>(&self, id: &str) -> Result<bool> {
        {
            let _writing = self.write_lock.lock().await;
            if self.store.get(R::STORE, id).await?.is_none() {
                debug!(kind = %R::KIND, id, "nothing to remove");
                return Ok(false);
            }

            let mut batch = WriteBatch::new();
            batch.delete(R::STORE, id);
            let entry = OutboxEntry::delete(R::KIND, id, self.next_seq());
            self.stage_outbox(&mut batch, entry).await?;
            self.store.apply(batch).await?;
            debug!(kind = %R::KIND, id, "record removed");
        }
        self.request_sync(R::KIND.tag());
        Ok(true)
    }

    async fn clear<R: SyncRecord>(&self) -> Result<usize> {
        let removed = {
            let _writing = self.write_lock.lock().await;
            let records = self.store.list(R::STORE).await?;
            if records.is_empty() {
                return Ok(0);
            }

            let mut batch = WriteBatch::new();
            for (id, _) in &records {
                batch.delete(R::STORE, id.as_str());
                let entry = OutboxEntry::delete(R::KIND, id.as_str(), self.next_seq());
                self.stage_outbox(&mut batch, entry).await?;
            }
            self.store.apply(batch).await?;
            info!(kind = %R::KIND, removed = records.len(), "records cleared");
            records.len()
        };
        self.request_sync(R::KIND.tag());
        Ok(removed)
    }

    fn request_sync(&self, tag: SyncTag) {
        match &self.trigger {
            Some(trigger) => trigger.request(tag),
            None => debug!(%tag, "no sync trigger registered"),
        }
    }
}
