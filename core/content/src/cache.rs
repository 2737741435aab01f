//! Resident translation cache with request coalescing.
//!
//! At most one load per translation is in flight at any time. Callers that
//! ask for a translation while its load is running attach to the same
//! shared future and observe the same outcome. Failed loads are never
//! cached, so the next call starts a fresh fetch.

use futures::future::{BoxFuture, FutureExt, Shared};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::TranslationData;
use crate::loader::TranslationLoader;
use crate::protocol::{CacheRequest, CacheResponse};
use lectio_common::{Error, Result, TranslationId, Verse};

type LoadOutcome = std::result::Result<Arc<TranslationData>, String>;
type SharedLoad = Shared<BoxFuture<'static, LoadOutcome>>;

/// Cache configuration.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Upper bound on resident translations. `None` keeps everything.
    pub max_resident: Option<usize>,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_resident(mut self, max: usize) -> Self {
        self.max_resident = Some(max.max(1));
        self
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub resident: usize,
    pub in_flight: usize,
    pub approximate_bytes: u64,
    /// Fetches started since the cache was created.
    pub fetches: u64,
}

struct InFlight {
    generation: u64,
    load: SharedLoad,
}

struct CacheState {
    resident: LruCache<TranslationId, Arc<TranslationData>>,
    in_flight: HashMap<TranslationId, InFlight>,
    next_generation: u64,
}

struct CacheInner {
    loader: Arc<dyn TranslationLoader>,
    config: CacheConfig,
    state: Mutex<CacheState>,
    fetches: AtomicU64,
}

enum Lookup {
    Resident(Arc<TranslationData>),
    Pending { generation: u64, load: SharedLoad },
}

/// Translation cache handle. Clones share the same state.
#[derive(Clone)]
pub struct TranslationCache {
    inner: Arc<CacheInner>,
}

impl TranslationCache {
    pub fn new(loader: Arc<dyn TranslationLoader>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                loader,
                config,
                state: Mutex::new(CacheState {
                    resident: LruCache::unbounded(),
                    in_flight: HashMap::new(),
                    next_generation: 0,
                }),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_loader(loader: Arc<dyn TranslationLoader>) -> Self {
        Self::new(loader, CacheConfig::default())
    }

    /// Make a translation resident, loading it if needed.
    ///
    /// # Postconditions
    /// - On success the translation is resident
    /// - No in-flight entry remains for `id` once the load settled
    ///
    /// # Errors
    /// - `LoadFailed` if the fetch or parse fails; nothing is cached
    pub async fn ensure_loaded(&self, id: &TranslationId) -> Result<Arc<TranslationData>> {
        match self.lookup(id, false) {
            Lookup::Resident(data) => Ok(data),
            Lookup::Pending { load, .. } => Self::settle(id, load.await),
        }
    }

    /// Like [`ensure_loaded`](Self::ensure_loaded), bounded by `timeout`.
    ///
    /// On timeout the in-flight entry is dropped (if it still belongs to
    /// this load) so the next call starts a fresh fetch. Other callers
    /// already attached to the load keep waiting on it.
    pub async fn ensure_loaded_with_timeout(
        &self,
        id: &TranslationId,
        timeout: Duration,
    ) -> Result<Arc<TranslationData>> {
        match self.lookup(id, false) {
            Lookup::Resident(data) => Ok(data),
            Lookup::Pending { generation, load } => {
                match tokio::time::timeout(timeout, load).await {
                    Ok(outcome) => Self::settle(id, outcome),
                    Err(_) => {
                        self.abandon(id, generation);
                        Err(Error::load_failed(
                            id.as_str(),
                            format!("timed out after {:?}", timeout),
                        ))
                    }
                }
            }
        }
    }

    /// Fetch a translation again and replace the resident copy.
    ///
    /// Joins a load that is already in flight instead of starting another.
    pub async fn reload(&self, id: &TranslationId) -> Result<Arc<TranslationData>> {
        match self.lookup(id, true) {
            Lookup::Resident(data) => Ok(data),
            Lookup::Pending { load, .. } => Self::settle(id, load.await),
        }
    }

    /// Verses of one chapter of a resident translation.
    ///
    /// Returns an empty list when the book or chapter does not exist.
    ///
    /// # Errors
    /// - `NotLoaded` if the translation is not resident
    pub fn get_chapter(&self, id: &TranslationId, book: &str, chapter: u32) -> Result<Vec<Verse>> {
        let data = self
            .get(id)
            .ok_or_else(|| Error::NotLoaded(id.to_string()))?;
        Ok(data
            .chapter(book, chapter)
            .map(<[Verse]>::to_vec)
            .unwrap_or_default())
    }

    /// Resident data for a translation. Marks it as recently used.
    pub fn get(&self, id: &TranslationId) -> Option<Arc<TranslationData>> {
        self.inner.state.lock().resident.get(id).cloned()
    }

    /// All resident translations, sorted by id.
    pub fn snapshot(&self) -> Vec<(TranslationId, Arc<TranslationData>)> {
        let state = self.inner.state.lock();
        let mut entries: Vec<_> = state
            .resident
            .iter()
            .map(|(id, data)| (id.clone(), Arc::clone(data)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn is_loaded(&self, id: &TranslationId) -> bool {
        self.inner.state.lock().resident.contains(id)
    }

    pub fn is_loading(&self, id: &TranslationId) -> bool {
        self.inner.state.lock().in_flight.contains_key(id)
    }

    /// Ids of resident translations, sorted.
    pub fn loaded_ids(&self) -> Vec<TranslationId> {
        let state = self.inner.state.lock();
        let mut ids: Vec<_> = state.resident.iter().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids
    }

    /// Drop a resident translation.
    ///
    /// Returns `false` if it was not resident or a load for it is in flight.
    pub fn evict(&self, id: &TranslationId) -> bool {
        let mut state = self.inner.state.lock();
        if state.in_flight.contains_key(id) {
            warn!(translation = %id, "refusing to evict translation with a load in flight");
            return false;
        }
        let evicted = state.resident.pop(id).is_some();
        if evicted {
            info!(translation = %id, "translation evicted");
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            resident: state.resident.len(),
            in_flight: state.in_flight.len(),
            approximate_bytes: state
                .resident
                .iter()
                .map(|(_, data)| data.approximate_size())
                .sum(),
            fetches: self.inner.fetches.load(Ordering::Relaxed),
        }
    }

    /// Answer a cache-size request.
    pub fn respond(&self, request: &CacheRequest) -> CacheResponse {
        match request {
            CacheRequest::GetCacheSize => CacheResponse::CacheSize {
                size: self.stats().approximate_bytes,
            },
        }
    }

    fn lookup(&self, id: &TranslationId, force: bool) -> Lookup {
        let mut state = self.inner.state.lock();

        if !force {
            if let Some(data) = state.resident.get(id) {
                debug!(translation = %id, "cache hit");
                return Lookup::Resident(Arc::clone(data));
            }
        }

        if let Some(flight) = state.in_flight.get(id) {
            debug!(translation = %id, generation = flight.generation, "joining in-flight load");
            return Lookup::Pending {
                generation: flight.generation,
                load: flight.load.clone(),
            };
        }

        let generation = state.next_generation;
        state.next_generation += 1;
        let load = self.start_load(id.clone(), generation);
        state.in_flight.insert(
            id.clone(),
            InFlight {
                generation,
                load: load.clone(),
            },
        );
        Lookup::Pending { generation, load }
    }

    fn start_load(&self, id: TranslationId, generation: u64) -> SharedLoad {
        let loader = Arc::clone(&self.inner.loader);
        let cache: Weak<CacheInner> = Arc::downgrade(&self.inner);
        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        info!(translation = %id, loader = loader.name(), generation, "loading translation");

        async move {
            let outcome: LoadOutcome = match loader.fetch(&id).await {
                Ok(data) => Ok(Arc::new(data)),
                Err(Error::LoadFailed { reason, .. }) => Err(reason),
                Err(e) => Err(e.to_string()),
            };
            if let Some(inner) = cache.upgrade() {
                inner.finish(&id, generation, &outcome);
            }
            outcome
        }
        .boxed()
        .shared()
    }

    fn abandon(&self, id: &TranslationId, generation: u64) {
        let mut state = self.inner.state.lock();
        if state
            .in_flight
            .get(id)
            .is_some_and(|f| f.generation == generation)
        {
            state.in_flight.remove(id);
        }
        warn!(translation = %id, generation, "translation load timed out");
    }

    fn settle(id: &TranslationId, outcome: LoadOutcome) -> Result<Arc<TranslationData>> {
        outcome.map_err(|reason| Error::load_failed(id.as_str(), reason))
    }
}

impl CacheInner {
    fn finish(&self, id: &TranslationId, generation: u64, outcome: &LoadOutcome) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        // A newer load owns the entry; it will publish its own result.
        if state
            .in_flight
            .get(id)
            .is_some_and(|f| f.generation != generation)
        {
            debug!(translation = %id, generation, "discarding superseded load");
            return;
        }
        state.in_flight.remove(id);

        match outcome {
            Ok(data) => {
                state.resident.put(id.clone(), Arc::clone(data));
                info!(
                    translation = %id,
                    books = data.book_count(),
                    verses = data.verse_count(),
                    "translation resident"
                );
                self.enforce_capacity(state, id);
            }
            Err(reason) => {
                warn!(translation = %id, %reason, "translation load failed");
            }
        }
    }

    fn enforce_capacity(&self, state: &mut CacheState, keep: &TranslationId) {
        let Some(max) = self.config.max_resident else {
            return;
        };

        while state.resident.len() > max {
            let victim = state
                .resident
                .iter()
                .rev()
                .map(|(id, _)| id)
                .find(|id| *id != keep && !state.in_flight.contains_key(*id))
                .cloned();
            match victim {
                Some(id) => {
                    state.resident.pop(&id);
                    info!(translation = %id, "evicted least recently used translation");
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Loader that counts fetches, optionally waits on a gate and fails
    /// for ids starting with "bad".
    struct ScriptedLoader {
        fetches: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedLoader {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                gate: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                gate: Some(gate),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationLoader for ScriptedLoader {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&self, id: &TranslationId) -> Result<TranslationData> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if id.as_str().starts_with("bad") {
                return Err(Error::load_failed(id.as_str(), "HTTP 404 Not Found"));
            }
            let doc = format!(
                r#"{{"data":{{"John":{{"3":[{{"number":16,"text":"For God so loved the world ({})"}}]}}}}}}"#,
                id
            );
            TranslationData::parse(id, doc.as_bytes())
        }
    }

    fn id(s: &str) -> TranslationId {
        TranslationId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_fetch() {
        let gate = Arc::new(Notify::new());
        let loader = ScriptedLoader::gated(gate.clone());
        let cache = TranslationCache::with_loader(loader.clone());
        let kjv = id("kjv");

        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.notify_one();
        });

        let results =
            futures::future::join_all((0..8).map(|_| cache.ensure_loaded(&kjv))).await;
        release.await.unwrap();

        assert_eq!(loader.fetches(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert!(cache.is_loaded(&kjv));
        assert!(!cache.is_loading(&kjv));
    }

    #[tokio::test]
    async fn test_resident_translation_is_not_fetched_again() {
        let loader = ScriptedLoader::new();
        let cache = TranslationCache::with_loader(loader.clone());
        let web = id("web");

        cache.ensure_loaded(&web).await.unwrap();
        cache.ensure_loaded(&web).await.unwrap();
        assert_eq!(loader.fetches(), 1);
        assert_eq!(cache.stats().fetches, 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_with_equal_data() {
        let loader = ScriptedLoader::new();
        let cache = TranslationCache::with_loader(loader.clone());
        let kjv = id("kjv");

        let before = cache.ensure_loaded(&kjv).await.unwrap();
        let after = cache.reload(&kjv).await.unwrap();

        assert_eq!(loader.fetches(), 2);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*before, *after);
        assert!(Arc::ptr_eq(&after, &cache.get(&kjv).unwrap()));
        assert_eq!(cache.loaded_ids(), vec![kjv]);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let loader = ScriptedLoader::new();
        let cache = TranslationCache::with_loader(loader.clone());
        let bad = id("bad-kjv");

        let err = cache.ensure_loaded(&bad).await.unwrap_err();
        assert!(matches!(err, Error::LoadFailed { translation, .. } if translation == "bad-kjv"));
        assert!(!cache.is_loaded(&bad));
        assert!(!cache.is_loading(&bad));

        assert!(cache.ensure_loaded(&bad).await.is_err());
        assert_eq!(loader.fetches(), 2);
    }

    #[tokio::test]
    async fn test_timeout_clears_in_flight_entry() {
        let gate = Arc::new(Notify::new());
        let loader = ScriptedLoader::gated(gate);
        let cache = TranslationCache::with_loader(loader.clone());
        let asv = id("asv");

        let err = cache
            .ensure_loaded_with_timeout(&asv, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LoadFailed { .. }));
        assert!(!cache.is_loading(&asv));

        assert!(cache
            .ensure_loaded_with_timeout(&asv, Duration::from_millis(10))
            .await
            .is_err());
        assert_eq!(loader.fetches(), 2);
    }

    #[tokio::test]
    async fn test_evict_refuses_while_loading() {
        let gate = Arc::new(Notify::new());
        let loader = ScriptedLoader::gated(gate.clone());
        let cache = TranslationCache::with_loader(loader.clone());
        let ylt = id("ylt");

        gate.notify_one();
        cache.ensure_loaded(&ylt).await.unwrap();

        let reloading = {
            let cache = cache.clone();
            let ylt = ylt.clone();
            tokio::spawn(async move { cache.reload(&ylt).await })
        };
        while !cache.is_loading(&ylt) {
            tokio::task::yield_now().await;
        }

        assert!(!cache.evict(&ylt));
        gate.notify_one();
        reloading.await.unwrap().unwrap();

        assert!(cache.evict(&ylt));
        assert!(!cache.evict(&ylt));
        assert!(matches!(
            cache.get_chapter(&ylt, "John", 3),
            Err(Error::NotLoaded(_))
        ));
    }

    #[tokio::test]
    async fn test_lru_bound_evicts_least_recently_used() {
        let loader = ScriptedLoader::new();
        let cache =
            TranslationCache::new(loader, CacheConfig::new().with_max_resident(2));

        cache.ensure_loaded(&id("kjv")).await.unwrap();
        cache.ensure_loaded(&id("web")).await.unwrap();
        assert!(cache.get(&id("kjv")).is_some());
        cache.ensure_loaded(&id("asv")).await.unwrap();

        assert_eq!(cache.loaded_ids(), vec![id("asv"), id("kjv")]);
    }

    #[tokio::test]
    async fn test_get_chapter() {
        let cache = TranslationCache::with_loader(ScriptedLoader::new());
        let kjv = id("kjv");

        assert!(matches!(
            cache.get_chapter(&kjv, "John", 3),
            Err(Error::NotLoaded(_))
        ));

        cache.ensure_loaded(&kjv).await.unwrap();
        let verses = cache.get_chapter(&kjv, "jn", 3).unwrap();
        assert_eq!(verses.len(), 1);
        assert_eq!(verses[0].reference(), "John 3:16");
        assert!(cache.get_chapter(&kjv, "John", 99).unwrap().is_empty());
        assert!(cache.get_chapter(&kjv, "Tobit", 1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_size_response() {
        let cache = TranslationCache::with_loader(ScriptedLoader::new());
        assert_eq!(
            cache.respond(&CacheRequest::GetCacheSize),
            CacheResponse::CacheSize { size: 0 }
        );

        cache.ensure_loaded(&id("kjv")).await.unwrap();
        let CacheResponse::CacheSize { size } = cache.respond(&CacheRequest::GetCacheSize);
        assert!(size > 0);
        assert_eq!(size, cache.stats().approximate_bytes);
    }
}
