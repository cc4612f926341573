//! ImageCache: request coalescing, budget-bounded retention and live tracking
//! for decoded image loads

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use imagestream::{
    ImageInfo, ImageStreamCompleter, ImageStreamListener, ListenerId, WeakImageStreamCompleter,
};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::CacheKey;
use crate::policy::{self, Admission};
use crate::stats::CacheStats;
use crate::status::ImageCacheStatus;
use crate::tables::{CachedEntry, Detached, LiveEntry, PendingEntry, Tables};

/// Cache of image loads keyed by decode request
///
/// A request is served, in order, from an in-flight load for the same key,
/// from the bounded cache, from a result that is still observed elsewhere,
/// and only then by invoking the loader. Completed loads are retained while
/// they fit both the entry-count budget and the decoded-bytes budget,
/// evicting least recently used entries first.
///
/// Cloning shares the same cache.
pub struct ImageCache<K: CacheKey> {
    shared: Arc<Shared<K>>,
}

struct Shared<K> {
    tables: Mutex<Tables<K>>,
    stats: CacheStats,
}

impl<K: CacheKey> ImageCache<K> {
    /// Create a cache with the default budgets
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Create a cache with the given budgets
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::new(config)),
                stats: CacheStats::new(),
            }),
        }
    }

    /// Get the handle for `key`, invoking `loader` only on a true miss
    ///
    /// The loader runs while the cache is locked and must not call back into
    /// this cache. Its error is returned without creating any tracking entry.
    ///
    /// # Arguments
    /// * `key` - Identity of the decode request
    /// * `loader` - Starts the load when no table knows `key`
    ///
    /// # Returns
    /// * `Result<ImageStreamCompleter>` - Shared handle for the load
    pub fn request<F>(&self, key: K, loader: F) -> Result<ImageStreamCompleter>
    where
        F: FnOnce() -> imagestream::Result<ImageStreamCompleter>,
    {
        Ok(self.shared.resolve(key, loader)?)
    }

    /// Like [`request`](Self::request), but hands a loader failure to
    /// `on_error` and returns `None`
    ///
    /// # Arguments
    /// * `key` - Identity of the decode request
    /// * `loader` - Starts the load when no table knows `key`
    /// * `on_error` - Receives the loader's error, after the cache is unlocked
    ///
    /// # Returns
    /// * `Option<ImageStreamCompleter>` - Shared handle, or `None` if the loader failed
    pub fn request_or_report<F, E>(
        &self,
        key: K,
        loader: F,
        on_error: E,
    ) -> Option<ImageStreamCompleter>
    where
        F: FnOnce() -> imagestream::Result<ImageStreamCompleter>,
        E: FnOnce(imagestream::Error),
    {
        match self.shared.resolve(key, loader) {
            Ok(completer) => Some(completer),
            Err(error) => {
                on_error(error);
                None
            }
        }
    }

    /// Stop tracking `key`, including its live entry
    ///
    /// In-flight decoding is not cancelled. Returns whether a pending or
    /// cached entry was removed.
    pub fn evict(&self, key: &K) -> bool {
        self.evict_with(key, true)
    }

    /// Stop tracking `key`; the live entry is kept unless `include_live`
    ///
    /// # Arguments
    /// * `key` - Key to stop tracking
    /// * `include_live` - Also drop the live entry and its last-listener callback
    ///
    /// # Returns
    /// * `bool` - Whether a pending or cached entry was removed
    pub fn evict_with(&self, key: &K, include_live: bool) -> bool {
        let mut detached = Detached::default();
        let removed = {
            let mut tables = self.shared.tables.lock();
            if include_live {
                tables.remove_live(key);
            }
            let removed =
                tables.remove_pending(key, &mut detached) || tables.remove_cached(key).is_some();
            tables.debug_check();
            removed
        };
        if removed {
            debug!(?key, include_live, "evicted image");
        }
        detached.run();
        removed
    }

    /// Drop every pending and cached entry
    ///
    /// Live entries survive, so a result that is still observed can be
    /// re-admitted by a later request.
    pub fn clear(&self) {
        let detached = self.shared.tables.lock().clear();
        debug!("cleared image cache");
        detached.run();
    }

    /// Stop live tracking for every key; pending and cached entries stay
    pub fn clear_live_images(&self) {
        self.shared.tables.lock().clear_live();
    }

    /// Tracking status of `key`
    pub fn status_of(&self, key: &K) -> ImageCacheStatus {
        self.shared.tables.lock().status(key)
    }

    /// Whether `key` is pending or cached
    pub fn contains_key(&self, key: &K) -> bool {
        let tables = self.shared.tables.lock();
        tables.pending.contains_key(key) || tables.cached.contains_key(key)
    }

    /// Current budgets
    pub fn config(&self) -> CacheConfig {
        self.shared.tables.lock().config
    }

    /// Maximum number of cached entries
    pub fn maximum_size(&self) -> usize {
        self.config().maximum_size
    }

    /// Change the entry-count budget; `0` clears the cache
    pub fn set_maximum_size(&self, value: usize) {
        self.update_config(|config| config.maximum_size = value);
    }

    /// Maximum decoded bytes held by cached entries
    pub fn maximum_size_bytes(&self) -> usize {
        self.config().maximum_size_bytes
    }

    /// Change the byte budget; `0` clears the cache
    pub fn set_maximum_size_bytes(&self, value: usize) {
        self.update_config(|config| config.maximum_size_bytes = value);
    }

    /// Number of cached entries
    pub fn current_size(&self) -> usize {
        self.shared.tables.lock().cached.len()
    }

    /// Decoded bytes held by cached entries
    pub fn current_size_bytes(&self) -> usize {
        self.shared.tables.lock().current_size_bytes
    }

    /// Number of keys whose results are still observed
    pub fn live_image_count(&self) -> usize {
        self.shared.tables.lock().live.len()
    }

    /// Number of loads waiting for their first frame
    pub fn pending_image_count(&self) -> usize {
        self.shared.tables.lock().pending.len()
    }

    /// Request statistics
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    fn update_config(&self, update: impl FnOnce(&mut CacheConfig)) {
        let detached = {
            let mut tables = self.shared.tables.lock();
            let previous = tables.config;
            update(&mut tables.config);
            if tables.config == previous {
                return;
            }

            let config = tables.config;
            debug!(
                maximum_size = config.maximum_size,
                maximum_size_bytes = config.maximum_size_bytes,
                "image cache budgets changed"
            );
            if config.retains() {
                let evicted = policy::enforce_budgets(&mut tables);
                self.shared.record_evictions(&evicted);
                tables.debug_check();
                Detached::default()
            } else {
                tables.clear()
            }
        };
        detached.run();
    }
}

impl<K: CacheKey> Shared<K> {
    fn resolve<F>(
        self: &Arc<Self>,
        key: K,
        loader: F,
    ) -> imagestream::Result<ImageStreamCompleter>
    where
        F: FnOnce() -> imagestream::Result<ImageStreamCompleter>,
    {
        let mut tables = self.tables.lock();

        if let Some(pending) = tables.pending.get(&key) {
            trace!(?key, "joining in-flight image load");
            self.stats.record_pending_hit();
            return Ok(pending.completer.clone());
        }

        if let Some(entry) = tables.cached.promote(&key) {
            let (completer, size_bytes) = (entry.completer.clone(), entry.size_bytes);
            self.track_live(&mut tables, &key, &completer, Some(size_bytes));
            trace!(?key, "image cache hit");
            self.stats.record_hit();
            return Ok(completer);
        }

        if let Some(live) = tables.live.get_mut(&key) {
            let completer = live.completer.clone();
            // The first-frame listener may have been detached by clear or evict
            if live.size_bytes.is_none() {
                live.size_bytes = completer.current_image().map(|image| image.size_bytes());
            }
            let size_bytes = live.size_bytes;
            trace!(?key, "reusing live image");
            self.stats.record_live_hit();
            if let Some(size_bytes) = size_bytes {
                self.touch(&mut tables, key, &completer, size_bytes);
            }
            tables.debug_check();
            return Ok(completer);
        }

        trace!(?key, "image cache miss");
        self.stats.record_miss();
        let completer = match loader() {
            Ok(completer) => completer,
            Err(error) => {
                debug!(?key, %error, "image loader failed");
                self.stats.record_load_failure();
                return Err(error);
            }
        };
        // Tracked before any frame can arrive
        self.track_live(&mut tables, &key, &completer, None);

        let tracked = tables.config.retains();
        let listener = FirstFrame::listener(self, key.clone(), &completer, tracked);
        if tracked {
            tables.pending.insert(
                key,
                PendingEntry {
                    completer: completer.clone(),
                    listener: listener.id(),
                },
            );
        }
        tables.debug_check();
        drop(tables);

        // May deliver a frame synchronously
        completer.add_listener(listener);
        Ok(completer)
    }

    /// Start live tracking for `key` unless it is already live
    fn track_live(
        self: &Arc<Self>,
        tables: &mut Tables<K>,
        key: &K,
        completer: &ImageStreamCompleter,
        size_bytes: Option<usize>,
    ) {
        if let Some(live) = tables.live.get_mut(key) {
            if live.size_bytes.is_none() && live.completer.ptr_eq(completer) {
                live.size_bytes = size_bytes;
            }
            return;
        }

        let cache = Arc::downgrade(self);
        let stream = completer.downgrade();
        let owner = key.clone();
        let on_last_listener_removed = completer.add_on_last_listener_removed_callback(move || {
            if let Some(shared) = cache.upgrade() {
                shared.release_live(&owner, &stream);
            }
        });
        tables.live.insert(
            key.clone(),
            LiveEntry {
                completer: completer.clone(),
                size_bytes,
                on_last_listener_removed,
            },
        );
    }

    fn release_live(&self, key: &K, stream: &WeakImageStreamCompleter) {
        let Some(completer) = stream.upgrade() else {
            return;
        };
        let mut tables = self.tables.lock();
        let owned = tables
            .live
            .get(key)
            .is_some_and(|live| live.completer.ptr_eq(&completer));
        if owned {
            tables.live.remove(key);
            trace!(?key, "image no longer observed");
        }
    }

    /// Offer a completed result to the bounded cache
    fn touch(
        &self,
        tables: &mut Tables<K>,
        key: K,
        completer: &ImageStreamCompleter,
        size_bytes: usize,
    ) {
        let entry = CachedEntry {
            completer: completer.clone(),
            size_bytes,
        };
        match policy::touch(tables, key.clone(), entry) {
            Admission::Committed { evicted } => {
                debug!(?key, size_bytes, "image committed to cache");
                self.stats.record_insert();
                self.record_evictions(&evicted);
            }
            Admission::Rejected => {
                debug!(
                    ?key,
                    size_bytes,
                    maximum_size_bytes = tables.config.maximum_size_bytes,
                    "image not retained"
                );
            }
        }
    }

    fn record_evictions(&self, evicted: &[K]) {
        for key in evicted {
            debug!(?key, "evicted least recently used image");
        }
        self.stats.record_evictions(evicted.len() as u64);
    }
}

/// The cache's one-shot listener on a freshly loaded handle
struct FirstFrame<K> {
    cache: Weak<Shared<K>>,
    stream: WeakImageStreamCompleter,
    key: K,
    /// Whether a pending entry was recorded for this load
    tracked: bool,
    listener: OnceLock<ListenerId>,
    done: AtomicBool,
}

impl<K: CacheKey> FirstFrame<K> {
    fn listener(
        shared: &Arc<Shared<K>>,
        key: K,
        completer: &ImageStreamCompleter,
        tracked: bool,
    ) -> ImageStreamListener {
        let state = Arc::new(Self {
            cache: Arc::downgrade(shared),
            stream: completer.downgrade(),
            key,
            tracked,
            listener: OnceLock::new(),
            done: AtomicBool::new(false),
        });

        let on_image = Arc::clone(&state);
        let on_error = Arc::clone(&state);
        let listener = ImageStreamListener::new(move |image, _| on_image.frame(image))
            .on_error(move |error| on_error.failed(error));
        let _ = state.listener.set(listener.id());
        listener
    }

    fn frame(&self, image: &ImageInfo) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(completer) = self.stream.upgrade() else {
            return;
        };

        if let Some(shared) = self.cache.upgrade() {
            let size_bytes = image.size_bytes();
            let mut tables = shared.tables.lock();
            shared.track_live(&mut tables, &self.key, &completer, Some(size_bytes));
            if self.tracked && self.owns_pending(&tables) {
                tables.pending.remove(&self.key);
                shared.touch(&mut tables, self.key.clone(), &completer, size_bytes);
            }
            tables.debug_check();
        }

        self.detach(&completer);
    }

    fn failed(&self, error: &imagestream::Error) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(completer) = self.stream.upgrade() else {
            return;
        };

        if let Some(shared) = self.cache.upgrade() {
            let mut tables = shared.tables.lock();
            if self.tracked && self.owns_pending(&tables) {
                tables.pending.remove(&self.key);
            }
            let live = tables
                .live
                .get(&self.key)
                .is_some_and(|live| live.completer.ptr_eq(&completer));
            if live {
                tables.remove_live(&self.key);
            }
            drop(tables);

            debug!(key = ?self.key, %error, "image load failed");
            shared.stats.record_decode_failure();
        }

        self.detach(&completer);
    }

    fn owns_pending(&self, tables: &Tables<K>) -> bool {
        tables
            .pending
            .get(&self.key)
            .is_some_and(|pending| Some(&pending.listener) == self.listener.get())
    }

    fn detach(&self, completer: &ImageStreamCompleter) {
        if let Some(id) = self.listener.get() {
            completer.remove_listener(*id);
        }
    }
}

impl<K: CacheKey> Default for ImageCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: CacheKey> Clone for ImageCache<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K: CacheKey> fmt::Debug for ImageCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.shared.tables.lock();
        f.debug_struct("ImageCache")
            .field("config", &tables.config)
            .field("pending", &tables.pending.len())
            .field("cached", &tables.cached.len())
            .field("live", &tables.live.len())
            .field("current_size_bytes", &tables.current_size_bytes)
            .finish()
    }
}
