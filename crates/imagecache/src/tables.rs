//! Entry tracking tables
//!
//! - **pending**: loads that have not produced a first frame yet
//! - **cached**: completed loads retained under the budgets, in recency order
//! - **live**: loads whose handle still has listeners, independent of budgets

use std::collections::HashMap;
use std::hash::Hash;

use ahash::RandomState;
use imagestream::{CallbackId, ImageStreamCompleter, ListenerId};

use crate::config::CacheConfig;
use crate::lru::RecencyMap;
use crate::status::ImageCacheStatus;

/// An in-flight load and the cache's own first-frame listener on it
pub(crate) struct PendingEntry {
    pub completer: ImageStreamCompleter,
    pub listener: ListenerId,
}

/// A completed load held within the budgets
pub(crate) struct CachedEntry {
    pub completer: ImageStreamCompleter,
    pub size_bytes: usize,
}

/// A load that something still observes
pub(crate) struct LiveEntry {
    pub completer: ImageStreamCompleter,
    /// Unknown until the first frame arrives
    pub size_bytes: Option<usize>,
    pub on_last_listener_removed: CallbackId,
}

/// Listener removals to perform once the tables are unlocked
///
/// Removing a listener can fire last-listener-removed callbacks, which lock
/// the tables again.
#[must_use]
#[derive(Default)]
pub(crate) struct Detached {
    listeners: Vec<(ImageStreamCompleter, ListenerId)>,
}

impl Detached {
    pub fn push(&mut self, completer: ImageStreamCompleter, listener: ListenerId) {
        self.listeners.push((completer, listener));
    }

    pub fn run(self) {
        for (completer, listener) in self.listeners {
            completer.remove_listener(listener);
        }
    }
}

pub(crate) struct Tables<K> {
    pub pending: HashMap<K, PendingEntry, RandomState>,
    pub cached: RecencyMap<K, CachedEntry>,
    pub live: HashMap<K, LiveEntry, RandomState>,
    pub current_size_bytes: usize,
    pub config: CacheConfig,
}

impl<K> Tables<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            pending: HashMap::with_hasher(RandomState::new()),
            cached: RecencyMap::new(),
            live: HashMap::with_hasher(RandomState::new()),
            current_size_bytes: 0,
            config,
        }
    }

    pub fn status(&self, key: &K) -> ImageCacheStatus {
        let status = ImageCacheStatus {
            pending: self.pending.contains_key(key),
            keep_alive: self.cached.contains_key(key),
            live: self.live.contains_key(key),
        };
        debug_assert!(
            !(status.pending && status.keep_alive),
            "image is both pending and cached"
        );
        status
    }

    /// Remove a cached entry, keeping the byte counter in step
    pub fn remove_cached(&mut self, key: &K) -> Option<CachedEntry> {
        let entry = self.cached.remove(key)?;
        self.current_size_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Stop live tracking for `key`, unregistering its callback
    pub fn remove_live(&mut self, key: &K) -> Option<LiveEntry> {
        let entry = self.live.remove(key)?;
        entry
            .completer
            .remove_on_last_listener_removed_callback(entry.on_last_listener_removed);
        Some(entry)
    }

    /// Drop a pending entry, queueing removal of its listener
    pub fn remove_pending(&mut self, key: &K, detached: &mut Detached) -> bool {
        match self.pending.remove(key) {
            Some(entry) => {
                detached.push(entry.completer, entry.listener);
                true
            }
            None => false,
        }
    }

    /// Drop every pending and cached entry; live entries are kept
    pub fn clear(&mut self) -> Detached {
        let mut detached = Detached::default();
        for (_, entry) in self.pending.drain() {
            detached.push(entry.completer, entry.listener);
        }
        self.cached.clear();
        self.current_size_bytes = 0;
        detached
    }

    /// Stop live tracking for every key
    pub fn clear_live(&mut self) {
        for (_, entry) in self.live.drain() {
            entry
                .completer
                .remove_on_last_listener_removed_callback(entry.on_last_listener_removed);
        }
    }

    /// Check the table invariants in debug builds
    pub fn debug_check(&self) {
        if cfg!(debug_assertions) {
            let total: usize = self.cached.iter().map(|(_, e)| e.size_bytes).sum();
            debug_assert_eq!(total, self.current_size_bytes, "byte counter drifted");
            debug_assert!(self.cached.len() <= self.config.maximum_size);
            debug_assert!(self.current_size_bytes <= self.config.maximum_size_bytes);
            debug_assert!(
                self.pending.keys().all(|k| !self.cached.contains_key(k)),
                "image is both pending and cached"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imagestream::ImageStreamListener;

    fn cached(size_bytes: usize) -> CachedEntry {
        CachedEntry {
            completer: ImageStreamCompleter::new(),
            size_bytes,
        }
    }

    #[test]
    fn test_remove_cached_updates_bytes() {
        let mut tables = Tables::new(CacheConfig::default());
        tables.cached.insert("a", cached(100));
        tables.cached.insert("b", cached(50));
        tables.current_size_bytes = 150;

        assert!(tables.remove_cached(&"a").is_some());
        assert_eq!(tables.current_size_bytes, 50);
        assert!(tables.remove_cached(&"a").is_none());
        tables.debug_check();
    }

    #[test]
    fn test_clear_keeps_live_and_detaches_pending() {
        let mut tables = Tables::new(CacheConfig::default());
        let completer = ImageStreamCompleter::new();
        let listener = completer.add_listener(ImageStreamListener::new(|_, _| {}));
        tables.pending.insert(
            "p",
            PendingEntry {
                completer: completer.clone(),
                listener,
            },
        );
        let callback = completer.add_on_last_listener_removed_callback(|| {});
        tables.live.insert(
            "p",
            LiveEntry {
                completer: completer.clone(),
                size_bytes: None,
                on_last_listener_removed: callback,
            },
        );
        tables.cached.insert("c", cached(10));
        tables.current_size_bytes = 10;

        let detached = tables.clear();
        assert!(tables.pending.is_empty());
        assert!(tables.cached.is_empty());
        assert_eq!(tables.current_size_bytes, 0);
        assert!(tables.live.contains_key(&"p"));

        assert!(completer.has_listeners());
        detached.run();
        assert!(!completer.has_listeners());
    }

    #[test]
    fn test_remove_live_unregisters_callback() {
        let mut tables: Tables<&str> = Tables::new(CacheConfig::default());
        let completer = ImageStreamCompleter::new();
        let callback = completer.add_on_last_listener_removed_callback(|| {});
        tables.live.insert(
            "k",
            LiveEntry {
                completer: completer.clone(),
                size_bytes: Some(4),
                on_last_listener_removed: callback,
            },
        );

        assert!(tables.remove_live(&"k").is_some());
        assert!(!completer.remove_on_last_listener_removed_callback(callback));
    }
}
