//! Per-key tracking status

/// Where the cache is tracking a key
///
/// `pending` and `keep_alive` are never both set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageCacheStatus {
    /// A load for the key has been started and has not produced a frame yet
    pub pending: bool,
    /// The key's result is held in the bounded cache
    pub keep_alive: bool,
    /// The key's result is still observed by at least one listener
    pub live: bool,
}

impl ImageCacheStatus {
    /// Whether the cache knows about the key in any table
    pub fn tracked(&self) -> bool {
        self.pending || self.keep_alive || self.live
    }

    /// Whether the cache does not know about the key at all
    pub fn untracked(&self) -> bool {
        !self.tracked()
    }
}
