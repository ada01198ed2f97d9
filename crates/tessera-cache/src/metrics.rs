//! Array cache counters.

/// Counters for one [`ArrayCache`](crate::ArrayCache).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    /// Allocations served from the cache.
    pub hits: u64,
    /// Allocations that needed fresh memory.
    pub misses: u64,
    /// Allocations of empty shapes (bypass the cache).
    pub empty_allocations: u64,
    /// Releases that retained the buffer.
    pub cached_releases: u64,
    /// Releases that dropped the buffer.
    pub freed_releases: u64,
    /// Releases of views or non-closeable handles.
    pub defused_releases: u64,
    /// Releases rejected as double releases.
    pub double_releases: u64,
    /// Cached buffers freed to get back under budget.
    pub evictions: u64,
    /// Bytes currently cached.
    pub current_bytes: usize,
    /// High-water mark of `current_bytes`.
    pub peak_bytes: usize,
}

impl CacheMetrics {
    /// Fraction of non-empty allocations served from the cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
