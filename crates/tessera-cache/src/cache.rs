//! Cross-iteration array reuse cache.
//!
//! [`ArrayCache`] sits in front of "create a new buffer". Released owning
//! buffers are kept, keyed by `(data type, shape text)`, and handed back out
//! by later allocations of the same key with a fresh identifier. A byte
//! budget (`max_mem_fraction × total memory`) is enforced after every
//! release by evicting the least recently released buffers.
//!
//! The cache is a plain value owned by the thread that uses it. It has no
//! shared state, so nothing on the allocate/release path takes a lock.

use std::collections::VecDeque;

use indexmap::IndexMap;
use tessera_arena::{AllocationOrigin, MemoryManager, Workspace};
use tessera_core::{ArrayId, DataType, MemError, Shape};

use crate::buffer::{Buffer, OwnedBuffer};
use crate::config::CacheConfig;
use crate::handle::ArrayHandle;
use crate::lru::LruIndex;
use crate::metrics::CacheMetrics;

/// Cache slot key: element type plus shape text (e.g. `[4, 4]`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    dtype: DataType,
    shape: String,
}

impl CacheKey {
    /// Key for `(dtype, shape)`.
    pub fn new(dtype: DataType, shape: &Shape) -> Self {
        Self {
            dtype,
            shape: shape.to_string(),
        }
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Shape text.
    pub fn shape(&self) -> &str {
        &self.shape
    }
}

/// What [`ArrayCache::release`] did with a handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReleaseOutcome {
    /// The buffer was retained for reuse.
    Cached,
    /// The buffer was dropped; its memory is freed once no view holds it.
    Released,
    /// A view or non-closeable handle; nothing was cached or freed.
    Defused,
}

#[derive(Debug)]
struct CachedEntry {
    id: ArrayId,
    buffer: OwnedBuffer,
    bytes: usize,
}

/// Reuse cache for array buffers.
#[derive(Debug)]
pub struct ArrayCache {
    config: CacheConfig,
    max_cache_bytes: usize,
    manager: MemoryManager,
    workspace: Option<Workspace>,
    arrays: IndexMap<CacheKey, VecDeque<CachedEntry>>,
    lru: LruIndex,
    current_bytes: usize,
    metrics: CacheMetrics,
    closed: bool,
}

impl ArrayCache {
    /// Create a cache allocating through `manager`.
    ///
    /// The budget is computed once, here.
    pub fn new(config: CacheConfig, manager: &MemoryManager) -> Result<Self, MemError> {
        config.validate()?;
        let total = config
            .total_memory_bytes
            .unwrap_or_else(|| manager.total_memory_bytes());
        let max_cache_bytes = config.max_cache_bytes(total);
        tracing::debug!(
            enabled = config.enabled,
            total_memory = total,
            max_cache_bytes,
            "array cache created"
        );
        Ok(Self {
            config,
            max_cache_bytes,
            manager: manager.clone(),
            workspace: None,
            arrays: IndexMap::new(),
            lru: LruIndex::new(),
            current_bytes: 0,
            metrics: CacheMetrics::default(),
            closed: false,
        })
    }

    /// Create a cache using the process-wide [`CacheConfig::global`].
    pub fn with_global_config(manager: &MemoryManager) -> Result<Self, MemError> {
        Self::new(CacheConfig::global().clone(), manager)
    }

    /// Make `workspace` the active workspace for non-detached misses.
    ///
    /// Returns the previously attached workspace.
    pub fn attach_workspace(&mut self, workspace: Workspace) -> Option<Workspace> {
        self.workspace.replace(workspace)
    }

    /// Detach and return the active workspace.
    pub fn detach_workspace(&mut self) -> Option<Workspace> {
        self.workspace.take()
    }

    /// The active workspace.
    pub fn workspace_mut(&mut self) -> Option<&mut Workspace> {
        self.workspace.as_mut()
    }

    /// Allocate an array of `dtype` and `shape`.
    ///
    /// Serves a cached buffer of the same key when one is available (its
    /// previous contents are left in place), otherwise allocates fresh
    /// zeroed memory: from the active workspace unless `detached`, from the
    /// general-purpose allocator otherwise. Empty shapes bypass the cache.
    pub fn allocate(
        &mut self,
        dtype: DataType,
        shape: impl Into<Shape>,
        detached: bool,
    ) -> Result<ArrayHandle, MemError> {
        let shape = shape.into();
        if shape.is_empty() {
            self.metrics.empty_allocations += 1;
            return ArrayHandle::from_allocation(dtype, shape, tessera_arena::Allocation::Empty);
        }
        let bytes = shape.byte_len(dtype)?;

        if self.config.enabled && !self.closed {
            let key = CacheKey::new(dtype, &shape);
            if let Some(entry) = self.take(&key) {
                self.lru.remove(entry.id);
                self.current_bytes -= entry.bytes;
                self.metrics.hits += 1;
                self.metrics.current_bytes = self.current_bytes;
                let id = ArrayId::next();
                tracing::trace!(old = %entry.id, new = %id, key = %key.shape, "cache hit");
                return Ok(ArrayHandle {
                    id,
                    dtype,
                    shape,
                    buffer: Buffer::Owned(entry.buffer),
                    closeable: true,
                });
            }
        }

        self.metrics.misses += 1;
        let kind = self.config.memory_kind;
        let allocation = match self.workspace.as_mut() {
            Some(ws) if !detached => ws.allocate(bytes, kind, true)?,
            _ => self.manager.allocate_standalone(bytes, kind)?,
        };
        ArrayHandle::from_allocation(dtype, shape, allocation)
    }

    fn take(&mut self, key: &CacheKey) -> Option<CachedEntry> {
        let slot = self.arrays.get_mut(key)?;
        let entry = slot.pop_front();
        if slot.is_empty() {
            self.arrays.swap_remove(key);
        }
        entry
    }

    /// Hand a handle back.
    ///
    /// Views and non-closeable handles are defused: nothing is cached or
    /// freed on their behalf. Owning buffers are cached when caching is
    /// enabled and the buffer qualifies, otherwise dropped. Releasing a
    /// handle whose identifier is already cached is a
    /// [`MemError::DoubleRelease`].
    pub fn release(&mut self, handle: ArrayHandle) -> Result<ReleaseOutcome, MemError> {
        let ArrayHandle {
            id,
            dtype,
            shape,
            buffer,
            closeable,
        } = handle;

        let owned = match buffer {
            Buffer::View(_) => {
                self.metrics.defused_releases += 1;
                tracing::trace!(id = %id, "view released; defused");
                return Ok(ReleaseOutcome::Defused);
            }
            Buffer::Owned(owned) => owned,
        };

        if self.lru.contains(id) {
            self.metrics.double_releases += 1;
            tracing::warn!(id = %id, shape = %shape, "array was released multiple times");
            return Err(MemError::DoubleRelease { id });
        }

        if !closeable {
            self.metrics.defused_releases += 1;
            tracing::trace!(id = %id, "non-closeable array released; defused");
            return Ok(ReleaseOutcome::Defused);
        }

        if !self.config.enabled || self.closed || !self.is_cacheable(&owned, dtype, &shape) {
            if frees_device_memory(&owned) {
                self.manager.synchronize()?;
            }
            self.metrics.freed_releases += 1;
            drop(owned);
            return Ok(ReleaseOutcome::Released);
        }

        let bytes = owned.capacity();
        let key = CacheKey::new(dtype, &shape);
        self.lru.insert(id, key.clone());
        self.arrays.entry(key).or_default().push_back(CachedEntry {
            id,
            buffer: owned,
            bytes,
        });
        self.current_bytes += bytes;
        self.metrics.cached_releases += 1;
        self.metrics.peak_bytes = self.metrics.peak_bytes.max(self.current_bytes);
        let evicted = self.evict();
        self.metrics.current_bytes = self.current_bytes;
        self.free(evicted)?;
        Ok(ReleaseOutcome::Cached)
    }

    fn is_cacheable(&self, owned: &OwnedBuffer, dtype: DataType, shape: &Shape) -> bool {
        if owned.origin() != AllocationOrigin::Standalone || owned.is_aliased() {
            return false;
        }
        let capacity = owned.capacity();
        let slot_bytes = dtype.width().saturating_mul(shape.length());
        capacity >= slot_bytes
            && capacity > self.config.small_array_threshold
            && capacity as f64 <= self.config.large_array_max_multiple * slot_bytes as f64
            && capacity <= self.max_cache_bytes
    }

    /// Unlink least recently released entries until the budget holds.
    ///
    /// The buffers are returned rather than dropped so the caller can
    /// synchronize the device first.
    fn evict(&mut self) -> Vec<OwnedBuffer> {
        let mut evicted = Vec::new();
        while self.current_bytes > self.max_cache_bytes {
            let Some((id, key)) = self.lru.pop_oldest() else {
                break;
            };
            let Some(slot) = self.arrays.get_mut(&key) else {
                continue;
            };
            let Some(pos) = slot.iter().position(|e| e.id == id) else {
                continue;
            };
            if let Some(entry) = slot.remove(pos) {
                self.current_bytes -= entry.bytes;
                self.metrics.evictions += 1;
                tracing::debug!(id = %id, bytes = entry.bytes, key = %key.shape, "evicted cached array");
                evicted.push(entry.buffer);
            }
            if slot.is_empty() {
                self.arrays.swap_remove(&key);
            }
        }
        evicted
    }

    /// Drop `buffers`, waiting for outstanding device work first if any of
    /// them owns device memory.
    fn free(&self, buffers: Vec<OwnedBuffer>) -> Result<(), MemError> {
        if buffers.iter().any(frees_device_memory) {
            self.manager.synchronize()?;
        }
        drop(buffers);
        Ok(())
    }

    /// Free every cached buffer and stop caching. Further releases drop
    /// their buffers. Idempotent.
    ///
    /// A device-backed cache synchronizes the device before freeing; if
    /// that fails the cache is left open and untouched.
    pub fn close(&mut self) -> Result<(), MemError> {
        if self.closed {
            return Ok(());
        }
        let any_device = self
            .arrays
            .values()
            .flat_map(|slot| slot.iter())
            .any(|e| frees_device_memory(&e.buffer));
        if any_device {
            self.manager.synchronize()?;
        }
        let count = self.lru.len();
        self.arrays.clear();
        self.lru.clear();
        self.current_bytes = 0;
        self.metrics.current_bytes = 0;
        self.closed = true;
        tracing::debug!(freed = count, "array cache closed");
        Ok(())
    }

    /// Whether [`ArrayCache::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Bytes currently cached.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Byte budget.
    pub fn max_cache_bytes(&self) -> usize {
        self.max_cache_bytes
    }

    /// Number of cached buffers.
    pub fn cached_count(&self) -> usize {
        self.lru.len()
    }

    /// Number of cached buffers under `(dtype, shape)`.
    pub fn cached_for(&self, dtype: DataType, shape: &Shape) -> usize {
        self.arrays
            .get(&CacheKey::new(dtype, shape))
            .map_or(0, VecDeque::len)
    }

    /// Counters snapshot.
    pub fn metrics(&self) -> CacheMetrics {
        self.metrics
    }

    /// Configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The memory manager misses allocate from.
    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }
}

/// Whether dropping `buffer` hands device memory back to the device.
///
/// Workspace-backed buffers never do: their workspace owns the memory.
fn frees_device_memory(buffer: &OwnedBuffer) -> bool {
    buffer.origin() == AllocationOrigin::Standalone
        && !buffer.is_aliased()
        && buffer.allocation().device_ptr().is_some()
}

impl Drop for ArrayCache {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "array cache teardown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tessera_arena::{HostMirrorDevice, WorkspaceConfig};
    use tessera_core::MemoryKind;

    fn config(total: usize) -> CacheConfig {
        CacheConfig {
            small_array_threshold: 0,
            total_memory_bytes: Some(total),
            ..CacheConfig::default()
        }
    }

    fn cache(total: usize) -> (MemoryManager, ArrayCache) {
        let mm = MemoryManager::new();
        let cache = ArrayCache::new(config(total), &mm).unwrap();
        (mm, cache)
    }

    #[test]
    fn reuse_assigns_new_id_and_keeps_capacity() {
        let (mm, mut cache) = cache(1 << 20);
        let a = cache.allocate(DataType::Float, [4, 4], true).unwrap();
        let (old_id, cap) = (a.id(), a.capacity());
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Cached);
        assert_eq!(cache.current_bytes(), 64);
        let before = mm.host_stats().allocations;
        let b = cache.allocate(DataType::Float, [4, 4], true).unwrap();
        assert_ne!(b.id(), old_id);
        assert_eq!(b.capacity(), cap);
        assert_eq!(mm.host_stats().allocations, before);
        assert_eq!(cache.current_bytes(), 0);
        assert_eq!(cache.metrics().hits, 1);
    }

    #[test]
    fn keys_distinguish_dtype_and_shape() {
        let (_mm, mut cache) = cache(1 << 20);
        let a = cache.allocate(DataType::Float, [4, 4], true).unwrap();
        cache.release(a).unwrap();
        let b = cache.allocate(DataType::Int32, [4, 4], true).unwrap();
        let c = cache.allocate(DataType::Float, [2, 8], true).unwrap();
        assert_eq!(cache.metrics().hits, 0);
        assert_eq!(cache.cached_for(DataType::Float, &Shape::new(&[4, 4])), 1);
        drop((b, c));
    }

    #[test]
    fn small_arrays_are_not_cached_by_default() {
        let mm = MemoryManager::new();
        let mut cache = ArrayCache::new(
            CacheConfig {
                total_memory_bytes: Some(1 << 20),
                ..CacheConfig::default()
            },
            &mm,
        )
        .unwrap();
        let small = cache.allocate(DataType::Float, [16], true).unwrap();
        assert_eq!(cache.release(small).unwrap(), ReleaseOutcome::Released);
        let big = cache.allocate(DataType::Float, [1024], true).unwrap();
        assert_eq!(cache.release(big).unwrap(), ReleaseOutcome::Cached);
    }

    #[test]
    fn disabled_cache_frees() {
        let mm = MemoryManager::new();
        let mut cache = ArrayCache::new(
            CacheConfig {
                enabled: false,
                ..config(1 << 20)
            },
            &mm,
        )
        .unwrap();
        let a = cache.allocate(DataType::Float, [64], true).unwrap();
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        assert_eq!(mm.host_stats().live_bytes, 0);
    }

    #[test]
    fn views_are_defused_and_never_free_the_owner() {
        let (mm, mut cache) = cache(1 << 20);
        let a = cache.allocate(DataType::Float, [8], true).unwrap();
        let v = a.view(0, [4]).unwrap();
        assert_eq!(cache.release(v).unwrap(), ReleaseOutcome::Defused);
        assert_eq!(mm.host_stats().frees, 0);
        assert_eq!(cache.cached_count(), 0);
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Cached);
    }

    #[test]
    fn aliased_owner_is_not_cached() {
        let (mm, mut cache) = cache(1 << 20);
        let a = cache.allocate(DataType::Float, [8], true).unwrap();
        let v = a.view(0, [8]).unwrap();
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        assert_eq!(mm.host_stats().frees, 0);
        assert!(v.as_bytes().is_ok());
        drop(v);
        assert_eq!(mm.host_stats().frees, 1);
    }

    #[test]
    fn non_closeable_is_defused() {
        let (_mm, mut cache) = cache(1 << 20);
        let mut a = cache.allocate(DataType::Float, [8], true).unwrap();
        a.set_closeable(false);
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Defused);
        assert_eq!(cache.cached_count(), 0);
    }

    #[test]
    fn double_release_is_reported() {
        let (_mm, mut cache) = cache(1 << 20);
        let a = cache.allocate(DataType::Float, [8], true).unwrap();
        let id = a.id();
        cache.release(a).unwrap();
        let mut forged = cache.allocate(DataType::Float, [16], true).unwrap();
        forged.id = id;
        assert_eq!(
            cache.release(forged).unwrap_err(),
            MemError::DoubleRelease { id }
        );
        assert_eq!(cache.metrics().double_releases, 1);
        assert_eq!(cache.cached_count(), 1);
    }

    #[test]
    fn eviction_is_least_recently_released_first() {
        // Budget of 256 bytes: room for two 128-byte buffers.
        let (mm, mut cache) = cache(1024);
        let a = cache.allocate(DataType::Float, [32], true).unwrap();
        let b = cache.allocate(DataType::Float, [32], true).unwrap();
        let c = cache.allocate(DataType::Float, [32], true).unwrap();
        let (ida, idb, idc) = (a.id(), b.id(), c.id());
        cache.release(a).unwrap();
        cache.release(b).unwrap();
        cache.release(c).unwrap();
        assert_eq!(cache.current_bytes(), 256);
        assert_eq!(cache.metrics().evictions, 1);
        assert!(!cache.lru.contains(ida));
        assert!(cache.lru.contains(idb));
        assert!(cache.lru.contains(idc));
        assert_eq!(mm.host_stats().frees, 1);
    }

    #[test]
    fn buffers_larger_than_budget_are_freed() {
        let (_mm, mut cache) = cache(1024);
        let a = cache.allocate(DataType::Double, [64], true).unwrap();
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        assert_eq!(cache.current_bytes(), 0);
    }

    #[test]
    fn empty_shapes_bypass_cache() {
        let (mm, mut cache) = cache(1 << 20);
        let a = cache.allocate(DataType::Float, [0, 4], true).unwrap();
        assert_eq!(a.byte_len(), 0);
        assert_eq!(a.origin(), Some(AllocationOrigin::Empty));
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        assert_eq!(mm.host_stats().allocations, 0);
        assert_eq!(cache.metrics().empty_allocations, 1);
    }

    #[test]
    fn workspace_misses_are_not_cached() {
        let (mm, mut cache) = cache(1 << 20);
        let ws = Workspace::open(WorkspaceConfig::fixed(1024), &mm).unwrap();
        cache.attach_workspace(ws);
        let a = cache.allocate(DataType::Float, [8], false).unwrap();
        assert_eq!(a.origin(), Some(AllocationOrigin::Region));
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        let d = cache.allocate(DataType::Float, [8], true).unwrap();
        assert_eq!(d.origin(), Some(AllocationOrigin::Standalone));
        assert!(cache.detach_workspace().is_some());
    }

    #[test]
    fn close_frees_everything_and_stops_caching() {
        let (mm, mut cache) = cache(1 << 20);
        for _ in 0..4 {
            let a = cache.allocate(DataType::Float, [64], true).unwrap();
            let b = cache.allocate(DataType::Float, [64], true).unwrap();
            cache.release(a).unwrap();
            cache.release(b).unwrap();
        }
        assert!(cache.cached_count() > 0);
        cache.close().unwrap();
        assert_eq!(cache.current_bytes(), 0);
        assert_eq!(mm.host_stats().live_bytes, 0);
        let a = cache.allocate(DataType::Float, [64], true).unwrap();
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        cache.close().unwrap();
        assert!(cache.is_closed());
    }

    #[test]
    fn drop_closes() {
        let mm = MemoryManager::new();
        {
            let mut cache = ArrayCache::new(config(1 << 20), &mm).unwrap();
            let a = cache.allocate(DataType::Float, [64], true).unwrap();
            cache.release(a).unwrap();
        }
        assert_eq!(mm.host_stats().live_bytes, 0);
        assert_eq!(mm.tracker().live_records(), 0);
    }

    #[test]
    fn oversized_buffer_is_not_cached_under_small_slot() {
        let (mm, mut cache) = cache(1 << 20);
        // 4096 bytes behind a 16-byte [4] FLOAT slot: over the 2x multiple.
        let alloc = mm.allocate_standalone(4096, MemoryKind::Host).unwrap();
        let a = ArrayHandle::from_allocation(DataType::Float, Shape::new(&[4]), alloc).unwrap();
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        assert_eq!(cache.cached_count(), 0);
        assert_eq!(mm.host_stats().live_bytes, 0);

        // Exactly 2x still qualifies.
        let alloc = mm.allocate_standalone(32, MemoryKind::Host).unwrap();
        let b = ArrayHandle::from_allocation(DataType::Float, Shape::new(&[4]), alloc).unwrap();
        assert_eq!(cache.release(b).unwrap(), ReleaseOutcome::Cached);
    }

    #[test]
    fn undersized_buffer_is_never_cached() {
        let (mm, mut cache) = cache(1 << 20);
        let alloc = mm.allocate_standalone(16, MemoryKind::Host).unwrap();
        assert!(matches!(
            ArrayHandle::from_allocation(DataType::Float, Shape::new(&[4, 4]), alloc),
            Err(MemError::BufferTooSmall { required: 64, available: 16 })
        ));

        // A handle assembled around a short buffer is freed, not cached.
        let short = ArrayHandle {
            id: ArrayId::next(),
            dtype: DataType::Float,
            shape: Shape::new(&[4, 4]),
            buffer: Buffer::Owned(OwnedBuffer::new(
                mm.allocate_standalone(16, MemoryKind::Host).unwrap(),
            )),
            closeable: true,
        };
        assert_eq!(cache.release(short).unwrap(), ReleaseOutcome::Released);
        let b = cache.allocate(DataType::Float, [4, 4], true).unwrap();
        assert_eq!(b.capacity(), 64);
        assert_eq!(cache.metrics().hits, 0);
    }

    fn device_cache(total: usize) -> (Arc<HostMirrorDevice>, ArrayCache) {
        let device = Arc::new(HostMirrorDevice::new(0, 1 << 20));
        let mm = MemoryManager::with_device(device.clone());
        let config = CacheConfig {
            memory_kind: MemoryKind::Device,
            ..config(total)
        };
        let cache = ArrayCache::new(config, &mm).unwrap();
        (device, cache)
    }

    #[test]
    fn eviction_waits_for_device_work() {
        let (device, mut cache) = device_cache(1024);
        let handles: Vec<_> = (0..3)
            .map(|_| cache.allocate(DataType::Float, [32], true).unwrap())
            .collect();
        device.launch();
        for h in handles {
            cache.release(h).unwrap();
        }
        assert_eq!(cache.metrics().evictions, 1);
        assert!(device.sync_count() >= 1);
        assert_eq!(device.hazard_count(), 0);
    }

    #[test]
    fn freed_release_waits_for_device_work() {
        let (device, mut cache) = device_cache(1024);
        // 512 bytes exceeds the 256-byte budget.
        let a = cache.allocate(DataType::Double, [64], true).unwrap();
        device.launch();
        assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);
        assert_eq!(device.hazard_count(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn close_waits_for_device_work() {
        let (device, mut cache) = device_cache(1 << 20);
        let a = cache.allocate(DataType::Float, [64], true).unwrap();
        cache.release(a).unwrap();
        device.launch();
        cache.close().unwrap();
        assert_eq!(device.hazard_count(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Clone, Debug)]
        enum Op {
            Allocate(usize),
            Release(usize),
        }

        fn op() -> impl Strategy<Value = Op> {
            prop_oneof![
                (1usize..64).prop_map(Op::Allocate),
                any::<usize>().prop_map(Op::Release),
            ]
        }

        proptest! {
            #[test]
            fn counter_matches_contents_and_budget(
                total in 256usize..8192,
                ops in prop::collection::vec(op(), 0..80),
            ) {
                let mm = MemoryManager::new();
                let mut cache = ArrayCache::new(config(total), &mm).unwrap();
                let mut live: Vec<ArrayHandle> = Vec::new();
                for op in ops {
                    match op {
                        Op::Allocate(n) => {
                            live.push(cache.allocate(DataType::Float, [n], true).unwrap());
                        }
                        Op::Release(i) if !live.is_empty() => {
                            let h = live.swap_remove(i % live.len());
                            cache.release(h).unwrap();
                        }
                        Op::Release(_) => {}
                    }
                    let sum: usize = cache
                        .arrays
                        .values()
                        .flat_map(|slot| slot.iter().map(|e| e.bytes))
                        .sum();
                    prop_assert_eq!(sum, cache.current_bytes());
                    prop_assert!(cache.current_bytes() <= cache.max_cache_bytes());
                    prop_assert_eq!(cache.lru.len(), cache.arrays.values().map(VecDeque::len).sum::<usize>());
                }
            }
        }
    }
}
