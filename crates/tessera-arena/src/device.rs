//! Accelerator seam and device-side memory blocks.
//!
//! The subsystem never launches kernels itself; it only needs to obtain and
//! release device memory and to wait for outstanding device work before
//! reclaiming memory the device might still be reading. [`Device`] captures
//! exactly that surface.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use tessera_core::{MemError, MemoryKind};

use crate::raw::HostBlock;
use crate::stats::AllocCounters;

/// Opaque device address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DevicePtr(u64);

impl DevicePtr {
    /// Wrap a raw device address.
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Raw device address.
    pub fn addr(self) -> u64 {
        self.0
    }

    /// Address `bytes` past this one.
    pub fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes as u64)
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An accelerator backend.
///
/// Device compute may run asynchronously with respect to the host thread.
/// Callers must invoke [`Device::synchronize`] before freeing memory that
/// queued work might still reference.
pub trait Device: Send + Sync + fmt::Debug {
    /// Device index.
    fn ordinal(&self) -> u32;

    /// Total memory of the device in bytes.
    fn total_memory(&self) -> usize;

    /// Allocate `bytes` of zero-filled device memory.
    fn allocate(&self, bytes: usize) -> Result<DevicePtr, MemError>;

    /// Zero `len` bytes starting at `ptr`.
    fn fill_zero(&self, ptr: DevicePtr, len: usize) -> Result<(), MemError>;

    /// Release an allocation previously returned by [`Device::allocate`].
    fn free(&self, ptr: DevicePtr);

    /// Block until all queued device work has completed.
    fn synchronize(&self) -> Result<(), MemError>;
}

/// Owned device allocation, freed on drop.
#[derive(Debug)]
pub struct DeviceBlock {
    device: Arc<dyn Device>,
    ptr: DevicePtr,
    len: usize,
    counters: Arc<AllocCounters>,
}

impl DeviceBlock {
    /// Allocate `len` bytes on `device`.
    pub fn allocate(
        device: Arc<dyn Device>,
        len: usize,
        counters: Arc<AllocCounters>,
    ) -> Result<Self, MemError> {
        let ptr = device.allocate(len)?;
        counters.record_alloc(len);
        Ok(Self {
            device,
            ptr,
            len,
            counters,
        })
    }

    /// Base device address.
    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Zero `[offset, offset + len)` on the device.
    pub fn fill_zero(&self, offset: usize, len: usize) -> Result<(), MemError> {
        self.device.fill_zero(self.ptr.offset(offset), len)
    }
}

impl Drop for DeviceBlock {
    fn drop(&mut self) {
        tracing::trace!(ptr = %self.ptr, len = self.len, "freeing device block");
        self.device.free(self.ptr);
        self.counters.record_free(self.len);
    }
}

/// In-process accelerator backed by host memory.
///
/// Used where no real accelerator is present (tests, benchmarks, CPU-only
/// deployments that still exercise the mirrored code path). Work queued with
/// [`HostMirrorDevice::launch`] stays "in flight" until the next
/// [`Device::synchronize`]; freeing memory while work is in flight is
/// counted as a hazard, which is how the one-cycle pin delay and the
/// sync-before-reclaim rule are verified.
#[derive(Debug)]
pub struct HostMirrorDevice {
    ordinal: u32,
    total_memory: usize,
    blocks: Mutex<IndexMap<u64, HostBlock>>,
    counters: Arc<AllocCounters>,
    in_flight: AtomicU64,
    syncs: AtomicU64,
    hazards: AtomicU64,
}

impl HostMirrorDevice {
    /// Create a simulated device with the given ordinal and memory size.
    pub fn new(ordinal: u32, total_memory: usize) -> Self {
        Self {
            ordinal,
            total_memory,
            blocks: Mutex::new(IndexMap::new()),
            counters: Arc::new(AllocCounters::new()),
            in_flight: AtomicU64::new(0),
            syncs: AtomicU64::new(0),
            hazards: AtomicU64::new(0),
        }
    }

    /// Queue one unit of asynchronous work.
    pub fn launch(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Units of work queued since the last synchronize.
    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of `synchronize` calls so far.
    pub fn sync_count(&self) -> u64 {
        self.syncs.load(Ordering::SeqCst)
    }

    /// Number of frees issued while work was still in flight.
    pub fn hazard_count(&self) -> u64 {
        self.hazards.load(Ordering::SeqCst)
    }

    /// Number of live device allocations.
    pub fn live_allocations(&self) -> usize {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bytes currently allocated on the device.
    pub fn used_bytes(&self) -> usize {
        self.counters.snapshot().live_bytes
    }
}

impl Device for HostMirrorDevice {
    fn ordinal(&self) -> u32 {
        self.ordinal
    }

    fn total_memory(&self) -> usize {
        self.total_memory
    }

    fn allocate(&self, bytes: usize) -> Result<DevicePtr, MemError> {
        if self.used_bytes().saturating_add(bytes) > self.total_memory {
            return Err(MemError::AllocationFailed {
                requested: bytes,
                kind: MemoryKind::Device,
            });
        }
        let block = HostBlock::allocate(bytes, self.counters.clone()).map_err(|_| {
            MemError::AllocationFailed {
                requested: bytes,
                kind: MemoryKind::Device,
            }
        })?;
        let addr = block.as_ptr().as_ptr() as u64;
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr, block);
        Ok(DevicePtr(addr))
    }

    fn fill_zero(&self, ptr: DevicePtr, len: usize) -> Result<(), MemError> {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        let block = blocks
            .iter_mut()
            .find(|(&base, b)| ptr.0 >= base && ptr.0 - base + len as u64 <= b.len() as u64)
            .map(|(&base, b)| (base, b));
        match block {
            Some((base, b)) => {
                let start = (ptr.0 - base) as usize;
                b.as_mut_slice()[start..start + len].fill(0);
                Ok(())
            }
            None => Err(MemError::DeviceFailure {
                reason: format!("fill_zero on unknown range {ptr} (+{len})"),
            }),
        }
    }

    fn free(&self, ptr: DevicePtr) {
        if self.in_flight() > 0 {
            self.hazards.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(ptr = %ptr, "device memory freed while work is in flight");
        }
        let removed = self
            .blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&ptr.0);
        if removed.is_none() {
            tracing::warn!(ptr = %ptr, "free of unknown device pointer");
        }
    }

    fn synchronize(&self) -> Result<(), MemError> {
        self.syncs.fetch_add(1, Ordering::SeqCst);
        self.in_flight.store(0, Ordering::SeqCst);
        Ok(())
    }
}
