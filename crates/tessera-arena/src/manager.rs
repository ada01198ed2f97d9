//! General-purpose allocator handle.

use std::sync::Arc;

use tessera_core::{MemError, MemoryKind};

use crate::allocation::{Allocation, StandaloneAllocation};
use crate::dealloc::{DeallocTracker, RecordKind};
use crate::device::{Device, DeviceBlock};
use crate::pair::PointerPair;
use crate::raw::HostBlock;
use crate::stats::{AllocCounters, AllocStats};

/// Memory assumed when neither a device nor `/proc/meminfo` reports a size.
pub const FALLBACK_TOTAL_MEMORY: usize = 8 << 30;

#[derive(Debug)]
struct ManagerInner {
    host: Arc<AllocCounters>,
    device_counters: Arc<AllocCounters>,
    device: Option<Arc<dyn Device>>,
    tracker: DeallocTracker,
}

/// Handle to the general-purpose allocator.
///
/// Owns per-kind allocation counters, the optional accelerator and the
/// deallocation tracker. Cloning is cheap; clones share all state.
#[derive(Clone, Debug)]
pub struct MemoryManager {
    inner: Arc<ManagerInner>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    /// Host-only manager.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Manager with an attached accelerator.
    pub fn with_device(device: Arc<dyn Device>) -> Self {
        Self::build(Some(device))
    }

    fn build(device: Option<Arc<dyn Device>>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                host: Arc::new(AllocCounters::new()),
                device_counters: Arc::new(AllocCounters::new()),
                device,
                tracker: DeallocTracker::new(),
            }),
        }
    }

    /// The attached accelerator, if any.
    pub fn device(&self) -> Option<&Arc<dyn Device>> {
        self.inner.device.as_ref()
    }

    /// The deallocation tracker for records created by this manager.
    pub fn tracker(&self) -> &DeallocTracker {
        &self.inner.tracker
    }

    /// Host allocator counters.
    pub fn host_stats(&self) -> AllocStats {
        self.inner.host.snapshot()
    }

    /// Device allocator counters.
    pub fn device_stats(&self) -> AllocStats {
        self.inner.device_counters.snapshot()
    }

    /// Total memory the cache budget is computed from: device memory if a
    /// device is attached, otherwise physical host memory.
    pub fn total_memory_bytes(&self) -> usize {
        if let Some(device) = &self.inner.device {
            return device.total_memory();
        }
        host_total_memory().unwrap_or(FALLBACK_TOTAL_MEMORY)
    }

    /// Allocate a zeroed host block.
    pub fn allocate_host(&self, bytes: usize) -> Result<HostBlock, MemError> {
        HostBlock::allocate(bytes, self.inner.host.clone())
    }

    /// Allocate a host block, plus a device block when `kind` is
    /// [`MemoryKind::Device`].
    pub fn allocate_pair(&self, bytes: usize, kind: MemoryKind) -> Result<PointerPair, MemError> {
        match kind {
            MemoryKind::Host => Ok(PointerPair::host_only(self.allocate_host(bytes)?)),
            MemoryKind::Device => {
                let device = self
                    .inner
                    .device
                    .clone()
                    .ok_or(MemError::DeviceUnavailable)?;
                let host = self.allocate_host(bytes)?;
                let dev = DeviceBlock::allocate(device, bytes, self.inner.device_counters.clone())?;
                Ok(PointerPair::mirrored(host, dev))
            }
        }
    }

    /// Allocate memory outside any workspace, with its own release record.
    pub fn allocate_standalone(
        &self,
        bytes: usize,
        kind: MemoryKind,
    ) -> Result<Allocation, MemError> {
        if bytes == 0 {
            return Ok(Allocation::Empty);
        }
        let pair = self.allocate_pair(bytes, kind)?;
        let mut dealloc = self.inner.tracker.register(RecordKind::Buffer, bytes);
        dealloc.hold(pair.clone());
        Ok(Allocation::Standalone(StandaloneAllocation {
            pair,
            len: bytes,
            dealloc,
        }))
    }

    /// Copy `data` into host memory owned by the constant pool.
    ///
    /// Dropping the returned allocation does not free the memory; it lives
    /// until the tracker itself is dropped.
    pub fn allocate_constant(&self, data: &[u8]) -> Result<Allocation, MemError> {
        if data.is_empty() {
            return Ok(Allocation::Empty);
        }
        let mut block = self.allocate_host(data.len())?;
        block.as_mut_slice().copy_from_slice(data);
        let pair = PointerPair::host_only(block);
        let mut dealloc = self.inner.tracker.register_constant(data.len());
        dealloc.hold(pair.clone());
        Ok(Allocation::Standalone(StandaloneAllocation {
            pair,
            len: data.len(),
            dealloc,
        }))
    }

    /// Wait for outstanding device work. No-op without a device.
    pub fn synchronize(&self) -> Result<(), MemError> {
        match &self.inner.device {
            Some(device) => device.synchronize(),
            None => Ok(()),
        }
    }
}

/// `MemTotal` from `/proc/meminfo`, in bytes.
fn host_total_memory() -> Option<usize> {
    let text = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_mem_total(&text)
}

fn parse_mem_total(text: &str) -> Option<usize> {
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: usize = line.split_whitespace().nth(1)?.parse().ok()?;
    kib.checked_mul(1024)
}
