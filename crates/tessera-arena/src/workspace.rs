//! Per-context arena allocator.
//!
//! A [`Workspace`] serves allocations by bumping an offset through its
//! primary [`MemoryRegion`]. When the region is exhausted, the request spills
//! into a standalone block the workspace keeps until it is safe to release:
//!
//! - scoped workspaces ([`ResetPolicy::BlockLeft`](crate::ResetPolicy::BlockLeft)) keep spills in an
//!   external list released at every [`Workspace::reset`];
//! - cyclic workspaces ([`ResetPolicy::EndOfBuffer`](crate::ResetPolicy::EndOfBuffer)) pin spills, tagged with
//!   the cycle they were made in. A spill pinned in cycle `N` survives the
//!   reset that ends `N` and is released by the reset that ends `N + 1`,
//!   giving asynchronous device readers one full extra cycle.
//!
//! Mirrored workspaces wait for outstanding device work before releasing any
//! external or pinned block.
//!
//! A workspace is driven by one thread at a time; every mutating operation
//! takes `&mut self`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_core::{MemError, MemoryKind, WorkspaceId};

use crate::allocation::{Allocation, RegionSlice, SpilledSlice};
use crate::config::{LearningPolicy, SpillPolicy, WorkspaceConfig};
use crate::dealloc::{Deallocator, RecordKind};
use crate::manager::MemoryManager;
use crate::pair::PointerPair;
use crate::raw::align_up;
use crate::region::MemoryRegion;

/// Disabled-workspace allocations between warnings.
const DISABLED_WARN_INTERVAL: u64 = 10;

#[derive(Debug)]
struct PinnedPair {
    cycle: u64,
    pair: PointerPair,
}

/// Point-in-time statistics for a workspace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkspaceStats {
    /// Completed cycles (calls to `reset`).
    pub cycles: u64,
    /// Aligned bytes requested so far in the current cycle.
    pub cycle_bytes: usize,
    /// Aligned bytes requested in the previous cycle.
    pub last_cycle_bytes: usize,
    /// Largest cycle seen.
    pub max_cycle_bytes: usize,
    /// Total bytes ever spilled.
    pub spilled_bytes: usize,
    /// Total allocations ever spilled.
    pub spilled_count: u64,
    /// Bytes currently held in the pinned queue.
    pub pinned_bytes: usize,
    /// Blocks currently held in the pinned queue.
    pub pinned_count: usize,
    /// Blocks currently held in the external list.
    pub external_count: usize,
    /// Current host offset of the primary region.
    pub host_offset: usize,
    /// Current device offset of the primary region.
    pub device_offset: usize,
    /// Capacity of the primary region.
    pub capacity: usize,
    /// Resets whose offset rewind was postponed by a live byte guard.
    pub deferred_rewinds: u64,
}

/// Arena allocator for one execution context.
#[derive(Debug)]
pub struct Workspace {
    id: WorkspaceId,
    config: WorkspaceConfig,
    manager: MemoryManager,
    region: Option<MemoryRegion>,
    external: Vec<PointerPair>,
    pinned: VecDeque<PinnedPair>,
    cycles: Arc<AtomicU64>,
    dealloc: Deallocator,
    in_use: bool,
    disabled_allocations: u64,
    stats: WorkspaceStats,
    destroyed: bool,
}

impl Workspace {
    /// Validate `config` and create a workspace backed by `manager`.
    pub fn open(config: WorkspaceConfig, manager: &MemoryManager) -> Result<Self, MemError> {
        config.validate()?;
        if config.mirrored && manager.device().is_none() {
            return Err(MemError::DeviceUnavailable);
        }
        let size = config.initial_region_size();
        let mut ws = Self {
            id: WorkspaceId::next(),
            dealloc: manager.tracker().register(RecordKind::Workspace, size),
            config,
            manager: manager.clone(),
            region: None,
            external: Vec::new(),
            pinned: VecDeque::new(),
            cycles: Arc::new(AtomicU64::new(0)),
            in_use: true,
            disabled_allocations: 0,
            stats: WorkspaceStats::default(),
            destroyed: false,
        };
        if size > 0 {
            ws.region = Some(ws.new_region(size)?);
        }
        tracing::debug!(
            workspace = %ws.id,
            capacity = size,
            cyclic = ws.config.is_cyclic(),
            mirrored = ws.config.mirrored,
            "workspace opened"
        );
        Ok(ws)
    }

    fn new_region(&self, size: usize) -> Result<MemoryRegion, MemError> {
        let kind = if self.config.mirrored {
            MemoryKind::Device
        } else {
            MemoryKind::Host
        };
        Ok(MemoryRegion::new(self.manager.allocate_pair(size, kind)?))
    }

    /// Allocate `bytes`, bump-allocating from the primary region when it
    /// fits and spilling otherwise.
    ///
    /// `zero` requests zero-filled memory. Spills are always fresh zeroed
    /// blocks; region memory reused across cycles is only cleared on request.
    pub fn allocate(
        &mut self,
        bytes: usize,
        kind: MemoryKind,
        zero: bool,
    ) -> Result<Allocation, MemError> {
        if self.destroyed {
            return Err(MemError::WorkspaceDestroyed { workspace: self.id });
        }
        if kind == MemoryKind::Device && !self.config.mirrored {
            return Err(MemError::DeviceUnavailable);
        }
        if bytes == 0 {
            return Ok(Allocation::Empty);
        }
        let aligned = align_up(bytes).ok_or(MemError::AllocationFailed {
            requested: bytes,
            kind,
        })?;

        if !self.in_use {
            self.disabled_allocations += 1;
            if self.disabled_allocations % DISABLED_WARN_INTERVAL == 0 {
                tracing::warn!(
                    workspace = %self.id,
                    allocations = self.disabled_allocations,
                    "workspace is turned off and has not been re-enabled"
                );
            }
            return self.spill(bytes, aligned, kind, false);
        }

        self.stats.cycle_bytes = self.stats.cycle_bytes.saturating_add(aligned);

        if !self.config.spill_everything {
            if let Some(region) = self.region.as_mut() {
                if let Some(bump) = region.bump(aligned) {
                    if zero {
                        region.zero(bump.offset, aligned, kind)?;
                    }
                    return Ok(Allocation::Region(RegionSlice {
                        storage: region.storage().clone(),
                        offset: bump.offset,
                        len: bytes,
                        capacity: aligned,
                        generation: bump.generation,
                        kind,
                    }));
                }
            }
        }

        if self.config.spill_policy == SpillPolicy::Fail {
            return Err(MemError::WorkspaceFull {
                requested: aligned,
                remaining: self.region.as_ref().map_or(0, MemoryRegion::remaining),
            });
        }
        let pin = self.config.is_cyclic();
        self.spill(bytes, aligned, kind, pin)
    }

    fn spill(
        &mut self,
        bytes: usize,
        aligned: usize,
        kind: MemoryKind,
        pin: bool,
    ) -> Result<Allocation, MemError> {
        let pair = self.manager.allocate_pair(aligned, kind)?;
        let cycle = self.cycles.load(Ordering::SeqCst);
        let slice = SpilledSlice {
            host: pair.downgrade_host(),
            host_ptr: pair.host_ptr(),
            device_ptr: pair.device_ptr(),
            len: bytes,
            capacity: aligned,
            cycle,
            cycles: self.cycles.clone(),
            kind,
        };
        self.stats.spilled_bytes = self.stats.spilled_bytes.saturating_add(aligned);
        self.stats.spilled_count += 1;
        tracing::trace!(workspace = %self.id, bytes = aligned, pin, cycle, "allocation spilled");
        if pin {
            self.pinned.push_back(PinnedPair { cycle, pair });
        } else {
            self.external.push(pair);
        }
        Ok(Allocation::Spilled(slice))
    }

    /// End the current cycle and start the next one.
    ///
    /// Rewinds the primary region to offset zero without touching its
    /// contents, releases the external list and every pinned block old
    /// enough to be out of reach of device work. `extended` releases the
    /// whole pinned queue. Region allocations from the finished cycle become
    /// stale.
    pub fn reset(&mut self, extended: bool) -> Result<(), MemError> {
        if self.destroyed {
            return Err(MemError::WorkspaceDestroyed { workspace: self.id });
        }
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.cycles = cycle;
        self.stats.last_cycle_bytes = self.stats.cycle_bytes;
        self.stats.max_cycle_bytes = self.stats.max_cycle_bytes.max(self.stats.cycle_bytes);

        let mut released: Vec<PointerPair> = self.external.drain(..).collect();
        while let Some(front) = self.pinned.front() {
            if !extended && front.cycle + 2 > cycle {
                break;
            }
            if let Some(entry) = self.pinned.pop_front() {
                released.push(entry.pair);
            }
        }
        if !released.is_empty() {
            if self.config.mirrored {
                self.manager.synchronize()?;
            }
            for pair in released {
                pair.release();
            }
        }

        if let Some(size) = self.planned_region_size().filter(|&size| size > 0) {
            self.reinitialize(size)?;
        }

        if let Some(region) = self.region.as_mut() {
            if !region.rewind() {
                self.stats.deferred_rewinds += 1;
                tracing::debug!(
                    workspace = %self.id,
                    offset = region.host_offset(),
                    "region rewind deferred by live byte guard"
                );
            }
        }

        if !self.in_use {
            tracing::warn!(workspace = %self.id, "workspace was turned off and never turned back on");
            self.in_use = true;
        }
        self.disabled_allocations = 0;
        self.stats.cycle_bytes = 0;
        tracing::debug!(
            workspace = %self.id,
            cycle,
            last_cycle_bytes = self.stats.last_cycle_bytes,
            pinned = self.pinned.len(),
            "workspace reset"
        );
        Ok(())
    }

    fn planned_region_size(&self) -> Option<usize> {
        if self.config.spill_everything {
            return None;
        }
        let current = self.capacity();
        let max_cycle = self.stats.max_cycle_bytes;
        if current == 0 {
            if self.config.learning_policy == LearningPolicy::FirstLoop && max_cycle > 0 {
                return Some(self.config.learned_size(max_cycle));
            }
            let initial = self.config.initial_region_size();
            return (initial > 0).then_some(initial);
        }
        if self.config.spill_policy == SpillPolicy::Reallocate
            && !self.config.is_cyclic()
            && self.stats.last_cycle_bytes > current
        {
            return Some(self.config.learned_size(max_cycle));
        }
        None
    }

    fn reinitialize(&mut self, size: usize) -> Result<(), MemError> {
        self.destroy(false)?;
        self.region = Some(self.new_region(size)?);
        self.dealloc.set_bytes(size);
        tracing::debug!(workspace = %self.id, capacity = size, "workspace region initialized");
        Ok(())
    }

    /// Release workspace memory.
    ///
    /// `extended = false` releases only the primary region; the workspace
    /// stays usable and spills until the next reset reinitializes the
    /// region. `extended = true` releases everything and runs the
    /// workspace's release record; further calls are no-ops.
    pub fn destroy(&mut self, extended: bool) -> Result<(), MemError> {
        if self.destroyed {
            return Ok(());
        }
        if !extended {
            if let Some(region) = self.region.take() {
                let pair = region.retire();
                if self.config.mirrored {
                    self.manager.synchronize()?;
                }
                pair.release();
            }
            return Ok(());
        }
        if self.config.mirrored {
            self.manager.synchronize()?;
        }
        for pair in self.external.drain(..) {
            self.dealloc.hold(pair);
        }
        for entry in self.pinned.drain(..) {
            self.dealloc.hold(entry.pair);
        }
        if let Some(region) = self.region.take() {
            self.dealloc.hold(region.retire());
        }
        self.dealloc.deallocate();
        self.destroyed = true;
        tracing::debug!(workspace = %self.id, cycles = self.stats.cycles, "workspace destroyed");
        Ok(())
    }

    /// Enable or disable bump allocation. While disabled, every allocation
    /// is an external allocation. The next reset re-enables the workspace.
    pub fn toggle_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    /// Whether bump allocation is enabled.
    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Workspace identity.
    pub fn id(&self) -> WorkspaceId {
        self.id
    }

    /// Configuration the workspace was opened with.
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    /// The memory manager backing this workspace.
    pub fn manager(&self) -> &MemoryManager {
        &self.manager
    }

    /// Capacity of the primary region; zero when there is none.
    pub fn capacity(&self) -> usize {
        self.region.as_ref().map_or(0, MemoryRegion::capacity)
    }

    /// Current host offset of the primary region.
    pub fn host_offset(&self) -> usize {
        self.region.as_ref().map_or(0, MemoryRegion::host_offset)
    }

    /// Current device offset of the primary region.
    pub fn device_offset(&self) -> usize {
        self.region.as_ref().map_or(0, MemoryRegion::device_offset)
    }

    /// Current region generation.
    pub fn generation(&self) -> u64 {
        self.region.as_ref().map_or(0, MemoryRegion::generation)
    }

    /// Completed cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Blocks in the external list.
    pub fn external_count(&self) -> usize {
        self.external.len()
    }

    /// Blocks in the pinned queue.
    pub fn pinned_count(&self) -> usize {
        self.pinned.len()
    }

    /// Whether [`Workspace::destroy`] with `extended = true` has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Snapshot of the workspace statistics.
    pub fn stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            pinned_bytes: self.pinned.iter().map(|p| p.pair.len()).sum(),
            pinned_count: self.pinned.len(),
            external_count: self.external.len(),
            host_offset: self.host_offset(),
            device_offset: self.device_offset(),
            capacity: self.capacity(),
            ..self.stats
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = self.destroy(true) {
            tracing::warn!(workspace = %self.id, error = %err, "workspace teardown failed");
        }
    }
}
