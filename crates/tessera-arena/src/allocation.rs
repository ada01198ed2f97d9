//! Allocations handed out by workspaces and the memory manager.
//!
//! An [`Allocation`] records where its bytes came from. Host bytes are only
//! reachable through [`HostBytes`]/[`HostBytesMut`] guards, which check that
//! the allocation is still live (its region has not moved on to a later
//! cycle, its spill has not been reclaimed) before exposing a slice.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tessera_core::{MemError, MemoryKind, RecordId};

use crate::dealloc::Deallocator;
use crate::device::DevicePtr;
use crate::pair::PointerPair;
use crate::raw::HostBlock;
use crate::region::{RegionBorrow, RegionStorage};

/// Zero a range of a block that no live slice covers.
pub(crate) fn zero_fresh_range(block: &HostBlock, offset: usize, len: usize) {
    // SAFETY: callers pass a range just bumped out of a region; slices from
    // earlier generations cannot obtain a guard, and no guard was alive when
    // the offsets were last rewound.
    unsafe { block.range_mut(offset, len) }.fill(0);
}

/// Where an allocation's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocationOrigin {
    /// Zero-length; no memory behind it.
    Empty,
    /// Bump-allocated from a workspace region.
    Region,
    /// Spilled out of a workspace region into a workspace-owned block.
    Spilled,
    /// Obtained directly from the general-purpose allocator.
    Standalone,
    /// Backed by the tracker's constant pool.
    Constant,
}

/// A slice of a workspace region.
#[derive(Debug)]
pub struct RegionSlice {
    pub(crate) storage: Arc<RegionStorage>,
    pub(crate) offset: usize,
    pub(crate) len: usize,
    pub(crate) capacity: usize,
    pub(crate) generation: u64,
    pub(crate) kind: MemoryKind,
}

/// A spilled allocation owned by a workspace's external list or pinned queue.
///
/// The workspace holds the only strong reference; once it releases the
/// block, this slice reports [`MemError::StaleAllocation`].
#[derive(Debug)]
pub struct SpilledSlice {
    pub(crate) host: Weak<HostBlock>,
    pub(crate) host_ptr: NonNull<u8>,
    pub(crate) device_ptr: Option<DevicePtr>,
    pub(crate) len: usize,
    pub(crate) capacity: usize,
    pub(crate) cycle: u64,
    pub(crate) cycles: Arc<AtomicU64>,
    pub(crate) kind: MemoryKind,
}

// SAFETY: `host_ptr` is only dereferenced while a strong reference obtained
// from `host` is held.
unsafe impl Send for SpilledSlice {}
// SAFETY: shared access only produces shared slices.
unsafe impl Sync for SpilledSlice {}

/// A standalone allocation with its own release record.
#[derive(Debug)]
pub struct StandaloneAllocation {
    // Dropped before `dealloc`, so the record holds the last reference and
    // its release actually frees the memory.
    pub(crate) pair: PointerPair,
    pub(crate) len: usize,
    pub(crate) dealloc: Deallocator,
}

/// Memory backing one array buffer.
#[derive(Debug)]
pub enum Allocation {
    /// Zero-length allocation.
    Empty,
    /// Workspace region slice.
    Region(RegionSlice),
    /// Workspace spill.
    Spilled(SpilledSlice),
    /// Standalone (or constant) allocation.
    Standalone(StandaloneAllocation),
}

impl Allocation {
    /// Requested length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Region(r) => r.len,
            Self::Spilled(s) => s.len,
            Self::Standalone(s) => s.len,
        }
    }

    /// Whether the allocation is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes actually reserved (requested length rounded up to alignment
    /// for workspace allocations).
    pub fn capacity(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Region(r) => r.capacity,
            Self::Spilled(s) => s.capacity,
            Self::Standalone(s) => s.pair.len(),
        }
    }

    /// Where the memory lives.
    pub fn origin(&self) -> AllocationOrigin {
        match self {
            Self::Empty => AllocationOrigin::Empty,
            Self::Region(_) => AllocationOrigin::Region,
            Self::Spilled(_) => AllocationOrigin::Spilled,
            Self::Standalone(s) if s.dealloc.is_constant() => AllocationOrigin::Constant,
            Self::Standalone(_) => AllocationOrigin::Standalone,
        }
    }

    /// Memory kind requested at allocation time.
    pub fn kind(&self) -> MemoryKind {
        match self {
            Self::Region(r) => r.kind,
            Self::Spilled(s) => s.kind,
            Self::Standalone(s) if s.pair.has_device() => MemoryKind::Device,
            Self::Empty | Self::Standalone(_) => MemoryKind::Host,
        }
    }

    /// Host address of the first byte. Dangling for empty allocations.
    pub fn host_ptr(&self) -> NonNull<u8> {
        match self {
            Self::Empty => NonNull::dangling(),
            Self::Region(r) => {
                let base = r.storage.host().as_ptr().as_ptr();
                // Offset is within the region by construction.
                NonNull::new(base.wrapping_add(r.offset)).unwrap_or(NonNull::dangling())
            }
            Self::Spilled(s) => s.host_ptr,
            Self::Standalone(s) => s.pair.host_ptr(),
        }
    }

    /// Device address of the first byte, if the memory is mirrored.
    pub fn device_ptr(&self) -> Option<DevicePtr> {
        match self {
            Self::Empty => None,
            Self::Region(r) => r.storage.pair().device_ptr().map(|p| p.offset(r.offset)),
            Self::Spilled(s) => s.device_ptr,
            Self::Standalone(s) => s.pair.device_ptr(),
        }
    }

    /// Region generation or spill cycle this allocation belongs to.
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::Region(r) => Some(r.generation),
            Self::Spilled(s) => Some(s.cycle),
            Self::Empty | Self::Standalone(_) => None,
        }
    }

    /// Release record of a standalone allocation.
    pub fn record(&self) -> Option<RecordId> {
        match self {
            Self::Standalone(s) => Some(s.dealloc.record()),
            _ => None,
        }
    }

    /// Whether the memory is still valid.
    pub fn check_live(&self) -> Result<(), MemError> {
        match self {
            Self::Empty | Self::Standalone(_) => Ok(()),
            Self::Region(r) => {
                let current = r.storage.generation();
                if current == r.generation {
                    Ok(())
                } else {
                    Err(MemError::StaleAllocation {
                        allocation_generation: r.generation,
                        current_generation: current,
                    })
                }
            }
            Self::Spilled(s) => {
                if s.host.strong_count() > 0 {
                    Ok(())
                } else {
                    Err(s.stale())
                }
            }
        }
    }

    /// Shared access to the host bytes.
    pub fn bytes(&self) -> Result<HostBytes<'_>, MemError> {
        let (ptr, len, hold) = self.acquire()?;
        Ok(HostBytes {
            ptr,
            len,
            _hold: hold,
        })
    }

    /// Exclusive access to the host bytes.
    pub fn bytes_mut(&mut self) -> Result<HostBytesMut<'_>, MemError> {
        let (ptr, len, hold) = self.acquire()?;
        Ok(HostBytesMut {
            ptr,
            len,
            _hold: hold,
        })
    }

    fn acquire(&self) -> Result<(NonNull<u8>, usize, Hold<'_>), MemError> {
        match self {
            Self::Empty => Ok((NonNull::dangling(), 0, Hold::Nothing(PhantomData))),
            Self::Region(r) => {
                let borrow = r.storage.borrow(r.generation)?;
                Ok((self.host_ptr(), r.len, Hold::Region(borrow)))
            }
            Self::Spilled(s) => {
                let block = s.host.upgrade().ok_or_else(|| s.stale())?;
                Ok((s.host_ptr, s.len, Hold::Block(block)))
            }
            Self::Standalone(s) => Ok((
                s.pair.host_ptr(),
                s.len,
                Hold::Nothing(PhantomData),
            )),
        }
    }
}

impl SpilledSlice {
    fn stale(&self) -> MemError {
        MemError::StaleAllocation {
            allocation_generation: self.cycle,
            current_generation: self.cycles.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug)]
enum Hold<'a> {
    Nothing(PhantomData<&'a ()>),
    Region(RegionBorrow<'a>),
    Block(Arc<HostBlock>),
}

/// Shared guard over an allocation's host bytes.
pub struct HostBytes<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _hold: Hold<'a>,
}

impl Deref for HostBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr..ptr+len` lies inside a zero-initialised block kept
        // alive by `_hold` (or by the borrowed allocation). Mutable guards
        // require `&mut Allocation`, so none overlaps this one.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for HostBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBytes").field("len", &self.len).finish()
    }
}

/// Exclusive guard over an allocation's host bytes.
pub struct HostBytesMut<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _hold: Hold<'a>,
}

impl Deref for HostBytesMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: see `HostBytes::deref`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for HostBytesMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: the guard was created from `&mut Allocation`; allocations
        // never overlap within a live generation, so this is the only slice
        // over the range.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for HostBytesMut<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBytesMut").field("len", &self.len).finish()
    }
}
