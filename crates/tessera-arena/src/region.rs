//! Bump-allocated memory regions.
//!
//! A [`MemoryRegion`] is one contiguous host block, optionally mirrored by a
//! device block of the same size, with host and device offsets that advance
//! in lockstep. Slices handed out of a region remember the region's
//! generation; [`MemoryRegion::rewind`] advances the generation so that every
//! slice from an earlier cycle becomes stale before its bytes can be reused.
//!
//! Rewinding is refused while any byte guard is alive. The generation still
//! advances, so the old slices are stale either way, but the offsets stay put
//! until a later rewind finds no live guards.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tessera_core::{MemError, MemoryKind};

use crate::pair::PointerPair;
use crate::raw::HostBlock;

/// Generation reported by a region whose memory has been handed back.
pub(crate) const RETIRED: u64 = u64::MAX;

/// Backing storage shared between a region and the slices it hands out.
#[derive(Debug)]
pub(crate) struct RegionStorage {
    pair: PointerPair,
    generation: AtomicU64,
    borrows: AtomicUsize,
}

impl RegionStorage {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn pair(&self) -> &PointerPair {
        &self.pair
    }

    pub(crate) fn host(&self) -> &HostBlock {
        self.pair.host()
    }

    /// Register a byte guard for a slice of `generation`.
    ///
    /// The borrow count is raised before the generation is checked, so a
    /// concurrent rewind either sees the borrow or the guard sees the new
    /// generation.
    pub(crate) fn borrow(&self, generation: u64) -> Result<RegionBorrow<'_>, MemError> {
        self.borrows.fetch_add(1, Ordering::SeqCst);
        let guard = RegionBorrow { storage: self };
        let current = self.generation();
        if current != generation {
            return Err(MemError::StaleAllocation {
                allocation_generation: generation,
                current_generation: current,
            });
        }
        Ok(guard)
    }
}

/// Live byte guard on a region. Blocks offset rewinds while held.
#[derive(Debug)]
pub(crate) struct RegionBorrow<'a> {
    storage: &'a RegionStorage,
}

impl Drop for RegionBorrow<'_> {
    fn drop(&mut self) {
        self.storage.borrows.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A region slice produced by [`MemoryRegion::bump`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bump {
    /// Byte offset of the slice within the region.
    pub offset: usize,
    /// Region generation the slice belongs to.
    pub generation: u64,
}

/// A contiguous host (and optionally device) range with bump offsets.
///
/// Invariant: `0 <= host_offset == device_offset <= capacity`.
#[derive(Debug)]
pub struct MemoryRegion {
    storage: Arc<RegionStorage>,
    host_offset: usize,
    device_offset: usize,
}

impl MemoryRegion {
    /// Wrap a pointer pair as a fresh region at offset zero, generation zero.
    pub fn new(pair: PointerPair) -> Self {
        Self {
            storage: Arc::new(RegionStorage {
                pair,
                generation: AtomicU64::new(0),
                borrows: AtomicUsize::new(0),
            }),
            host_offset: 0,
            device_offset: 0,
        }
    }

    /// Total bytes in the region.
    pub fn capacity(&self) -> usize {
        self.storage.pair.len()
    }

    /// Bytes left before the region is exhausted.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.host_offset
    }

    /// Current host bump offset.
    pub fn host_offset(&self) -> usize {
        self.host_offset
    }

    /// Current device bump offset.
    pub fn device_offset(&self) -> usize {
        self.device_offset
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.storage.generation()
    }

    /// Whether the region has a device mirror.
    pub fn has_device(&self) -> bool {
        self.storage.pair.has_device()
    }

    /// Number of byte guards currently alive on this region.
    pub fn live_borrows(&self) -> usize {
        self.storage.borrows.load(Ordering::SeqCst)
    }

    /// Advance both offsets by `bytes` if it fits.
    ///
    /// `bytes` must already be aligned. Returns `None` when the region is
    /// exhausted; the offsets are left untouched in that case.
    pub fn bump(&mut self, bytes: usize) -> Option<Bump> {
        let end = self.host_offset.checked_add(bytes)?;
        if end > self.capacity() {
            return None;
        }
        let offset = self.host_offset;
        self.host_offset = end;
        self.device_offset = end;
        Some(Bump {
            offset,
            generation: self.generation(),
        })
    }

    /// Start a new cycle.
    ///
    /// Always advances the generation. Rewinds the offsets to zero unless a
    /// byte guard is alive; returns whether the rewind happened.
    pub fn rewind(&mut self) -> bool {
        self.storage.generation.fetch_add(1, Ordering::SeqCst);
        if self.storage.borrows.load(Ordering::SeqCst) > 0 {
            return false;
        }
        self.host_offset = 0;
        self.device_offset = 0;
        true
    }

    /// Mark every outstanding slice stale and hand back the backing pair.
    pub fn retire(self) -> PointerPair {
        self.storage.generation.store(RETIRED, Ordering::SeqCst);
        self.storage.pair.clone()
    }

    /// Zero `[offset, offset + len)` on the side selected by `kind`.
    ///
    /// Only valid for a range just returned by [`MemoryRegion::bump`].
    pub fn zero(&mut self, offset: usize, len: usize, kind: MemoryKind) -> Result<(), MemError> {
        debug_assert!(offset + len <= self.host_offset);
        match kind {
            MemoryKind::Host => {
                crate::allocation::zero_fresh_range(self.storage.host(), offset, len);
                Ok(())
            }
            MemoryKind::Device => match self.storage.pair.device() {
                Some(device) => device.fill_zero(offset, len),
                None => Err(MemError::DeviceUnavailable),
            },
        }
    }

    pub(crate) fn storage(&self) -> &Arc<RegionStorage> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::AllocCounters;

    fn region(len: usize) -> MemoryRegion {
        let counters = Arc::new(AllocCounters::new());
        MemoryRegion::new(PointerPair::host_only(
            HostBlock::allocate(len, counters).unwrap(),
        ))
    }

    #[test]
    fn bump_advances_and_exhausts() {
        let mut r = region(128);
        assert_eq!(r.bump(64).map(|b| b.offset), Some(0));
        assert_eq!(r.bump(64).map(|b| b.offset), Some(64));
        assert_eq!(r.remaining(), 0);
        assert!(r.bump(32).is_none());
        assert_eq!(r.host_offset(), 128);
    }

    #[test]
    fn rewind_resets_offsets_and_bumps_generation() {
        let mut r = region(64);
        r.bump(32).unwrap();
        assert!(r.rewind());
        assert_eq!(r.host_offset(), 0);
        assert_eq!(r.device_offset(), 0);
        assert_eq!(r.generation(), 1);
    }

    #[test]
    fn rewind_deferred_while_borrowed() {
        let mut r = region(64);
        let b = r.bump(32).unwrap();
        let storage = r.storage().clone();
        let guard = storage.borrow(b.generation).unwrap();
        assert!(!r.rewind());
        assert_eq!(r.host_offset(), 32);
        drop(guard);
        assert!(r.rewind());
        assert_eq!(r.host_offset(), 0);
    }

    #[test]
    fn stale_borrow_is_rejected() {
        let mut r = region(64);
        let b = r.bump(32).unwrap();
        r.rewind();
        let storage = r.storage().clone();
        assert!(matches!(
            storage.borrow(b.generation),
            Err(MemError::StaleAllocation { .. })
        ));
        assert_eq!(r.live_borrows(), 0);
    }

    #[test]
    fn retire_marks_storage() {
        let r = region(64);
        let storage = r.storage().clone();
        let pair = r.retire();
        assert_eq!(pair.len(), 64);
        assert_eq!(storage.generation(), RETIRED);
    }

    #[test]
    fn device_zero_requires_mirror() {
        let mut r = region(64);
        let b = r.bump(32).unwrap();
        assert_eq!(
            r.zero(b.offset, 32, MemoryKind::Device),
            Err(MemError::DeviceUnavailable)
        );
        assert!(r.zero(b.offset, 32, MemoryKind::Host).is_ok());
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn offset_never_exceeds_capacity(
                cap in 0usize..512,
                ops in prop::collection::vec(prop_oneof![
                    (0usize..200).prop_map(Some),
                    Just(None),
                ], 0..40),
            ) {
                let mut r = region(cap);
                for op in ops {
                    match op {
                        Some(n) => { r.bump(n); }
                        None => { r.rewind(); }
                    }
                    prop_assert!(r.host_offset() <= r.capacity());
                    prop_assert_eq!(r.host_offset(), r.device_offset());
                }
            }
        }
    }
}
