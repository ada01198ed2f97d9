//! Raw host memory blocks.
//!
//! This is the only module that calls the global allocator directly.
//! Every block is allocated zero-filled with [`ALIGNMENT`]-byte alignment,
//! so every byte later exposed through a slice is initialised.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use tessera_core::{MemError, MemoryKind};

use crate::stats::AllocCounters;

/// Alignment quantum for every pointer handed out by this crate, in bytes.
pub const ALIGNMENT: usize = 32;

/// Round `bytes` up to the next multiple of [`ALIGNMENT`].
///
/// Returns `None` on overflow.
pub fn align_up(bytes: usize) -> Option<usize> {
    match bytes % ALIGNMENT {
        0 => Some(bytes),
        rem => bytes.checked_add(ALIGNMENT - rem),
    }
}

/// A contiguous, zero-initialised, [`ALIGNMENT`]-aligned host allocation.
///
/// Released exactly once, on drop.
pub struct HostBlock {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
    counters: Arc<AllocCounters>,
}

// SAFETY: HostBlock uniquely owns its allocation. The pointer is only
// dereferenced through `as_mut_slice` (exclusive borrow) or the crate-private
// range accessors, whose callers guarantee disjointness of live slices.
unsafe impl Send for HostBlock {}
// SAFETY: see above; shared access never produces overlapping mutable slices.
unsafe impl Sync for HostBlock {}

impl HostBlock {
    /// Allocate `len` zeroed bytes from the global allocator.
    ///
    /// A zero-length request still reserves one alignment quantum so the
    /// pointer is real and aligned.
    pub fn allocate(len: usize, counters: Arc<AllocCounters>) -> Result<Self, MemError> {
        let failed = MemError::AllocationFailed {
            requested: len,
            kind: MemoryKind::Host,
        };
        let layout = Layout::from_size_align(len.max(1), ALIGNMENT).map_err(|_| failed.clone())?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(failed)?;
        counters.record_alloc(len);
        Ok(Self {
            ptr,
            len,
            layout,
            counters,
        })
    }

    /// Usable length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block has zero usable bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base pointer of the block.
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// The whole block as a mutable slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `&mut self` guarantees exclusive access; the block is
        // `len` initialised bytes.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Mutable view of `[offset, offset + len)`.
    ///
    /// # Safety
    ///
    /// The range must be in bounds and no other slice overlapping it may be
    /// alive for the returned lifetime.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn range_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len)
    }
}

impl Drop for HostBlock {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by `alloc_zeroed` with exactly this layout
        // and is freed only here.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
        self.counters.record_free(self.len);
    }
}

impl fmt::Debug for HostBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBlock")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
