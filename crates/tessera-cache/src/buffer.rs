//! Owning and view buffers.
//!
//! A view shares its source's allocation through an `Arc` and covers a byte
//! range of it. Views are read-only, and an owning buffer refuses mutable
//! access while any view is alive. A view can never be cached or free
//! memory: dropping it only drops its share of the allocation.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tessera_arena::{Allocation, AllocationOrigin, HostBytes, HostBytesMut};
use tessera_core::MemError;

/// A buffer that owns its allocation.
#[derive(Debug)]
pub struct OwnedBuffer {
    storage: Arc<Allocation>,
}

impl OwnedBuffer {
    /// Take ownership of `allocation`.
    pub fn new(allocation: Allocation) -> Self {
        Self {
            storage: Arc::new(allocation),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the buffer is zero-length.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Reserved bytes.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Where the memory lives.
    pub fn origin(&self) -> AllocationOrigin {
        self.storage.origin()
    }

    /// The backing allocation.
    pub fn allocation(&self) -> &Allocation {
        &self.storage
    }

    /// Number of live views onto this buffer.
    pub fn view_count(&self) -> usize {
        Arc::strong_count(&self.storage) - 1
    }

    /// Whether any view is alive.
    pub fn is_aliased(&self) -> bool {
        self.view_count() > 0
    }

    /// Shared access to the bytes.
    pub fn bytes(&self) -> Result<HostBytes<'_>, MemError> {
        self.storage.bytes()
    }

    /// Exclusive access to the bytes. Fails while views are alive.
    pub fn bytes_mut(&mut self) -> Result<HostBytesMut<'_>, MemError> {
        let views = self.view_count();
        Arc::get_mut(&mut self.storage)
            .ok_or(MemError::Aliased { views })?
            .bytes_mut()
    }

    /// A read-only view of `[offset, offset + len)`.
    pub fn view(&self, offset: usize, len: usize) -> Result<ViewBuffer, MemError> {
        ViewBuffer::new(self.storage.clone(), 0, self.len(), offset, len)
    }
}

/// A read-only window onto another buffer's allocation.
#[derive(Clone)]
pub struct ViewBuffer {
    storage: Arc<Allocation>,
    offset: usize,
    len: usize,
}

impl ViewBuffer {
    fn new(
        storage: Arc<Allocation>,
        base: usize,
        available: usize,
        offset: usize,
        len: usize,
    ) -> Result<Self, MemError> {
        match offset.checked_add(len) {
            Some(end) if end <= available => Ok(Self {
                storage,
                offset: base + offset,
                len,
            }),
            _ => Err(MemError::ViewOutOfBounds {
                offset,
                len,
                available,
            }),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte offset within the source allocation.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Shared access to the viewed bytes.
    pub fn bytes(&self) -> Result<BufferBytes<'_>, MemError> {
        Ok(BufferBytes {
            guard: self.storage.bytes()?,
            offset: self.offset,
            len: self.len,
        })
    }

    /// A narrower view, relative to this one.
    pub fn view(&self, offset: usize, len: usize) -> Result<ViewBuffer, MemError> {
        ViewBuffer::new(self.storage.clone(), self.offset, self.len, offset, len)
    }
}

impl fmt::Debug for ViewBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("origin", &self.storage.origin())
            .finish()
    }
}

/// Backing store of an array handle.
#[derive(Debug)]
pub enum Buffer {
    /// Owns its memory; may be cached on release.
    Owned(OwnedBuffer),
    /// Aliases part of an owned buffer; never cached, never frees.
    View(ViewBuffer),
}

impl Buffer {
    /// Length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Owned(b) => b.len(),
            Self::View(v) => v.len(),
        }
    }

    /// Whether the buffer is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is a view.
    pub fn is_view(&self) -> bool {
        matches!(self, Self::View(_))
    }

    /// Shared access to the bytes.
    pub fn bytes(&self) -> Result<BufferBytes<'_>, MemError> {
        match self {
            Self::Owned(b) => Ok(BufferBytes {
                guard: b.bytes()?,
                offset: 0,
                len: b.len(),
            }),
            Self::View(v) => v.bytes(),
        }
    }

    /// Exclusive access to the bytes. Views are read-only.
    pub fn bytes_mut(&mut self) -> Result<HostBytesMut<'_>, MemError> {
        match self {
            Self::Owned(b) => b.bytes_mut(),
            Self::View(_) => Err(MemError::ReadOnlyView),
        }
    }

    /// A read-only view of `[offset, offset + len)`.
    pub fn view(&self, offset: usize, len: usize) -> Result<ViewBuffer, MemError> {
        match self {
            Self::Owned(b) => b.view(offset, len),
            Self::View(v) => v.view(offset, len),
        }
    }
}

/// Shared guard over a buffer's bytes.
pub struct BufferBytes<'a> {
    guard: HostBytes<'a>,
    offset: usize,
    len: usize,
}

impl Deref for BufferBytes<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[self.offset..self.offset + self.len]
    }
}

impl fmt::Debug for BufferBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferBytes")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
