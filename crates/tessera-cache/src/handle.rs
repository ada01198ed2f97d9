//! User-visible array handles.

use tessera_arena::{Allocation, AllocationOrigin, HostBytesMut};
use tessera_core::{ArrayId, DataType, MemError, Shape};

use crate::buffer::{Buffer, BufferBytes, OwnedBuffer};

/// An n-dimensional array: element type, shape and backing buffer.
///
/// Handles are created by [`ArrayCache::allocate`](crate::ArrayCache::allocate)
/// or by [`ArrayHandle::view`]. The identifier is reassigned every time a
/// buffer comes back out of the cache.
#[derive(Debug)]
pub struct ArrayHandle {
    pub(crate) id: ArrayId,
    pub(crate) dtype: DataType,
    pub(crate) shape: Shape,
    pub(crate) buffer: Buffer,
    pub(crate) closeable: bool,
}

impl ArrayHandle {
    /// Wrap a fresh allocation in an owning handle with a new identifier.
    ///
    /// Fails with [`MemError::BufferTooSmall`] when the allocation cannot
    /// hold `shape.length()` elements of `dtype`.
    pub fn from_allocation(
        dtype: DataType,
        shape: Shape,
        allocation: Allocation,
    ) -> Result<Self, MemError> {
        let required = shape.byte_len(dtype)?;
        if allocation.len() < required {
            return Err(MemError::BufferTooSmall {
                required,
                available: allocation.len(),
            });
        }
        Ok(Self {
            id: ArrayId::next(),
            dtype,
            shape,
            buffer: Buffer::Owned(OwnedBuffer::new(allocation)),
            closeable: true,
        })
    }

    /// A read-only view of `shape.length()` elements starting at element
    /// `element_offset` of this array.
    pub fn view(
        &self,
        element_offset: usize,
        shape: impl Into<Shape>,
    ) -> Result<ArrayHandle, MemError> {
        let shape = shape.into();
        let width = self.dtype.width();
        let len = shape.byte_len(self.dtype)?;
        let offset = element_offset
            .checked_mul(width)
            .ok_or(MemError::ViewOutOfBounds {
                offset: usize::MAX,
                len,
                available: self.buffer.len(),
            })?;
        let view = self.buffer.view(offset, len)?;
        Ok(ArrayHandle {
            id: ArrayId::next(),
            dtype: self.dtype,
            shape,
            buffer: Buffer::View(view),
            closeable: true,
        })
    }

    /// Identifier.
    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Element type.
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    /// Shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Number of elements.
    pub fn length(&self) -> usize {
        self.shape.length()
    }

    /// Length in bytes.
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }

    /// The backing buffer.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Whether this handle owns its memory (is not a view).
    pub fn owns_memory(&self) -> bool {
        !self.buffer.is_view()
    }

    /// Whether this handle is a view.
    pub fn is_view(&self) -> bool {
        self.buffer.is_view()
    }

    /// Whether releasing this handle may cache or free its memory.
    pub fn is_closeable(&self) -> bool {
        self.closeable
    }

    /// Set the closeable flag. Non-closeable handles are defused on release.
    pub fn set_closeable(&mut self, closeable: bool) {
        self.closeable = closeable;
    }

    /// Where an owning handle's memory lives; `None` for views.
    pub fn origin(&self) -> Option<AllocationOrigin> {
        match &self.buffer {
            Buffer::Owned(b) => Some(b.origin()),
            Buffer::View(_) => None,
        }
    }

    /// Reserved bytes of an owning handle; zero for views.
    pub fn capacity(&self) -> usize {
        match &self.buffer {
            Buffer::Owned(b) => b.capacity(),
            Buffer::View(_) => 0,
        }
    }

    /// Shared access to the bytes.
    pub fn as_bytes(&self) -> Result<BufferBytes<'_>, MemError> {
        self.buffer.bytes()
    }

    /// Exclusive access to the bytes.
    pub fn as_bytes_mut(&mut self) -> Result<HostBytesMut<'_>, MemError> {
        self.buffer.bytes_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_arena::MemoryManager;
    use tessera_core::MemoryKind;

    fn array(mm: &MemoryManager, dtype: DataType, dims: &[usize]) -> ArrayHandle {
        let shape = Shape::new(dims);
        let bytes = shape.byte_len(dtype).unwrap();
        let alloc = mm.allocate_standalone(bytes, MemoryKind::Host).unwrap();
        ArrayHandle::from_allocation(dtype, shape, alloc).unwrap()
    }

    #[test]
    fn handles_get_distinct_ids() {
        let mm = MemoryManager::new();
        let a = array(&mm, DataType::Float, &[2, 2]);
        let b = array(&mm, DataType::Float, &[2, 2]);
        assert_ne!(a.id(), b.id());
        assert!(a.owns_memory());
        assert_eq!(a.byte_len(), 16);
        assert_eq!(a.length(), 4);
    }

    #[test]
    fn element_views() {
        let mm = MemoryManager::new();
        let mut a = array(&mm, DataType::Float, &[4]);
        a.as_bytes_mut().unwrap()[4..8].copy_from_slice(&2.5f32.to_le_bytes());
        let v = a.view(1, [1]).unwrap();
        assert!(v.is_view());
        assert!(!v.owns_memory());
        assert_ne!(v.id(), a.id());
        assert_eq!(&*v.as_bytes().unwrap(), &2.5f32.to_le_bytes());
        assert_eq!(v.origin(), None);
    }

    #[test]
    fn view_out_of_range_fails() {
        let mm = MemoryManager::new();
        let a = array(&mm, DataType::Double, &[3]);
        assert!(a.view(2, [2]).is_err());
        assert!(a.view(usize::MAX, [1]).is_err());
    }

    #[test]
    fn undersized_allocation_is_rejected() {
        let mm = MemoryManager::new();
        let alloc = mm.allocate_standalone(16, MemoryKind::Host).unwrap();
        let err = ArrayHandle::from_allocation(DataType::Float, Shape::new(&[4, 4]), alloc)
            .unwrap_err();
        assert_eq!(
            err,
            MemError::BufferTooSmall {
                required: 64,
                available: 16
            }
        );
        assert_eq!(mm.host_stats().live_bytes, 0);
    }

    #[test]
    fn oversized_allocation_is_accepted() {
        let mm = MemoryManager::new();
        let alloc = mm.allocate_standalone(128, MemoryKind::Host).unwrap();
        let a = ArrayHandle::from_allocation(DataType::Float, Shape::new(&[4, 4]), alloc).unwrap();
        assert_eq!(a.capacity(), 128);
        assert_eq!(a.length(), 16);
    }

    #[test]
    fn owner_mutation_blocked_by_view() {
        let mm = MemoryManager::new();
        let mut a = array(&mm, DataType::Int32, &[8]);
        let v = a.view(0, [8]).unwrap();
        assert!(matches!(a.as_bytes_mut(), Err(MemError::Aliased { views: 1 })));
        drop(v);
        assert!(a.as_bytes_mut().is_ok());
    }
}
