//! Host/device pointer pairs.

use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use crate::device::{DeviceBlock, DevicePtr};
use crate::raw::HostBlock;

/// A host block with an optional mirrored device block of equal length.
///
/// Cloning a pair shares the underlying blocks; memory is released when the
/// last clone is dropped. Workspaces keep exactly one clone per spilled
/// allocation so that clearing their external list or pinned queue is what
/// frees the memory.
#[derive(Clone, Debug)]
pub struct PointerPair {
    host: Arc<HostBlock>,
    device: Option<Arc<DeviceBlock>>,
    len: usize,
}

impl PointerPair {
    /// A pair with only a host side.
    pub fn host_only(host: HostBlock) -> Self {
        let len = host.len();
        Self {
            host: Arc::new(host),
            device: None,
            len,
        }
    }

    /// A pair with both sides. The device block must be at least as long
    /// as the host block.
    pub fn mirrored(host: HostBlock, device: DeviceBlock) -> Self {
        debug_assert!(device.len() >= host.len());
        let len = host.len();
        Self {
            host: Arc::new(host),
            device: Some(Arc::new(device)),
            len,
        }
    }

    /// Byte length of each side.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pair is zero-length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base host pointer.
    pub fn host_ptr(&self) -> NonNull<u8> {
        self.host.as_ptr()
    }

    /// Base device pointer, if mirrored.
    pub fn device_ptr(&self) -> Option<DevicePtr> {
        self.device.as_ref().map(|d| d.ptr())
    }

    /// Whether a device side exists.
    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub(crate) fn host(&self) -> &HostBlock {
        &self.host
    }

    pub(crate) fn downgrade_host(&self) -> Weak<HostBlock> {
        Arc::downgrade(&self.host)
    }

    pub(crate) fn device(&self) -> Option<&DeviceBlock> {
        self.device.as_deref()
    }

    /// Release this handle on the pair, device side first.
    ///
    /// Memory is actually returned only if this was the last handle.
    pub fn release(self) {
        let Self { host, device, .. } = self;
        drop(device);
        drop(host);
    }
}
