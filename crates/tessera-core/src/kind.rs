//! Host/device memory kinds.

use std::fmt;

/// Which side of the host/device boundary an allocation is requested for.
///
/// `Device` allocations are mirrored: they carry both a host pointer and
/// a device pointer of the same length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Host (CPU) memory only.
    Host,
    /// Device (accelerator) memory with a host mirror.
    Device,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("HOST"),
            Self::Device => f.write_str("DEVICE"),
        }
    }
}
