//! Error types for the Tessera memory subsystem.
//!
//! A single enum covers allocation, workspace lifecycle, cache misuse and
//! configuration failures. None of these are recovered locally: they
//! surface to the execution engine, which decides whether to abort the
//! current operation or the whole run.

use std::error::Error;
use std::fmt;

use crate::dtype::DataType;
use crate::id::{ArrayId, WorkspaceId};
use crate::kind::MemoryKind;

/// Errors that can occur while obtaining, accessing or releasing tensor memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemError {
    /// The system (or device) allocator could not satisfy the request.
    AllocationFailed {
        /// Number of bytes requested.
        requested: usize,
        /// Which side of the host/device boundary failed.
        kind: MemoryKind,
    },
    /// The byte size of a `(dtype, shape)` request overflows `usize`.
    SizeOverflow {
        /// Shape text, e.g. `[4, 4]`.
        shape: String,
        /// Element type of the request.
        dtype: DataType,
    },
    /// The workspace region is exhausted and its spill policy forbids
    /// external allocations.
    WorkspaceFull {
        /// Aligned number of bytes requested.
        requested: usize,
        /// Remaining capacity of the primary region.
        remaining: usize,
    },
    /// The workspace has been destroyed and can no longer allocate.
    WorkspaceDestroyed {
        /// The destroyed workspace.
        workspace: WorkspaceId,
    },
    /// A device allocation was requested but no device is attached.
    DeviceUnavailable,
    /// The device backend reported a failure.
    DeviceFailure {
        /// Backend-provided description.
        reason: String,
    },
    /// An arena-backed allocation was accessed after its workspace cycle ended.
    StaleAllocation {
        /// Region generation recorded at allocation time.
        allocation_generation: u64,
        /// Current generation of the region.
        current_generation: u64,
    },
    /// Mutable access was requested while views still alias the buffer.
    Aliased {
        /// Number of outstanding views.
        views: usize,
    },
    /// Views are read-only.
    ReadOnlyView,
    /// A view would extend past the end of its source buffer.
    ViewOutOfBounds {
        /// Start of the requested view in bytes.
        offset: usize,
        /// Length of the requested view in bytes.
        len: usize,
        /// Length of the source buffer in bytes.
        available: usize,
    },
    /// A buffer is smaller than its array's `(dtype, shape)` requires.
    BufferTooSmall {
        /// Bytes the array needs.
        required: usize,
        /// Bytes the buffer holds.
        available: usize,
    },
    /// The same array was released twice without being reallocated.
    DoubleRelease {
        /// The array that was released again.
        id: ArrayId,
    },
    /// A configuration value is outside its valid range.
    InvalidConfig {
        /// Description of the invalid value.
        reason: String,
    },
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed { requested, kind } => {
                write!(f, "{kind} allocation of {requested} bytes failed")
            }
            Self::SizeOverflow { shape, dtype } => {
                write!(f, "byte size of {dtype} array with shape {shape} overflows")
            }
            Self::WorkspaceFull {
                requested,
                remaining,
            } => {
                write!(
                    f,
                    "workspace full: requested {requested} bytes, {remaining} bytes remaining"
                )
            }
            Self::WorkspaceDestroyed { workspace } => {
                write!(f, "workspace {workspace} has been destroyed")
            }
            Self::DeviceUnavailable => write!(f, "no device attached"),
            Self::DeviceFailure { reason } => write!(f, "device failure: {reason}"),
            Self::StaleAllocation {
                allocation_generation,
                current_generation,
            } => {
                write!(
                    f,
                    "stale allocation: generation {allocation_generation}, region is at {current_generation}"
                )
            }
            Self::Aliased { views } => {
                write!(f, "buffer is aliased by {views} live view(s)")
            }
            Self::ReadOnlyView => write!(f, "views are read-only"),
            Self::ViewOutOfBounds {
                offset,
                len,
                available,
            } => {
                write!(
                    f,
                    "view [{offset}, {}) exceeds buffer of {available} bytes",
                    offset.saturating_add(*len)
                )
            }
            Self::BufferTooSmall {
                required,
                available,
            } => {
                write!(
                    f,
                    "buffer of {available} bytes is too small for an array of {required} bytes"
                )
            }
            Self::DoubleRelease { id } => {
                write!(f, "array {id} was released multiple times")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl Error for MemError {}
