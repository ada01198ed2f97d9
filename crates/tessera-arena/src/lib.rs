//! Workspace arenas and raw memory management for Tessera.
//!
//! Provides the memory layer beneath array buffers: raw host blocks,
//! the accelerator seam, pointer pairs, the general-purpose allocator
//! handle, release records and the per-context workspace arena. This is
//! the only crate in the workspace that contains `unsafe` code, confined
//! to `raw.rs` and `allocation.rs`.
//!
//! # Architecture
//!
//! ```text
//! MemoryManager (general-purpose allocator, cheap to clone)
//! ├── AllocCounters × 2 (host, device)
//! ├── Option<Arc<dyn Device>>
//! └── DeallocTracker (live records, lifecycle events, constant pool)
//!
//! Workspace (one per execution context)
//! ├── MemoryRegion (bump offsets over a PointerPair, generation-tagged)
//! ├── external: Vec<PointerPair>       (scoped spills, released every reset)
//! ├── pinned: VecDeque<(cycle, PointerPair)> (cyclic spills, released a cycle late)
//! └── Deallocator (runs once on destroy or drop)
//! ```
//!
//! # Safety model
//!
//! Host bytes are reachable only through [`HostBytes`]/[`HostBytesMut`]
//! guards. Region slices are tagged with the region generation; a reset
//! advances the generation before rewinding offsets, and postpones the
//! rewind while any guard is alive, so no two live slices overlap.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod allocation;
pub mod config;
pub mod dealloc;
pub mod device;
pub mod manager;
pub mod pair;
mod raw;
pub mod region;
pub mod stats;
pub mod workspace;

// Public re-exports for the primary API surface.
pub use allocation::{Allocation, AllocationOrigin, HostBytes, HostBytesMut};
pub use config::{LearningPolicy, ResetPolicy, SpillPolicy, WorkspaceConfig};
pub use dealloc::{DeallocTracker, Deallocator, LifecycleEvent, RecordKind};
pub use device::{Device, DeviceBlock, DevicePtr, HostMirrorDevice};
pub use manager::MemoryManager;
pub use pair::PointerPair;
pub use raw::{align_up, HostBlock, ALIGNMENT};
pub use region::MemoryRegion;
pub use stats::{AllocCounters, AllocStats};
pub use workspace::{Workspace, WorkspaceStats};
