//! Tessera: off-heap tensor memory for machine learning workloads.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! Tessera sub-crates. For most users, adding `tessera` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use tessera::prelude::*;
//!
//! let manager = MemoryManager::new();
//! let config = CacheConfig {
//!     small_array_threshold: 0,
//!     total_memory_bytes: Some(1 << 20),
//!     ..CacheConfig::default()
//! };
//! let mut cache = ArrayCache::new(config, &manager).unwrap();
//!
//! let a = cache.allocate(DataType::Float, [4, 4], true).unwrap();
//! let first_id = a.id();
//! cache.release(a).unwrap();
//!
//! let allocations = manager.host_stats().allocations;
//! let b = cache.allocate(DataType::Float, [4, 4], true).unwrap();
//! assert_ne!(b.id(), first_id);
//! assert_eq!(manager.host_stats().allocations, allocations);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tessera-core` | Data types, shapes, IDs, errors |
//! | [`arena`] | `tessera-arena` | Workspaces, regions, devices, deallocation tracking |
//! | [`cache`] | `tessera-cache` | Array handles, buffers, the reuse cache |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core vocabulary (`tessera-core`).
///
/// [`types::DataType`], [`types::Shape`], [`types::MemoryKind`], the
/// identifier types and [`types::MemError`].
pub use tessera_core as types;

/// Workspace arenas and raw memory (`tessera-arena`).
///
/// [`arena::Workspace`] for per-context bump allocation,
/// [`arena::MemoryManager`] for standalone allocations, and the
/// [`arena::Device`] seam for accelerators.
pub use tessera_arena as arena;

/// Array handles and the reuse cache (`tessera-cache`).
///
/// [`cache::ArrayCache`] is the allocate/release entry point used by the
/// execution engine.
pub use tessera_cache as cache;

/// Common imports for typical Tessera usage.
///
/// ```rust
/// use tessera::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use tessera_core::{ArrayId, DataType, MemError, MemoryKind, Shape};

    // Arena
    pub use tessera_arena::{
        Allocation, AllocationOrigin, Device, HostMirrorDevice, MemoryManager, ResetPolicy,
        SpillPolicy, Workspace, WorkspaceConfig,
    };

    // Cache
    pub use tessera_cache::{ArrayCache, ArrayHandle, Buffer, CacheConfig, ReleaseOutcome};
}
