//! Benchmark fixtures for the Tessera tensor memory subsystem.
//!
//! Provides pre-built configurations shared by the criterion benches:
//!
//! - [`scoped_workspace`]: fixed-size scoped workspace on host memory
//! - [`cyclic_workspace`]: cyclic workspace with the pinned spill queue
//! - [`reuse_cache`]: array cache with a generous budget and no small-array cutoff
//! - [`training_shapes`]: a deterministic mix of activation-like shapes

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use tessera_arena::{MemoryManager, Workspace, WorkspaceConfig};
use tessera_cache::{ArrayCache, CacheConfig};
use tessera_core::{MemError, Shape};

/// Budget handed to [`reuse_cache`], independent of the machine's memory.
pub const BENCH_TOTAL_MEMORY: usize = 1 << 30;

/// Open a scoped workspace whose region holds exactly `size` bytes.
pub fn scoped_workspace(manager: &MemoryManager, size: usize) -> Result<Workspace, MemError> {
    Workspace::open(WorkspaceConfig::fixed(size), manager)
}

/// Open a cyclic workspace whose region holds exactly `size` bytes.
pub fn cyclic_workspace(manager: &MemoryManager, size: usize) -> Result<Workspace, MemError> {
    Workspace::open(WorkspaceConfig::cyclic(size), manager)
}

/// Build an array cache that caches every standalone buffer.
///
/// The budget is a quarter of [`BENCH_TOTAL_MEMORY`], so eviction only
/// shows up in benches that deliberately exceed it.
pub fn reuse_cache(manager: &MemoryManager) -> Result<ArrayCache, MemError> {
    let config = CacheConfig {
        small_array_threshold: 0,
        total_memory_bytes: Some(BENCH_TOTAL_MEMORY),
        ..CacheConfig::default()
    };
    ArrayCache::new(config, manager)
}

/// `count` shapes cycling through a small set of layer outputs.
///
/// Repeats keys so a cache sees hits once it is warm.
pub fn training_shapes(count: usize) -> Vec<Shape> {
    const LAYERS: [&[usize]; 5] = [
        &[32, 784],
        &[32, 256],
        &[32, 128],
        &[32, 10],
        &[256, 128],
    ];
    (0..count)
        .map(|i| Shape::new(LAYERS[i % LAYERS.len()]))
        .collect()
}
