//! Integration test: allocate/release/reuse through the full stack.
//!
//! Drives the array cache the way an execution engine would and checks
//! the observable guarantees: reuse with identifier reassignment, view
//! safety, the cache budget and "every release record runs at most once".

use std::collections::HashSet;

use tessera::arena::{LifecycleEvent, MemoryManager, Workspace, WorkspaceConfig};
use tessera::cache::{ArrayCache, ArrayHandle, CacheConfig, ReleaseOutcome};
use tessera::types::{DataType, MemoryKind, Shape};

fn cache_config(total: usize) -> CacheConfig {
    // The [4, 4] FLOAT buffer in these scenarios is 64 bytes, below the
    // default small-array threshold, so the threshold is lowered.
    CacheConfig {
        small_array_threshold: 0,
        total_memory_bytes: Some(total),
        ..CacheConfig::default()
    }
}

// ── Reuse ────────────────────────────────────────────────────────────

#[test]
fn float_4x4_round_trip_reuses_memory() {
    let manager = MemoryManager::new();
    let mut cache = ArrayCache::new(cache_config(1 << 20), &manager).unwrap();

    let a = cache.allocate(DataType::Float, [4, 4], true).unwrap();
    assert_eq!(a.byte_len(), 64);
    let (first_id, capacity, ptr) = (
        a.id(),
        a.capacity(),
        match a.buffer() {
            tessera::cache::Buffer::Owned(b) => b.allocation().host_ptr(),
            tessera::cache::Buffer::View(_) => unreachable!(),
        },
    );
    assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Cached);

    let before = manager.host_stats();
    let b = cache.allocate(DataType::Float, [4, 4], true).unwrap();
    let after = manager.host_stats();

    assert_eq!(b.capacity(), capacity);
    assert_ne!(b.id(), first_id);
    assert_eq!(after.allocations, before.allocations);
    assert_eq!(after.live_bytes, before.live_bytes);
    match b.buffer() {
        tessera::cache::Buffer::Owned(buf) => assert_eq!(buf.allocation().host_ptr(), ptr),
        tessera::cache::Buffer::View(_) => panic!("cache returned a view"),
    }
}

#[test]
fn reused_buffers_keep_contents() {
    let manager = MemoryManager::new();
    let mut cache = ArrayCache::new(cache_config(1 << 20), &manager).unwrap();
    let mut a = cache.allocate(DataType::Float, [4, 4], true).unwrap();
    a.as_bytes_mut().unwrap().fill(0x5A);
    cache.release(a).unwrap();
    let b = cache.allocate(DataType::Float, [4, 4], true).unwrap();
    assert!(b.as_bytes().unwrap().iter().all(|&x| x == 0x5A));
}

// ── Views ────────────────────────────────────────────────────────────

#[test]
fn released_views_never_free_or_resurface() {
    let manager = MemoryManager::new();
    let mut cache = ArrayCache::new(cache_config(1 << 20), &manager).unwrap();

    let owner = cache.allocate(DataType::Float, [4, 4], true).unwrap();
    let view = owner.view(4, [4]).unwrap();
    let view_id = view.id();
    assert_eq!(cache.release(view).unwrap(), ReleaseOutcome::Defused);
    assert_eq!(manager.host_stats().frees, 0);
    assert!(owner.as_bytes().is_ok());

    // The cache holds nothing, so the next allocation is fresh storage.
    let fresh = cache.allocate(DataType::Float, [4], true).unwrap();
    assert!(fresh.owns_memory());
    assert_ne!(fresh.id(), view_id);
    assert_eq!(cache.metrics().hits, 0);
}

// ── Budget ───────────────────────────────────────────────────────────

#[test]
fn cache_never_exceeds_budget_after_release() {
    let manager = MemoryManager::new();
    let total = 4096;
    let mut cache = ArrayCache::new(cache_config(total), &manager).unwrap();
    assert_eq!(cache.max_cache_bytes(), 1024);

    let handles: Vec<ArrayHandle> = (1..=20)
        .map(|n| cache.allocate(DataType::Float, [n * 4], true).unwrap())
        .collect();
    for h in handles {
        cache.release(h).unwrap();
        assert!(cache.current_bytes() <= cache.max_cache_bytes());
    }
    assert!(cache.metrics().evictions > 0);
}

// ── Workspace-backed arrays ──────────────────────────────────────────

#[test]
fn workspace_arrays_go_stale_after_reset() {
    let manager = MemoryManager::new();
    let mut cache = ArrayCache::new(cache_config(1 << 20), &manager).unwrap();
    cache.attach_workspace(Workspace::open(WorkspaceConfig::fixed(4096), &manager).unwrap());

    let a = cache.allocate(DataType::Float, [4, 4], false).unwrap();
    assert!(a.as_bytes().is_ok());
    cache.workspace_mut().unwrap().reset(false).unwrap();
    assert!(a.as_bytes().is_err());
    assert_eq!(cache.release(a).unwrap(), ReleaseOutcome::Released);

    let b = cache.allocate(DataType::Float, [4, 4], false).unwrap();
    assert!(b.as_bytes().is_ok());
}

#[test]
fn shape_keys_are_textual() {
    assert_eq!(Shape::new(&[4, 4]).to_string(), "[4, 4]");
    let manager = MemoryManager::new();
    let a = manager.allocate_standalone(64, MemoryKind::Host).unwrap();
    assert_eq!(a.capacity(), 64);
}

// ── Exactly-once release ─────────────────────────────────────────────

#[cfg(not(miri))]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Debug)]
    enum Op {
        Allocate { len: usize, view: bool },
        Release(usize),
        Reset,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (1usize..48, any::<bool>()).prop_map(|(len, view)| Op::Allocate { len, view }),
            4 => any::<usize>().prop_map(Op::Release),
            1 => Just(Op::Reset),
        ]
    }

    proptest! {
        #[test]
        fn no_record_is_released_twice(
            total in 512usize..16384,
            ops in prop::collection::vec(op(), 0..120),
        ) {
            let manager = MemoryManager::new();
            let events = manager.tracker().subscribe();
            let mut cache = ArrayCache::new(cache_config(total), &manager).unwrap();
            cache.attach_workspace(
                Workspace::open(WorkspaceConfig::cyclic(256), &manager).unwrap(),
            );
            let mut live: Vec<ArrayHandle> = Vec::new();
            for op in ops {
                match op {
                    Op::Allocate { len, view } => {
                        let h = cache.allocate(DataType::Float, [len], len % 3 == 0).unwrap();
                        if view {
                            live.push(h.view(0, [len]).unwrap());
                        }
                        live.push(h);
                    }
                    Op::Release(i) if !live.is_empty() => {
                        let h = live.swap_remove(i % live.len());
                        cache.release(h).unwrap();
                    }
                    Op::Release(_) => {}
                    Op::Reset => {
                        cache.workspace_mut().unwrap().reset(false).unwrap();
                    }
                }
            }
            drop(live);
            drop(cache);

            let mut registered = HashSet::new();
            let mut released = HashSet::new();
            for event in events.try_iter() {
                match event {
                    LifecycleEvent::Registered { record, .. } => {
                        prop_assert!(registered.insert(record));
                    }
                    LifecycleEvent::Released { record, .. } => {
                        prop_assert!(registered.contains(&record));
                        prop_assert!(released.insert(record), "record {} released twice", record);
                    }
                }
            }
            prop_assert_eq!(registered.len(), released.len());
            prop_assert_eq!(manager.tracker().live_records(), 0);
            prop_assert_eq!(manager.host_stats().live_bytes, 0);
        }
    }
}
