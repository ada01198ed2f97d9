//! Release records and the process-wide deallocation tracker.
//!
//! Every workspace and every standalone buffer owns a [`Deallocator`].
//! Its pointers are released exactly once: either by an explicit
//! [`Deallocator::deallocate`] call or when the record is dropped. The
//! [`DeallocTracker`] keeps a registry of live records and broadcasts
//! [`LifecycleEvent`]s to subscribers, which is how tests and diagnostics
//! observe that no record ever runs twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};
use indexmap::IndexMap;
use tessera_core::RecordId;

use crate::pair::PointerPair;

/// What a release record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// A [`Workspace`](crate::Workspace).
    Workspace,
    /// A standalone buffer outside any workspace.
    Buffer,
}

/// Registration and release notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A record was registered.
    Registered {
        /// The new record.
        record: RecordId,
        /// Owner kind.
        kind: RecordKind,
        /// Bytes the record covered at registration.
        bytes: usize,
    },
    /// A record ran its release logic.
    Released {
        /// The released record.
        record: RecordId,
        /// Owner kind.
        kind: RecordKind,
        /// Bytes the record covered at release.
        bytes: usize,
        /// `false` for constant records, whose memory is retained.
        freed: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RecordInfo {
    kind: RecordKind,
    bytes: usize,
}

#[derive(Debug, Default)]
struct TrackerInner {
    live: Mutex<IndexMap<RecordId, RecordInfo>>,
    subscribers: Mutex<Vec<Sender<LifecycleEvent>>>,
    constant_pool: Mutex<Vec<PointerPair>>,
    registered: AtomicU64,
    released: AtomicU64,
}

impl TrackerInner {
    fn emit(&self, event: LifecycleEvent) {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Registry of live release records.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Debug, Default)]
pub struct DeallocTracker {
    inner: Arc<TrackerInner>,
}

impl DeallocTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new record that frees its pointers on release.
    pub fn register(&self, kind: RecordKind, bytes: usize) -> Deallocator {
        self.register_inner(kind, bytes, false)
    }

    /// Register a record whose pointers move into the tracker's constant
    /// pool instead of being freed.
    pub fn register_constant(&self, bytes: usize) -> Deallocator {
        self.register_inner(RecordKind::Buffer, bytes, true)
    }

    fn register_inner(&self, kind: RecordKind, bytes: usize, constant: bool) -> Deallocator {
        let record = RecordId::next();
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record, RecordInfo { kind, bytes });
        self.inner.registered.fetch_add(1, Ordering::Relaxed);
        self.inner.emit(LifecycleEvent::Registered {
            record,
            kind,
            bytes,
        });
        Deallocator {
            record,
            kind,
            bytes,
            constant,
            held: Vec::new(),
            done: false,
            tracker: self.inner.clone(),
        }
    }

    /// Receive every subsequent lifecycle event.
    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Number of records registered but not yet released.
    pub fn live_records(&self) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Live records owned by `kind`.
    pub fn live_records_of(&self, kind: RecordKind) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|info| info.kind == kind)
            .count()
    }

    /// Bytes covered by live records, as reported at registration.
    pub fn live_bytes(&self) -> usize {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|info| info.bytes)
            .sum()
    }

    /// Whether `record` is still registered.
    pub fn is_live(&self, record: RecordId) -> bool {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&record)
    }

    /// Total records ever registered.
    pub fn registered_total(&self) -> u64 {
        self.inner.registered.load(Ordering::Relaxed)
    }

    /// Total records ever released.
    pub fn released_total(&self) -> u64 {
        self.inner.released.load(Ordering::Relaxed)
    }

    /// Bytes retained in the constant pool.
    pub fn constant_bytes(&self) -> usize {
        self.inner
            .constant_pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(PointerPair::len)
            .sum()
    }
}

/// A release record for one owner.
///
/// Holds the pointer pairs the owner hands it and releases them, in the
/// order they were handed over, exactly once.
#[derive(Debug)]
pub struct Deallocator {
    record: RecordId,
    kind: RecordKind,
    bytes: usize,
    constant: bool,
    held: Vec<PointerPair>,
    done: bool,
    tracker: Arc<TrackerInner>,
}

impl Deallocator {
    /// The tracker-assigned record ID.
    pub fn record(&self) -> RecordId {
        self.record
    }

    /// Owner kind.
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Whether this record's memory is owned by the constant pool.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Whether [`Deallocator::deallocate`] has run.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Update the byte count reported on release.
    pub fn set_bytes(&mut self, bytes: usize) {
        self.bytes = bytes;
    }

    /// Hand a pointer pair to this record for release.
    ///
    /// A pair handed over after the record has run is released immediately.
    pub fn hold(&mut self, pair: PointerPair) {
        if self.done {
            pair.release();
        } else {
            self.held.push(pair);
        }
    }

    /// Release every held pair. Returns `false` if the record already ran.
    pub fn deallocate(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.done = true;
        let freed = !self.constant;
        if self.constant {
            self.tracker
                .constant_pool
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .append(&mut self.held);
        } else {
            for pair in self.held.drain(..) {
                pair.release();
            }
        }
        self.tracker
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(&self.record);
        self.tracker.released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(record = %self.record, bytes = self.bytes, freed, "record released");
        self.tracker.emit(LifecycleEvent::Released {
            record: self.record,
            kind: self.kind,
            bytes: self.bytes,
            freed,
        });
        true
    }
}

impl Drop for Deallocator {
    fn drop(&mut self) {
        self.deallocate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::HostBlock;
    use crate::stats::AllocCounters;

    fn pair(counters: &Arc<AllocCounters>, len: usize) -> PointerPair {
        PointerPair::host_only(HostBlock::allocate(len, counters.clone()).unwrap())
    }

    #[test]
    fn deallocate_runs_once() {
        let tracker = DeallocTracker::new();
        let counters = Arc::new(AllocCounters::new());
        let mut d = tracker.register(RecordKind::Buffer, 64);
        d.hold(pair(&counters, 64));
        assert_eq!(tracker.live_records(), 1);
        assert_eq!(tracker.live_records_of(RecordKind::Buffer), 1);
        assert_eq!(tracker.live_records_of(RecordKind::Workspace), 0);
        assert_eq!(tracker.live_bytes(), 64);
        assert!(d.deallocate());
        assert!(!d.deallocate());
        drop(d);
        assert_eq!(tracker.live_records(), 0);
        assert_eq!(tracker.released_total(), 1);
        assert_eq!(counters.snapshot().frees, 1);
    }

    #[test]
    fn drop_releases() {
        let tracker = DeallocTracker::new();
        let counters = Arc::new(AllocCounters::new());
        {
            let mut d = tracker.register(RecordKind::Workspace, 0);
            d.hold(pair(&counters, 32));
            d.hold(pair(&counters, 32));
        }
        assert_eq!(counters.snapshot().frees, 2);
        assert_eq!(tracker.released_total(), 1);
    }

    #[test]
    fn constant_records_retain_memory() {
        let tracker = DeallocTracker::new();
        let counters = Arc::new(AllocCounters::new());
        let mut d = tracker.register_constant(48);
        assert!(d.is_constant());
        d.hold(pair(&counters, 48));
        assert!(d.deallocate());
        assert_eq!(counters.snapshot().frees, 0);
        assert_eq!(tracker.constant_bytes(), 48);
        drop(d);
        drop(tracker);
        assert_eq!(counters.snapshot().frees, 1);
    }

    #[test]
    fn subscribers_see_each_release_once() {
        let tracker = DeallocTracker::new();
        let rx = tracker.subscribe();
        let mut d = tracker.register(RecordKind::Buffer, 16);
        let record = d.record();
        d.deallocate();
        drop(d);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LifecycleEvent::Registered { .. }));
        assert_eq!(
            events[1],
            LifecycleEvent::Released {
                record,
                kind: RecordKind::Buffer,
                bytes: 16,
                freed: true,
            }
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let tracker = DeallocTracker::new();
        drop(tracker.subscribe());
        let _d = tracker.register(RecordKind::Buffer, 0);
        assert!(tracker
            .inner
            .subscribers
            .lock()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn hold_after_release_frees_immediately() {
        let tracker = DeallocTracker::new();
        let counters = Arc::new(AllocCounters::new());
        let mut d = tracker.register(RecordKind::Workspace, 0);
        d.deallocate();
        d.hold(pair(&counters, 32));
        assert_eq!(counters.snapshot().frees, 1);
    }
}
