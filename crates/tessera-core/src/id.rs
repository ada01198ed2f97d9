//! Strongly-typed identifiers.
//!
//! All identifiers are allocated from process-wide monotonic counters, so
//! two live objects never share an ID and a recycled object never inherits
//! a stale one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static ARRAY_COUNTER: AtomicU64 = AtomicU64::new(1);
static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(1);
static RECORD_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of an array handle.
///
/// Reassigned whenever a buffer is handed back out of the array cache, so
/// any external reference that still remembers the pre-cache ID can no
/// longer be confused with the buffer's new owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(u64);

impl ArrayId {
    /// Allocate a fresh, never-before-returned ID. Thread-safe.
    pub fn next() -> Self {
        Self(ARRAY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkspaceId(u64);

impl WorkspaceId {
    /// Allocate a fresh workspace ID. Thread-safe.
    pub fn next() -> Self {
        Self(WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Identity of a deallocation record registered with a tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    /// Allocate a fresh record ID. Thread-safe.
    pub fn next() -> Self {
        Self(RECORD_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
