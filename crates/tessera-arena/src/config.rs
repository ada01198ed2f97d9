//! Workspace configuration.

use tessera_core::MemError;

use crate::raw::{align_up, ALIGNMENT};

/// What `reset` does with the primary region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResetPolicy {
    /// Scoped use: spills go to the external list and are released at
    /// every reset.
    #[default]
    BlockLeft,
    /// Cyclic use (training loops): spills are pinned and released one
    /// cycle late, tolerating asynchronous device readers.
    EndOfBuffer,
}

/// What happens when the primary region is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SpillPolicy {
    /// Allocate a standalone block owned by the workspace.
    #[default]
    External,
    /// Spill like `External`, then grow the region at the next reset so
    /// the next cycle fits.
    Reallocate,
    /// Refuse with [`MemError::WorkspaceFull`].
    Fail,
}

/// How the region size is learned from observed demand.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LearningPolicy {
    /// Keep the configured size.
    None,
    /// With an empty initial region, spill everything during the first
    /// cycle and size the region from it at the following reset.
    #[default]
    FirstLoop,
}

/// Configuration for a [`Workspace`](crate::Workspace).
///
/// Validated by [`Workspace::open`](crate::Workspace::open); immutable
/// afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkspaceConfig {
    /// Primary region size in bytes before overallocation. `0` with
    /// [`LearningPolicy::FirstLoop`] learns the size from the first cycle.
    pub initial_size: usize,
    /// Lower bound on the region size.
    pub min_size: usize,
    /// Upper bound on the region size; `0` means unbounded.
    pub max_size: usize,
    /// Extra fraction of the base size to reserve. Default: 0.3.
    pub overallocation_limit: f64,
    /// Region size learning.
    pub learning_policy: LearningPolicy,
    /// Scoped or cyclic behaviour.
    pub reset_policy: ResetPolicy,
    /// Behaviour on exhaustion.
    pub spill_policy: SpillPolicy,
    /// Allocate a device mirror of the region. Requires a device on the
    /// memory manager.
    pub mirrored: bool,
    /// Route every allocation through the spill path. Debugging aid.
    pub spill_everything: bool,
}

impl WorkspaceConfig {
    /// Default overallocation fraction.
    pub const DEFAULT_OVERALLOCATION_LIMIT: f64 = 0.3;

    /// Growth factor applied to the learned size of cyclic workspaces.
    pub const CYCLIC_LEARNING_FACTOR: f64 = 1.3;

    /// Scoped workspace with a fixed region of `size` bytes.
    pub fn fixed(size: usize) -> Self {
        Self {
            initial_size: size,
            overallocation_limit: 0.0,
            learning_policy: LearningPolicy::None,
            ..Self::default()
        }
    }

    /// Cyclic workspace with a fixed region of `size` bytes.
    pub fn cyclic(size: usize) -> Self {
        Self {
            reset_policy: ResetPolicy::EndOfBuffer,
            ..Self::fixed(size)
        }
    }

    /// Whether spills are pinned rather than released at every reset.
    pub fn is_cyclic(&self) -> bool {
        self.reset_policy == ResetPolicy::EndOfBuffer
    }

    /// Check every field for consistency.
    pub fn validate(&self) -> Result<(), MemError> {
        if !self.overallocation_limit.is_finite() || self.overallocation_limit < 0.0 {
            return Err(MemError::InvalidConfig {
                reason: format!(
                    "overallocation_limit must be finite and >= 0, got {}",
                    self.overallocation_limit
                ),
            });
        }
        if self.max_size != 0 && self.min_size > self.max_size {
            return Err(MemError::InvalidConfig {
                reason: format!(
                    "min_size {} exceeds max_size {}",
                    self.min_size, self.max_size
                ),
            });
        }
        Ok(())
    }

    /// Region size to allocate at open.
    pub fn initial_region_size(&self) -> usize {
        if self.initial_size == 0 && self.min_size == 0 {
            return 0;
        }
        self.finish_size(self.initial_size)
    }

    /// Region size learned from the largest cycle seen so far.
    pub fn learned_size(&self, max_cycle_bytes: usize) -> usize {
        let mut base = max_cycle_bytes;
        if self.is_cyclic() {
            base = scale(base, Self::CYCLIC_LEARNING_FACTOR);
            base = base.saturating_add(7) & !7;
        }
        self.finish_size(base)
    }

    /// Overallocate, raise to `min_size`, align, then cap at `max_size`
    /// rounded down to [`ALIGNMENT`] so the region never exceeds it.
    fn finish_size(&self, base: usize) -> usize {
        let size = base
            .saturating_add(scale(base, self.overallocation_limit))
            .max(self.min_size);
        let size = align_up(size).unwrap_or(usize::MAX - usize::MAX % ALIGNMENT);
        if self.max_size == 0 {
            return size;
        }
        size.min(self.max_size - self.max_size % ALIGNMENT)
    }
}

/// `bytes * factor`, saturating.
fn scale(bytes: usize, factor: f64) -> usize {
    let v = bytes as f64 * factor;
    if v >= usize::MAX as f64 {
        usize::MAX
    } else {
        v as usize
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            initial_size: 0,
            min_size: 0,
            max_size: 0,
            overallocation_limit: Self::DEFAULT_OVERALLOCATION_LIMIT,
            learning_policy: LearningPolicy::FirstLoop,
            reset_policy: ResetPolicy::BlockLeft,
            spill_policy: SpillPolicy::External,
            mirrored: false,
            spill_everything: false,
        }
    }
}
