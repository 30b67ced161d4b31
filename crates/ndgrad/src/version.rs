//! Mutation version counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Per-storage counter of in-place mutations.
///
/// Cloning shares the counter: a tensor and all views over the same
/// storage hold clones of one `VersionCounter`, so a write through any of
/// them is visible to all. Reads and bumps are lock-free.
#[derive(Debug, Clone, Default)]
pub struct VersionCounter {
    version: Arc<AtomicU32>,
}

impl VersionCounter {
    /// Create a fresh counter at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh counter starting at `version`.
    pub fn with_version(version: u32) -> Self {
        Self {
            version: Arc::new(AtomicU32::new(version)),
        }
    }

    /// Current version.
    #[inline]
    pub fn current_version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Record one in-place mutation and return the new version.
    #[inline]
    pub fn bump(&self) -> u32 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Whether both handles refer to the same counter.
    pub fn shares_with(&self, other: &VersionCounter) -> bool {
        Arc::ptr_eq(&self.version, &other.version)
    }
}
