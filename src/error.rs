use thiserror::Error;

/// Returned when the allocator cannot provide memory for a new queue node.
///
/// This is the only recoverable failure the queue surfaces. Contention,
/// lost CAS races, and restructuring conflicts are all resolved internally
/// by retry and never reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to allocate a level-{level} queue node")]
pub struct AllocError {
    pub(crate) level: usize,
}

impl AllocError {
    /// Tower height of the allocation that failed.
    pub fn level(&self) -> usize {
        self.level
    }
}
