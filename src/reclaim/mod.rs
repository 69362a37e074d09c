//! Memory-reclamation seam.
//!
//! The queue never frees a node directly: a node that has been physically
//! unlinked may still be referenced by concurrent traversals, so its memory
//! must be returned only after every thread that could hold a reference has
//! moved on. This module defines the contract the queue consumes; the
//! default binding is [`EpochReclaimer`].
//!
//! # Design
//!
//! ```text
//! SkipQueue<V, R: Reclaimer>
//!     │
//!     └── SkipQueue<V, EpochReclaimer>   (crossbeam-epoch, default)
//! ```
//!
//! Every public queue operation opens a critical section on entry and
//! closes it when the returned token drops. Nodes are only dereferenced
//! inside a critical section.

mod epoch;

pub use epoch::EpochReclaimer;

/// A deferred-reclamation strategy.
///
/// # Safety Contract
///
/// Implementations must ensure:
/// 1. A pointer passed to `defer_retire` is not freed while any critical
///    section that was entered before the call is still open.
/// 2. Thread registration is handled before or during the first `enter`
///    on a thread, and deregistration at thread exit.
///
pub trait Reclaimer: Send + Sync {
    /// An open critical section. Dropping it exits the section.
    type CriticalSection;

    /// Enter a critical section on the calling thread.
    ///
    /// Critical sections do not nest; the queue opens exactly one per
    /// operation.
    fn enter() -> Self::CriticalSection;

    /// Schedule a node for retirement once no open critical section can
    /// reach it.
    ///
    /// # Safety
    ///
    /// - `node` must be unlinked (unreachable from the structure's roots)
    /// - `retire` must be the matching deallocation routine for `node`
    /// - `cs` must be the calling thread's open critical section
    ///
    unsafe fn defer_retire<N>(cs: &Self::CriticalSection, node: *mut N, retire: unsafe fn(*mut N));
}
