//! Epoch-based reclamation binding using crossbeam-epoch.
//!
//! `EpochReclaimer` is a zero-sized strategy type: all state lives in the
//! global epoch collector. Entering a critical section pins the calling
//! thread to the current epoch; retired nodes are freed once every thread
//! has advanced past the epoch in which they were retired.
//!
//! Thread registration is the collector's: a thread is registered with the
//! global collector on its first pin and deregistered when it exits, so a
//! queue operation can never run on an unregistered thread.

use crossbeam_epoch::{self as epoch, Guard};

use crate::reclaim::Reclaimer;

/// Epoch-based memory reclamation (crossbeam-epoch).
///
/// # Performance
///
/// - **Enter**: thread-local check, very low overhead
/// - **Retire**: batched, amortized O(1) per node
/// - **Memory**: reclamation may lag while any thread stays pinned
///
#[derive(Clone, Copy, Default)]
pub struct EpochReclaimer;

impl Reclaimer for EpochReclaimer {
    type CriticalSection = Guard;

    #[inline]
    fn enter() -> Guard {
        epoch::pin()
    }

    unsafe fn defer_retire<N>(cs: &Guard, node: *mut N, retire: unsafe fn(*mut N)) {
        unsafe {
            cs.defer_unchecked(move || {
                retire(node);
            });
        }
    }
}
