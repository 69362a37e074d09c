//! A lock-free concurrent priority queue.
//!
//! Many threads share one queue and race on `insert` and `delete_min`
//! without a global lock. The structure is a skip list whose bottom-level
//! forward pointers carry a logical-deletion mark in their low bit;
//! `delete_min` claims an entry with a single `fetch_or`, and the expensive
//! physical unlinking of claimed nodes is deferred and batched: one thread
//! pays for the whole accumulated prefix once it exceeds the queue's
//! `max_offset`, so the common delete path stays a near-constant head walk.
//!
//! Memory safety under concurrent reclamation comes from an epoch-based
//! critical-section discipline (crossbeam-epoch by default); see
//! [`reclaim`].
//!
//! ```ignore
//! use minnow::SkipQueue;
//!
//! let queue: SkipQueue<u64> = SkipQueue::new()?;
//! queue.insert(3, 30)?;
//! queue.insert(1, 10)?;
//! assert_eq!(queue.delete_min(), Some((1, 10)));
//! assert_eq!(queue.delete_min(), Some((3, 30)));
//! assert_eq!(queue.delete_min(), None);
//! ```

pub mod common_tests;
pub mod error;
pub mod queue;
pub mod reclaim;

pub use error::AllocError;
pub use queue::{KEY_MAX, KEY_MIN, Key, MAX_LEVEL, SkipQueue};
pub use reclaim::{EpochReclaimer, Reclaimer};
