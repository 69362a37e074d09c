//! The concurrent priority queue.
//!
//! # Organization
//!
//! - [`skip_queue`] - `SkipQueue`, the lock-free skip-list priority queue
//! - [`internal`] - Internal implementation details (pub(crate))
//!
//! # Usage
//!
//! The queue is generic over its reclamation strategy `R: Reclaimer`:
//!
//! ```ignore
//! use minnow::SkipQueue;
//!
//! let queue: SkipQueue<u64> = SkipQueue::new()?;
//! queue.insert(5, 50)?;
//! assert_eq!(queue.delete_min(), Some((5, 50)));
//! ```

pub(crate) mod internal;
pub mod skip_queue;

pub use skip_queue::SkipQueue;

/// The ordered key type. Any total order works for the algorithm; the
/// queue fixes 64-bit unsigned so comparisons monomorphize to single
/// instructions on the hot path.
pub type Key = u64;

/// Reserved key of the head sentinel. Never inserted.
pub const KEY_MIN: Key = 0;

/// Reserved key of the tail sentinel. Never inserted.
pub const KEY_MAX: Key = Key::MAX;

/// Hard cap on tower height. A queue's configured `max_level` may be
/// anything in `1..=MAX_LEVEL`.
pub const MAX_LEVEL: usize = 32;
