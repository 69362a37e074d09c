use std::cell::Cell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::Ordering;

use crate::error::AllocError;
use crate::queue::internal::{MarkedPtr, Node};
use crate::queue::{KEY_MAX, KEY_MIN, Key, MAX_LEVEL};
use crate::reclaim::{EpochReclaimer, Reclaimer};

/// Logical deletes tolerated at the head before a restructuring attempt.
const DEFAULT_MAX_OFFSET: usize = 32;

/// Splice attempts at the deleted prefix's frontier before refreshing the
/// starting point with a head-seeking search.
const HEAD_SPLICE_RETRIES: usize = 10;

type NodePtr<V> = *mut Node<V>;

// =============================================================================
// QUEUE STRUCTURE & DELETION PROTOCOL
// =============================================================================
//
// A skip list ordered by key, with a head sentinel (KEY_MIN, full tower) and
// a tail sentinel (KEY_MAX). The mark bit travels on the PRECEDING pointer:
// marking x.next[0] claims x's successor. Claims proceed in chain order from
// the head, so the logically deleted nodes form a contiguous prefix of the
// bottom level:
//
//            deleted prefix          live region
//          ┌───────────────────┐   ┌──────────────────────┐
//   HEAD ──╳── n1 ──╳── n2 ──╳── n3 ──── n4 ──── n5 ──── TAIL
//                                 ▲
//                            frontier: claimed, but its own
//                            next[0] is still clean
//
// delete_min walks the prefix and claims the first clean pointer it finds
// with a single fetch_or; that is the whole common path. Nothing is
// physically unlinked until one thread has accumulated more than
// `max_offset` steps over the prefix; that thread then swings
// head.next[0] forward in one CAS, repairs the upper levels, and retires
// the prefix it now exclusively owns. The head cache line is written once
// per batch instead of once per delete.
//
// Inserts are ordinary skip-list inserts committed bottom-first, with one
// twist: when the chosen level-0 predecessor is itself claimed, the new
// node is spliced directly at the frontier (level 0 only) instead of
// retrying from scratch, so inserts of small keys survive the head churn.
//
// =============================================================================

// ============================================================================
// MinCursor - per-thread delete-min resume state
// ============================================================================

/// Where a thread's previous delete_min left off.
///
/// The cursor is only trusted while `head.next[0]` still holds the exact
/// word observed when the cursor was last reset; any restructure (or the
/// first claim through the head) changes that word and invalidates every
/// thread's cursor at once. The words are type-erased so one thread-local
/// serves all queue instantiations; `queue` pins the cursor to the head
/// node's address so distinct queues never cross-validate.
#[derive(Copy, Clone)]
struct MinCursor {
    queue: usize,
    node: usize,
    obs_head: usize,
    offset: usize,
}

impl MinCursor {
    const EMPTY: MinCursor = MinCursor {
        queue: 0,
        node: 0,
        obs_head: 0,
        offset: 0,
    };
}

thread_local! {
    static MIN_CURSOR: Cell<MinCursor> = const { Cell::new(MinCursor::EMPTY) };
}

// ============================================================================
// SkipQueue - Lock-free skip-list priority queue
// ============================================================================

/// A lock-free concurrent priority queue.
///
/// Many threads may call [`insert`](SkipQueue::insert),
/// [`delete_min`](SkipQueue::delete_min), and [`remove`](SkipQueue::remove)
/// concurrently; no operation blocks, and system-wide progress is
/// guaranteed. Duplicate keys may coexist; each is returned exactly once.
///
/// `delete_min` is linearizable to the claim of a key that was minimal at
/// the instant of the claim. Between that instant and the caller observing
/// the return value, smaller keys may come and go; that is the usual
/// concurrent-queue guarantee, not a defect.
pub struct SkipQueue<V, R: Reclaimer = EpochReclaimer> {
    head: NodePtr<V>,
    tail: NodePtr<V>,
    max_offset: usize,
    max_level: usize,
    _reclaimer: PhantomData<R>,
}

unsafe impl<V: Send, R: Reclaimer> Send for SkipQueue<V, R> {}
unsafe impl<V: Send, R: Reclaimer> Sync for SkipQueue<V, R> {}

impl<V: Copy, R: Reclaimer> SkipQueue<V, R> {
    /// Create a queue with the default tuning.
    pub fn new() -> Result<Self, AllocError> {
        Self::with_config(DEFAULT_MAX_OFFSET, MAX_LEVEL)
    }

    /// Create a queue.
    ///
    /// `max_offset` is the number of logically deleted head-region nodes
    /// tolerated before a delete_min attempts to physically unlink the
    /// whole batch; raising it trades memory for lower contention on the
    /// head. `max_level` caps tower height (`1..=MAX_LEVEL`).
    pub fn with_config(max_offset: usize, max_level: usize) -> Result<Self, AllocError> {
        assert!(max_offset >= 1, "max_offset must be at least 1");
        assert!(
            (1..=MAX_LEVEL).contains(&max_level),
            "max_level must be in 1..={MAX_LEVEL}"
        );

        let tail = Node::alloc_sentinel(KEY_MAX, max_level)?;
        let head = match Node::alloc_sentinel(KEY_MIN, max_level) {
            Ok(head) => head,
            Err(e) => {
                unsafe { Node::dealloc(tail) };
                return Err(e);
            }
        };

        // Head forwards to tail at every level; the tail's own tower stays
        // null, which reads as an unmarked end marker everywhere.
        unsafe {
            for i in 0..max_level {
                (*head).tower(i).store(MarkedPtr::new(tail), Ordering::Relaxed);
            }
        }

        Ok(SkipQueue {
            head,
            tail,
            max_offset,
            max_level,
            _reclaimer: PhantomData,
        })
    }

    /// Tower height for a new node: geometric with p = 1/2, clamped to the
    /// configured cap. A single random draw and a trailing-ones count
    /// replace the coin-flip loop.
    #[inline]
    fn random_level(&self) -> usize {
        let bits = fastrand::u64(..);
        let extra = (!bits).trailing_zeros() as usize;
        (1 + extra).min(self.max_level)
    }

    // =========================================================================
    // Weak searches
    // =========================================================================
    //
    // None of these excise marked nodes; they strip marks and traverse
    // through, so searches stay read-only and cheap. Physical repair is
    // restructuring's job alone.

    /// Fill `preds`/`succs` so that at every level `preds[i].key < key`
    /// (`<= key` when `before` is false walks past equal keys) and
    /// `succs[i]` is the node `preds[i]` forwarded to when observed.
    fn weak_search_predecessors(
        &self,
        key: Key,
        before: bool,
        preds: &mut [NodePtr<V>; MAX_LEVEL],
        succs: &mut [NodePtr<V>; MAX_LEVEL],
    ) {
        unsafe {
            let mut x = self.head;
            for i in (0..self.max_level).rev() {
                loop {
                    let x_next = (*x).tower(i).load(Ordering::Acquire).as_ptr();
                    let x_next_key = (*x_next).key();
                    if x_next_key > key || (before && x_next_key == key) {
                        preds[i] = x;
                        succs[i] = x_next;
                        break;
                    }
                    x = x_next;
                }
            }
        }
    }

    /// First node on the bottom level that is not logically deleted (its
    /// own forward pointer is clean), or the tail if the queue has drained.
    /// Used to refresh the insert fallback's starting point.
    fn weak_search_head(&self) -> NodePtr<V> {
        unsafe {
            let mut x = self.head;
            let mut x_next = self.tail;
            for i in (0..self.max_level).rev() {
                loop {
                    x_next = (*x).tower(i).load(Ordering::Acquire).as_ptr();
                    if x_next == self.tail {
                        break;
                    }
                    if !(*x_next).tower(0).load(Ordering::Acquire).is_marked() {
                        break;
                    }
                    x = x_next;
                }
            }
            x_next
        }
    }

    /// For each upper level, the last node still inside the deleted prefix
    /// (the node whose successor at that level is live). Returns the
    /// highest level that actually has prefix nodes to bypass; levels
    /// above it need no repair. `from_level` restarts a partial search
    /// during restructuring's retry loop.
    fn weak_search_end(
        &self,
        preds: &mut [NodePtr<V>; MAX_LEVEL],
        from_level: Option<usize>,
    ) -> usize {
        unsafe {
            let start = from_level.unwrap_or(self.max_level - 1);
            let mut top = from_level.unwrap_or(0);
            let mut x = self.head;
            for i in (1..=start).rev() {
                loop {
                    let x_next = (*x).tower(i).load(Ordering::Acquire).as_ptr();
                    if x_next == self.tail {
                        break;
                    }
                    if !(*x_next).tower(0).load(Ordering::Acquire).is_marked() {
                        break;
                    }
                    if top == 0 {
                        top = i;
                    }
                    x = x_next;
                }
                preds[i] = x;
            }
            top
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Add `key` with `value`. Duplicates of a concurrent or existing key
    /// coexist and are each returned by exactly one `delete_min`.
    ///
    /// The operation commits at the bottom level: once the level-0 CAS
    /// lands, the node is in the queue and upper-level threading is pure
    /// optimization that gives up on interference.
    pub fn insert(&self, key: Key, value: V) -> Result<(), AllocError> {
        debug_assert!(
            key != KEY_MIN && key != KEY_MAX,
            "sentinel keys are reserved"
        );

        let _cs = R::enter();

        let mut preds = [ptr::null_mut(); MAX_LEVEL];
        let mut succs = [ptr::null_mut(); MAX_LEVEL];

        let level = self.random_level();
        let new = Node::alloc(key, value, level)?;

        unsafe {
            'retry: loop {
                self.weak_search_predecessors(key, false, &mut preds, &mut succs);

                // Aim the tower at the successors before publication; when
                // the successors have not moved since a previous attempt
                // these stores are no-ops.
                for (i, &succ) in succs.iter().enumerate().take(level) {
                    (*new).tower(i).store(MarkedPtr::new(succ), Ordering::Relaxed);
                }

                // Commit at level 0. The release CAS is the write barrier
                // that publishes the fully initialized node.
                let succ = succs[0];
                if let Err(actual) = (*preds[0]).tower(0).compare_exchange(
                    MarkedPtr::new(succ),
                    MarkedPtr::new(new),
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    if actual.is_marked() {
                        // The predecessor was logically deleted under us.
                        // The node can still go in at the deleted prefix's
                        // frontier; a successful splice links it at level 0
                        // only and the upper tower slots stay unused.
                        if self.splice_at_head(new, preds[0]) {
                            return Ok(());
                        }
                        // The queue drained while we walked the prefix;
                        // restart with a fresh predecessor search, back at
                        // the node's full allocated height.
                        continue 'retry;
                    }
                    // A competing insert won the slot.
                    continue 'retry;
                }

                self.thread_tower_upward(new, level, &mut preds, &mut succs);
                return Ok(());
            }
        }
    }

    /// Splice `new` into the bottom level when its chosen predecessor is
    /// already claimed: walk forward over the marked prefix and claim the
    /// first clean forward pointer. Returns false if the walk refreshed
    /// into a fully drained queue (nothing to splice behind).
    unsafe fn splice_at_head(&self, new: NodePtr<V>, pred: NodePtr<V>) -> bool {
        unsafe {
            let mut retries = 0;
            let mut x = (*pred).tower(0).load(Ordering::Acquire).as_ptr();
            loop {
                retries += 1;
                if retries > HEAD_SPLICE_RETRIES {
                    x = self.weak_search_head();
                    if x == self.tail {
                        return false;
                    }
                    retries = 0;
                }

                let x_next = (*x).tower(0).load(Ordering::Acquire);
                if x_next.is_marked() {
                    // Still inside the prefix; the mark rides on this
                    // pointer, its target is the next candidate.
                    x = x_next.as_ptr();
                    continue;
                }

                (*new).tower(0).store(x_next, Ordering::Relaxed);
                if (*x)
                    .tower(0)
                    .compare_exchange(
                        x_next,
                        MarkedPtr::new(new),
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return true;
                }
            }
        }
    }

    /// Link `new` at levels `1..level`. Gives up (harmlessly) as soon as
    /// the node is observed claimed or the level's neighborhood shifts
    /// away; the node stays reachable through level 0 regardless.
    unsafe fn thread_tower_upward(
        &self,
        new: NodePtr<V>,
        level: usize,
        preds: &mut [NodePtr<V>; MAX_LEVEL],
        succs: &mut [NodePtr<V>; MAX_LEVEL],
    ) {
        unsafe {
            let key = (*new).key();
            let mut i = 1;
            while i < level {
                // Claimed nodes need no more shortcuts.
                if (*new).tower(0).load(Ordering::Acquire).is_marked() {
                    return;
                }

                let succ = succs[i];

                // Keep the node's own forward pointer current before
                // exposing it at this level.
                let cur = (*new).tower(i).load(Ordering::Acquire);
                if cur.as_ptr() != succ {
                    if cur.is_marked() {
                        return;
                    }
                    let _ = (*new).tower(i).compare_exchange(
                        cur,
                        MarkedPtr::new(succ),
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                }

                match (*preds[i]).tower(i).compare_exchange(
                    MarkedPtr::new(succ),
                    MarkedPtr::new(new),
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => i += 1,
                    Err(_) => {
                        if (*new).tower(0).load(Ordering::Acquire).is_marked() {
                            return;
                        }
                        self.weak_search_predecessors(key, false, preds, succs);
                        if succs[0] != new {
                            // The bottom-level neighborhood moved past the
                            // node; stop threading.
                            return;
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // Delete-min
    // =========================================================================

    /// Claim and return a minimal entry, or `None` if the queue is empty.
    ///
    /// The common path is one walk over the thread's cached slice of the
    /// deleted prefix plus a single fetch_or; the claim of that fetch_or
    /// is the linearization point. Once one thread's accumulated walk
    /// length passes `max_offset` it also performs the batched physical
    /// unlink for everyone.
    pub fn delete_min(&self) -> Option<(Key, V)> {
        let cs = R::enter();

        unsafe {
            let head_now = (*self.head).tower(0).load(Ordering::Acquire);

            let mut cur = MIN_CURSOR.with(Cell::get);
            if cur.queue != self.head as usize || cur.obs_head != head_now.as_usize() {
                // Stale or foreign cursor: restart from the head and
                // re-observe.
                cur = MinCursor {
                    queue: self.head as usize,
                    node: self.head as usize,
                    obs_head: head_now.as_usize(),
                    offset: 0,
                };
            }

            let mut x = cur.node as NodePtr<V>;
            let mut steps = 0usize;

            let claimed = loop {
                steps += 1;
                let x_next = (*x).tower(0).load(Ordering::Acquire);
                if x_next.as_ptr() == self.tail {
                    return None;
                }
                if !x_next.is_marked() {
                    // A clean pointer: claim its target. The previous value
                    // tells us whether we won.
                    let old = (*x).tower(0).fetch_or_mark(Ordering::AcqRel);
                    if !old.is_marked() {
                        break old.as_ptr();
                    }
                    x = old.as_ptr();
                    continue;
                }
                x = x_next.as_ptr();
            };

            cur.node = claimed as usize;
            cur.offset += steps;
            MIN_CURSOR.with(|c| c.set(cur));

            // Copy out before leaving the critical section; a concurrent
            // restructure may retire the node the moment we unpin.
            let key = (*claimed).key();
            let value = (*claimed).value();

            if cur.offset > self.max_offset {
                self.restructure(&cs, cur.obs_head, claimed);
            }

            Some((key, value))
        }
    }

    // =========================================================================
    // Restructuring (batched physical unlink)
    // =========================================================================

    /// Swing the head past the marked prefix and retire it.
    ///
    /// Winning the bottom-level CAS transfers exclusive ownership of every
    /// node between the observed head and `claimed` to this thread;
    /// `claimed` itself stays behind as the deleted auxiliary node the new
    /// head word points at (marked), to be retired by the next round.
    unsafe fn restructure(&self, cs: &R::CriticalSection, obs_head: usize, claimed: NodePtr<V>) {
        unsafe {
            if (*self.head)
                .tower(0)
                .compare_exchange(
                    MarkedPtr::from_usize(obs_head),
                    MarkedPtr::new(claimed).with_mark(),
                    Ordering::Release,
                    Ordering::Relaxed,
                )
                .is_err()
            {
                // Another thread already swung the head for this batch.
                return;
            }

            // Bypass the prefix at each upper level, top down. A failed
            // CAS means new nodes reached that level; re-find the last
            // prefix node and retry.
            let mut preds = [ptr::null_mut(); MAX_LEVEL];
            let top = self.weak_search_end(&mut preds, None);
            for i in (1..=top).rev() {
                loop {
                    let expected = (*self.head).tower(i).load(Ordering::Acquire);
                    let target = (*preds[i]).tower(i).load(Ordering::Acquire);
                    if expected == target {
                        break;
                    }
                    if (*self.head)
                        .tower(i)
                        .compare_exchange(expected, target, Ordering::Release, Ordering::Relaxed)
                        .is_ok()
                    {
                        break;
                    }
                    self.weak_search_end(&mut preds, Some(i));
                }
            }

            // Retire the owned prefix, excluding the auxiliary node.
            let mut x = MarkedPtr::<Node<V>>::from_usize(obs_head).as_ptr();
            while x != claimed {
                let next = (*x).tower(0).load(Ordering::Acquire).as_ptr();
                R::defer_retire(cs, x, Node::dealloc);
                x = next;
            }
        }
    }

    // =========================================================================
    // Keyed remove
    // =========================================================================

    /// Logically delete one entry with `key`, returning its value, or
    /// `None` when no such entry exists or another thread claimed it
    /// first. The node's memory is reclaimed later, when the deleted
    /// prefix grows past it.
    pub fn remove(&self, key: Key) -> Option<V> {
        debug_assert!(
            key != KEY_MIN && key != KEY_MAX,
            "sentinel keys are reserved"
        );

        let _cs = R::enter();

        let mut preds = [ptr::null_mut(); MAX_LEVEL];
        let mut succs = [ptr::null_mut(); MAX_LEVEL];

        unsafe {
            self.weak_search_predecessors(key, true, &mut preds, &mut succs);

            let succ = succs[0];
            if succ == self.tail || (*succ).key() != key {
                return None;
            }

            // Claim the predecessor's successor. Marking the predecessor's
            // forward pointer is the same primitive delete_min uses, just
            // applied mid-list.
            let old = (*preds[0]).tower(0).fetch_or_mark(Ordering::AcqRel);
            if old.is_marked() {
                return None;
            }
            Some((*old.as_ptr()).value())
        }
    }

    // =========================================================================
    // Test support
    // =========================================================================

    /// Snapshot the keys of live (unclaimed) bottom-level nodes, in chain
    /// order. A node is live exactly when the pointer leading into it is
    /// clean. Only meaningful while no other thread is mutating.
    pub(crate) fn collect_live(&self) -> Vec<Key> {
        let _cs = R::enter();
        let mut keys = Vec::new();
        unsafe {
            let mut x = self.head;
            loop {
                let next = (*x).tower(0).load(Ordering::Acquire);
                let n = next.as_ptr();
                if n == self.tail {
                    break;
                }
                if !next.is_marked() {
                    keys.push((*n).key());
                }
                x = n;
            }
        }
        keys
    }
}

impl<V, R: Reclaimer> Drop for SkipQueue<V, R> {
    fn drop(&mut self) {
        // Exclusive access: free everything still chained at the bottom
        // level, claimed prefix included. Nodes already retired during
        // restructuring were unlinked from the chain and are owed to the
        // reclaimer, not to us.
        unsafe {
            let mut x = self.head;
            while x != self.tail {
                let next = (*x).tower(0).load(Ordering::Relaxed).as_ptr();
                Node::dealloc(x);
                x = next;
            }
            Node::dealloc(self.tail);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
