use std::alloc::{Layout, alloc, dealloc};
use std::mem::MaybeUninit;
use std::ptr;

use crate::error::AllocError;
use crate::queue::internal::AtomicMarkedPtr;
use crate::queue::Key;

/// Nodes are aligned to a cache line so the hot head-region nodes never
/// share a line, and so the low bit of every forward pointer is free for
/// the delete mark.
const CACHE_LINE: usize = 64;

// ============================================================================
// Node - Multi-level queue element with an inline forward-pointer tower
// ============================================================================

/// A skip-list node with tower structure.
///
/// Uses the flexible array member pattern for efficient memory layout:
/// - Single allocation per node (no separate heap allocation for pointers)
/// - Forward pointers are inline after the struct fields
/// - Layout: fields, then `tower[0..level]`
///
/// One size class exists per tower height; `layout(level)` is the class
/// table. The `key`, `value`, and `level` fields are immutable after
/// allocation. All mutation goes through the tower's atomic words.
///
#[repr(C)]
pub(crate) struct Node<V> {
    key: Key,
    value: MaybeUninit<V>,
    level: usize,
    // Flexible array: `level` forward pointers allocated inline.
    tower: [AtomicMarkedPtr<Node<V>>; 0],
}

impl<V> Node<V> {
    /// Size class for a node of the given tower height.
    fn layout(level: usize) -> Layout {
        Layout::new::<Self>()
            .extend(Layout::array::<AtomicMarkedPtr<Self>>(level).unwrap())
            .unwrap()
            .0
            .align_to(CACHE_LINE)
            .unwrap()
            .pad_to_align()
    }

    fn alloc_raw(key: Key, level: usize) -> Result<*mut Self, AllocError> {
        debug_assert!(level >= 1);
        unsafe {
            let layout = Self::layout(level);
            let ptr = alloc(layout) as *mut Self;
            if ptr.is_null() {
                return Err(AllocError { level });
            }

            ptr::write(&mut (*ptr).key, key);
            ptr::write(&mut (*ptr).level, level);

            let tower_base = (*ptr).tower.as_ptr() as *mut AtomicMarkedPtr<Self>;
            for i in 0..level {
                ptr::write(tower_base.add(i), AtomicMarkedPtr::null());
            }

            Ok(ptr)
        }
    }

    /// Allocate and initialize a node carrying a value.
    pub(crate) fn alloc(key: Key, value: V, level: usize) -> Result<*mut Self, AllocError> {
        let ptr = Self::alloc_raw(key, level)?;
        unsafe {
            ptr::write(&mut (*ptr).value, MaybeUninit::new(value));
        }
        Ok(ptr)
    }

    /// Allocate a sentinel. Sentinels carry no value; their key is one of
    /// the two reserved extremes.
    pub(crate) fn alloc_sentinel(key: Key, level: usize) -> Result<*mut Self, AllocError> {
        let ptr = Self::alloc_raw(key, level)?;
        unsafe {
            ptr::write(&mut (*ptr).value, MaybeUninit::uninit());
        }
        Ok(ptr)
    }

    /// Return a node's memory to its size class.
    ///
    /// # Safety
    /// `ptr` must have been produced by `alloc`/`alloc_sentinel` and must
    /// not be reachable by any traversal.
    pub(crate) unsafe fn dealloc(ptr: *mut Self) {
        unsafe {
            let layout = Self::layout((*ptr).level);
            dealloc(ptr as *mut u8, layout);
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> Key {
        self.key
    }

    /// Copy the value out.
    ///
    /// # Safety
    /// The node must have been allocated with `alloc` (sentinels have no
    /// value).
    #[inline]
    pub(crate) unsafe fn value(&self) -> V
    where
        V: Copy,
    {
        unsafe { self.value.assume_init() }
    }

    #[inline]
    pub(crate) fn level(&self) -> usize {
        self.level
    }

    /// The forward pointer at `level`.
    #[inline]
    pub(crate) fn tower(&self, level: usize) -> &AtomicMarkedPtr<Node<V>> {
        debug_assert!(level < self.level);
        unsafe { &*self.tower.as_ptr().add(level) }
    }
}
