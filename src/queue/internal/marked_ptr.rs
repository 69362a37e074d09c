// Marked pointer operations using the least significant bit as a mark flag.
//
// Bit layout:
//   Bit 0: DELETE_MARK - set on a node's bottom-level forward pointer to
//          claim (logically delete) the node it points at
//
// Node allocations are cache-line aligned, so the low bit of every forward
// pointer is always free to carry the mark.
//
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

const DELETE_MARK: usize = 0b1;

/// A pointer value that may carry the delete mark in its low bit.
pub(crate) struct MarkedPtr<T> {
    bits: usize,
    _marker: PhantomData<*mut T>,
}

impl<T> Copy for MarkedPtr<T> {}

impl<T> Clone for MarkedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for MarkedPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<T> Eq for MarkedPtr<T> {}

impl<T> fmt::Debug for MarkedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkedPtr")
            .field("ptr", &self.as_ptr())
            .field("marked", &self.is_marked())
            .finish()
    }
}

impl<T> MarkedPtr<T> {
    /// Create from a (possibly marked) raw pointer.
    #[inline]
    pub(crate) fn new(ptr: *mut T) -> Self {
        MarkedPtr {
            bits: ptr as usize,
            _marker: PhantomData,
        }
    }

    /// Reconstruct from a raw word previously obtained via `as_usize`.
    #[inline]
    pub(crate) fn from_usize(bits: usize) -> Self {
        MarkedPtr {
            bits,
            _marker: PhantomData,
        }
    }

    /// The raw word, mark bit included. This is the representation to use
    /// for equality snapshots and CAS expectations.
    #[inline]
    pub(crate) fn as_usize(&self) -> usize {
        self.bits
    }

    /// The clean pointer without the mark bit (the one you dereference).
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        (self.bits & !DELETE_MARK) as *mut T
    }

    #[inline]
    pub(crate) fn is_marked(&self) -> bool {
        (self.bits & DELETE_MARK) != 0
    }

    /// The same pointer with the mark bit set.
    #[inline]
    pub(crate) fn with_mark(&self) -> Self {
        MarkedPtr {
            bits: self.bits | DELETE_MARK,
            _marker: PhantomData,
        }
    }
}

/// An atomic forward pointer whose low bit is the delete mark.
///
/// Backed by an `AtomicUsize` rather than an `AtomicPtr` so the mark can be
/// set with a single `fetch_or` (the delete-min linearization point).
pub(crate) struct AtomicMarkedPtr<T> {
    bits: AtomicUsize,
    _marker: PhantomData<*mut T>,
}

impl<T> AtomicMarkedPtr<T> {
    #[inline]
    pub(crate) fn null() -> Self {
        AtomicMarkedPtr {
            bits: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn load(&self, order: Ordering) -> MarkedPtr<T> {
        MarkedPtr::from_usize(self.bits.load(order))
    }

    #[inline]
    pub(crate) fn store(&self, ptr: MarkedPtr<T>, order: Ordering) {
        self.bits.store(ptr.as_usize(), order);
    }

    #[inline]
    pub(crate) fn compare_exchange(
        &self,
        current: MarkedPtr<T>,
        new: MarkedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<MarkedPtr<T>, MarkedPtr<T>> {
        self.bits
            .compare_exchange(current.as_usize(), new.as_usize(), success, failure)
            .map(MarkedPtr::from_usize)
            .map_err(MarkedPtr::from_usize)
    }

    /// Set the mark bit, returning the previous value.
    ///
    /// If the returned value is unmarked, this call claimed the successor.
    /// Idempotent: re-marking an already marked pointer changes nothing.
    #[inline]
    pub(crate) fn fetch_or_mark(&self, order: Ordering) -> MarkedPtr<T> {
        MarkedPtr::from_usize(self.bits.fetch_or(DELETE_MARK, order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_round_trip() {
        let mut x = 7u64;
        let p = MarkedPtr::new(&mut x as *mut u64);

        assert!(!p.is_marked());
        assert_eq!(p.as_ptr(), &mut x as *mut u64);

        let m = p.with_mark();
        assert!(m.is_marked());
        assert_eq!(m.as_ptr(), &mut x as *mut u64);
        assert_ne!(m.as_usize(), p.as_usize());
    }

    #[test]
    fn test_fetch_or_mark_claims_once() {
        let mut x = 7u64;
        let a = AtomicMarkedPtr::null();
        a.store(MarkedPtr::new(&mut x as *mut u64), Ordering::Relaxed);

        let first = a.fetch_or_mark(Ordering::AcqRel);
        assert!(!first.is_marked());

        let second = a.fetch_or_mark(Ordering::AcqRel);
        assert!(second.is_marked());
        assert_eq!(second.as_ptr(), first.as_ptr());
    }

    #[test]
    fn test_compare_exchange_respects_mark() {
        let mut x = 7u64;
        let mut y = 9u64;
        let a = AtomicMarkedPtr::null();
        a.store(MarkedPtr::new(&mut x as *mut u64), Ordering::Relaxed);

        a.fetch_or_mark(Ordering::AcqRel);

        // An expectation built from the clean pointer must fail against the
        // marked word.
        let res = a.compare_exchange(
            MarkedPtr::new(&mut x as *mut u64),
            MarkedPtr::new(&mut y as *mut u64),
            Ordering::Release,
            Ordering::Relaxed,
        );
        assert!(res.is_err());
        assert!(res.unwrap_err().is_marked());
    }
}
