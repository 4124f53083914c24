use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use portable_atomic::Ordering;

// A node address and its external count are packed into one atomic integer, with
// the address in the low `ADDRESS_BITS` bits and the signed count above it.
#[cfg(all(not(loom), target_pointer_width = "32"))]
mod types {
    pub type Inner = u64;
    pub type SignedInner = i64;
    pub type InnerAtomic = portable_atomic::AtomicU64;
    pub const ADDRESS_BITS: u32 = 32;

    pub fn is_lock_free() -> bool {
        InnerAtomic::is_lock_free()
    }
}

#[cfg(all(not(loom), target_pointer_width = "64"))]
mod types {
    pub type Inner = u128;
    pub type SignedInner = i128;
    pub type InnerAtomic = portable_atomic::AtomicU128;
    pub const ADDRESS_BITS: u32 = 64;

    pub fn is_lock_free() -> bool {
        InnerAtomic::is_lock_free()
    }
}

// loom has no double-width atomics. User-space addresses fit in 48 bits, which
// leaves a 16-bit count, plenty for the handful of threads in a model.
#[cfg(loom)]
mod types {
    pub type Inner = u64;
    pub type SignedInner = i64;
    pub type InnerAtomic = loom::sync::atomic::AtomicU64;
    pub const ADDRESS_BITS: u32 = 48;

    pub fn is_lock_free() -> bool {
        true
    }
}

use types::*;

const ADDRESS_MASK: Inner = (1 << ADDRESS_BITS) - 1;

/// A node pointer paired with the number of threads that loaded it from the head
/// and have not yet reconciled their reference with the node's internal count.
pub struct CountedPtr<N> {
    ptr: *mut N,
    count: isize,
}

impl<N> CountedPtr<N> {
    #[inline]
    pub const fn null() -> CountedPtr<N> {
        CountedPtr {
            ptr: ptr::null_mut(),
            count: 0,
        }
    }

    #[inline]
    pub fn new(ptr: *mut N, count: isize) -> CountedPtr<N> {
        CountedPtr { ptr, count }
    }

    #[inline]
    pub fn ptr(self) -> *mut N {
        self.ptr
    }

    #[inline]
    pub fn count(self) -> isize {
        self.count
    }

    // Returns the same pointer with one more external reference.
    #[inline]
    pub fn increment(self) -> CountedPtr<N> {
        CountedPtr {
            ptr: self.ptr,
            count: self.count + 1,
        }
    }

    #[inline]
    fn pack(self) -> Inner {
        let address = self.ptr as usize as Inner;
        debug_assert_eq!(address & !ADDRESS_MASK, 0, "address does not fit");

        // bits of the count above the top of the integer are shifted out, which is
        // lossless for any count the stack can reach
        ((self.count as Inner) << ADDRESS_BITS) | address
    }

    #[inline]
    fn unpack(value: Inner) -> CountedPtr<N> {
        CountedPtr {
            ptr: (value & ADDRESS_MASK) as usize as *mut N,
            // arithmetic shift, to sign-extend the count
            count: ((value as SignedInner) >> ADDRESS_BITS) as isize,
        }
    }
}

impl<N> Clone for CountedPtr<N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<N> Copy for CountedPtr<N> {}

impl<N> PartialEq for CountedPtr<N> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.count == other.count
    }
}

impl<N> Eq for CountedPtr<N> {}

impl<N> fmt::Debug for CountedPtr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedPtr")
            .field("ptr", &self.ptr)
            .field("count", &self.count)
            .finish()
    }
}

/// A [`CountedPtr`] that is loaded and compare-exchanged as a single atomic unit.
pub struct AtomicCountedPtr<N> {
    inner: InnerAtomic,
    _marker: PhantomData<*mut N>,
}

impl<N> AtomicCountedPtr<N> {
    #[inline]
    pub fn null() -> AtomicCountedPtr<N> {
        AtomicCountedPtr {
            inner: InnerAtomic::new(0),
            _marker: PhantomData,
        }
    }

    // Returns `true` if double-width operations are natively lock-free on this target.
    #[inline]
    pub fn is_lock_free() -> bool {
        types::is_lock_free()
    }

    #[inline]
    pub fn load(&self, order: Ordering) -> CountedPtr<N> {
        CountedPtr::unpack(self.inner.load(order))
    }

    #[inline]
    pub fn compare_exchange(
        &self,
        current: CountedPtr<N>,
        new: CountedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), CountedPtr<N>> {
        self.inner
            .compare_exchange(current.pack(), new.pack(), success, failure)
            .map(drop)
            .map_err(CountedPtr::unpack)
    }

    #[inline]
    pub fn compare_exchange_weak(
        &self,
        current: CountedPtr<N>,
        new: CountedPtr<N>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<(), CountedPtr<N>> {
        self.inner
            .compare_exchange_weak(current.pack(), new.pack(), success, failure)
            .map(drop)
            .map_err(CountedPtr::unpack)
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn pack_preserves_pointer_and_count() {
        let mut value = 5_u32;
        let ptr: *mut u32 = &mut value;

        for count in [0, 1, 2, 1 << 20, -1, -7, isize::MAX, isize::MIN] {
            let counted = CountedPtr::new(ptr, count);
            assert_eq!(CountedPtr::unpack(counted.pack()), counted);
        }

        let null = CountedPtr::<u32>::null();
        assert_eq!(null.pack(), 0);
        assert!(CountedPtr::<u32>::unpack(0).ptr().is_null());
    }

    #[test]
    fn compare_exchange_compares_the_count() {
        let mut value = 5_u32;
        let ptr: *mut u32 = &mut value;

        let atomic = AtomicCountedPtr::null();
        let one = CountedPtr::new(ptr, 1);
        assert_eq!(
            atomic.compare_exchange(CountedPtr::null(), one, Ordering::SeqCst, Ordering::SeqCst),
            Ok(())
        );

        // same pointer, stale count
        let err = atomic
            .compare_exchange(
                CountedPtr::new(ptr, 2),
                CountedPtr::null(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .unwrap_err();
        assert_eq!(err, one);

        assert_eq!(
            atomic.compare_exchange(one, one.increment(), Ordering::SeqCst, Ordering::SeqCst),
            Ok(())
        );
        let head = atomic.load(Ordering::SeqCst);
        assert_eq!(head.count(), 2);
        assert_eq!(head.ptr(), ptr);
    }
}
