use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::ptr;

use crate::cfg::trace;
use crate::utils::{self, CachePadded};

/// The number of hazard slots in a [`Registry`] unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 100;

// The owner of a slot that no thread has claimed.
const UNOWNED: u64 = 0;

/// A fixed-capacity table of hazard slots.
///
/// Each slot is owned by at most one thread at a time, and announces the single
/// address that thread is currently dereferencing. An address guarded by any slot
/// must not be freed.
pub struct Registry {
    slots: Box<[CachePadded<Slot>]>,
}

/// A single hazard slot.
///
/// Only the owner of a slot may change the address it guards, through its
/// [`HazardHandle`]. A shared reference to a slot can only observe it:
///
/// ```compile_fail
/// use treiber::hazard::Domain;
///
/// // clearing a guard owned by another thread is rejected
/// Domain::global().registry().slot(0).clear();
/// ```
pub struct Slot {
    // The thread that owns this slot, or `UNOWNED`.
    owner: AtomicU64,
    // The address this slot currently protects, or null.
    guarded: AtomicPtr<()>,
}

impl Default for Slot {
    fn default() -> Slot {
        Slot {
            owner: AtomicU64::new(UNOWNED),
            guarded: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl Slot {
    /// Announce that `address` is about to be dereferenced.
    ///
    /// The announcement is only effective once the caller has re-validated that
    /// `address` is still reachable from the shared structure it was loaded from.
    #[inline]
    pub(crate) fn publish<T>(&self, address: *const T) {
        // seqcst: establish a total order with the pointer re-validation by the caller,
        // and the fence at the start of a reclamation pass
        // - if this store comes first, the reclaiming thread will see the hazard
        // - if the fence comes first, the re-validation will see that the pointer was
        //   unlinked
        self.guarded.store(address as *mut (), Ordering::SeqCst);
    }

    /// Retract the current announcement.
    #[inline]
    pub(crate) fn clear(&self) {
        // release: any accesses through the guarded pointer happen-before
        // a reclaimer observes the slot as empty
        self.guarded.store(ptr::null_mut(), Ordering::Release);
    }

    /// Returns the address currently guarded by this slot.
    #[inline]
    pub fn guarded(&self) -> *mut () {
        self.guarded.load(Ordering::SeqCst)
    }

    /// Returns `true` if this slot is currently owned by a thread.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.owner.load(Ordering::Acquire) != UNOWNED
    }
}

impl Registry {
    /// Creates a registry with `capacity` hazard slots.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Registry {
        assert!(capacity > 0, "a hazard registry needs at least one slot");

        Registry {
            slots: (0..capacity).map(|_| CachePadded::default()).collect(),
        }
    }

    /// Returns the number of slots in this registry.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Returns the number of slots currently owned by a thread.
    pub fn owned(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_owned()).count()
    }

    /// Claim the first unowned slot for the current thread.
    ///
    /// The slot is returned to the registry when the handle is dropped.
    pub fn acquire(&self) -> Result<HazardHandle<'_>, ResourceExhausted> {
        let owner = utils::thread_id().get();

        for (index, slot) in self.slots.iter().enumerate() {
            // relaxed: skip slots that are obviously taken without a write
            if slot.owner.load(Ordering::Relaxed) != UNOWNED {
                continue;
            }

            // acquire: synchronize with the release of the previous owner, whose
            // hazard was cleared before the slot was returned
            if slot
                .owner
                .compare_exchange(UNOWNED, owner, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                trace!("acquired hazard slot {}", index);
                return Ok(HazardHandle {
                    registry: self,
                    index,
                });
            }
        }

        trace!("all {} hazard slots are in use", self.capacity());
        Err(ResourceExhausted {
            capacity: self.capacity(),
        })
    }

    /// Returns `true` if any slot currently guards `address`.
    pub fn scan<T>(&self, address: *const T) -> bool {
        let address = address as *mut ();
        self.slots.iter().any(|slot| slot.guarded() == address)
    }

    // Return a slot to the registry.
    fn release(&self, index: usize) {
        let slot = &self.slots[index];

        // the hazard must be cleared before the slot can be observed as unowned,
        // otherwise a new owner could inherit a stale guard
        slot.clear();

        // release: the cleared hazard happens-before the next owner's acquire
        slot.owner.store(UNOWNED, Ordering::Release);
        trace!("released hazard slot {}", index);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("capacity", &self.capacity())
            .field("owned", &self.owned())
            .finish()
    }
}

/// Exclusive ownership of a hazard slot.
///
/// Dropping the handle clears the slot's hazard and returns it to the registry.
pub struct HazardHandle<'r> {
    registry: &'r Registry,
    index: usize,
}

impl<'r> HazardHandle<'r> {
    /// Returns the index of the owned slot within its registry.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the owned slot.
    #[inline]
    pub fn slot(&self) -> &'r Slot {
        self.registry.slot(self.index)
    }

    /// Returns the registry this handle belongs to.
    #[inline]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Announce that `address` is about to be dereferenced.
    ///
    /// The announcement is only effective once the caller has re-validated that
    /// `address` is still reachable from the shared structure it was loaded from.
    #[inline]
    pub fn publish<T>(&self, address: *const T) {
        self.slot().publish(address)
    }

    /// Retract the current announcement.
    #[inline]
    pub fn clear(&self) {
        self.slot().clear()
    }
}

impl Drop for HazardHandle<'_> {
    fn drop(&mut self) {
        debug_assert!(self.slot().is_owned(), "hazard slot released twice");
        self.registry.release(self.index);
    }
}

impl fmt::Debug for HazardHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardHandle")
            .field("index", &self.index)
            .field("guarded", &self.slot().guarded())
            .finish()
    }
}

/// Every hazard slot of a registry is owned by a live thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceExhausted {
    capacity: usize,
}

impl ResourceExhausted {
    /// Returns the capacity of the exhausted registry.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Display for ResourceExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no hazard slots available: all {} slots are owned by live threads",
            self.capacity
        )
    }
}

impl Error for ResourceExhausted {}
