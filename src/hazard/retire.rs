use std::ptr;
use std::sync::atomic::{self, AtomicPtr, AtomicUsize, Ordering};

use super::registry::Registry;
use crate::cfg::trace;

// A type-erased pointer waiting to be reclaimed.
struct Retired {
    // The retired allocation.
    data: *mut (),
    // Drop glue for `data`.
    reclaim: unsafe fn(*mut ()),
    // The next record in the list.
    next: *mut Retired,
}

// A lock-free list of retired pointers.
//
// Records are pushed with the usual Treiber loop, but are only ever removed by
// claiming the entire list at once, so the list itself is not subject to ABA.
pub struct RetireList {
    head: AtomicPtr<Retired>,
    // The approximate number of records in the list.
    pending: AtomicUsize,
}

impl RetireList {
    pub const fn new() -> RetireList {
        RetireList {
            head: AtomicPtr::new(ptr::null_mut()),
            pending: AtomicUsize::new(0),
        }
    }

    // Defer reclamation of `data` until no hazard slot guards it.
    //
    // # Safety
    //
    // `data` must be unreachable for any thread that has not already published it
    // in a hazard slot, and must not be retired twice. `reclaim` must be valid to call
    // on `data` from any thread.
    pub unsafe fn retire(&self, data: *mut (), reclaim: unsafe fn(*mut ())) {
        debug_assert!(!data.is_null(), "attempted to retire null pointer");

        let record = Box::into_raw(Box::new(Retired {
            data,
            reclaim,
            next: ptr::null_mut(),
        }));

        // relaxed: the count is only a heuristic for when to run a pass
        self.pending.fetch_add(1, Ordering::Relaxed);

        // safety: we just allocated the record
        unsafe { self.defer(record, record) }
        trace!("deferred reclamation of {:p}", data);
    }

    // Link the chain of records from `first` to `last` onto the head of the list.
    //
    // # Safety
    //
    // `first` through `last` must be a valid chain of records owned by the caller.
    unsafe fn defer(&self, first: *mut Retired, last: *mut Retired) {
        // relaxed: the compare-exchange below publishes the records
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            // safety: we own `last` until it is linked
            unsafe { (*last).next = head }

            // release: publish the records to the thread that claims them
            match self.head.compare_exchange_weak(
                head,
                first,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(found) => head = found,
            }
        }
    }

    // Reclaim every record whose pointer is not guarded by a slot in `registry`.
    //
    // Records that are still guarded are put back for a later pass. Returns the
    // number of records that were reclaimed.
    pub fn run_pass(&self, registry: &Registry) -> usize {
        // seqcst: establish a total order with the publication of hazards
        // - if this fence comes first, the publishing thread will see that the
        //   pointer it loaded was unlinked and retry
        // - if the publication comes first, we will see the hazard below
        atomic::fence(Ordering::SeqCst);

        // claim the entire list, concurrent retirements start a fresh one
        //
        // acquire: synchronize with the release in `defer` to take ownership
        // of the records
        let mut list = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        if list.is_null() {
            return 0;
        }

        trace!("running reclamation pass");

        let mut reclaimed = 0;
        let (mut kept_first, mut kept_last): (*mut Retired, *mut Retired) =
            (ptr::null_mut(), ptr::null_mut());

        while !list.is_null() {
            let record = list;

            // safety: we own every record in the claimed list
            unsafe {
                list = (*record).next;

                if registry.scan((*record).data) {
                    // still guarded, keep it for a future pass
                    (*record).next = kept_first;
                    kept_first = record;
                    if kept_last.is_null() {
                        kept_last = record;
                    }
                } else {
                    let record = Box::from_raw(record);
                    (record.reclaim)(record.data);
                    reclaimed += 1;
                }
            }
        }

        if !kept_first.is_null() {
            // safety: the kept records form a chain we own
            unsafe { self.defer(kept_first, kept_last) }
        }

        // relaxed: see `retire`
        self.pending.fetch_sub(reclaimed, Ordering::Relaxed);
        trace!("reclaimed {} records", reclaimed);

        reclaimed
    }

    // Returns the approximate number of records waiting to be reclaimed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

impl Drop for RetireList {
    fn drop(&mut self) {
        let mut list = *self.head.get_mut();

        while !list.is_null() {
            // safety: we have `&mut self`, so no thread can be guarding a record
            // in this list
            unsafe {
                let record = Box::from_raw(list);
                list = record.next;
                (record.reclaim)(record.data);
            }
        }
    }
}
