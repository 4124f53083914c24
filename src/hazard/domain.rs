use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::sync::OnceLock;

use super::registry::{HazardHandle, Registry, ResourceExhausted, Slot, DEFAULT_CAPACITY};
use super::retire::RetireList;
use crate::cfg::trace;

/// A hazard pointer domain.
///
/// A domain pairs a [`Registry`] of hazard slots with the list of pointers that were
/// retired while a slot might still have been guarding them. Pointers retired into a
/// domain are only checked against the slots of that same domain.
///
/// Most users never touch a domain directly: every [`HazardStack`](crate::HazardStack)
/// uses [`Domain::global`] unless configured otherwise.
pub struct Domain {
    registry: Registry,
    retired: RetireList,
    batch_size: usize,
}

/// A builder for a [`Domain`].
///
/// # Examples
///
/// ```rust
/// use treiber::hazard::Domain;
///
/// let domain = Domain::builder()
///     // Allow up to 16 threads to pop concurrently.
///     .capacity(16)
///     // Attempt reclamation once 64 pointers are pending.
///     .batch_size(64)
///     .build();
///
/// assert_eq!(domain.registry().capacity(), 16);
/// ```
#[derive(Debug)]
pub struct DomainBuilder {
    capacity: usize,
    batch_size: usize,
}

impl DomainBuilder {
    /// Set the number of hazard slots, i.e. the maximum number of threads that
    /// can access stacks in this domain at the same time.
    ///
    /// # Panics
    ///
    /// [`build`](DomainBuilder::build) panics if `capacity` is zero.
    pub fn capacity(self, capacity: usize) -> DomainBuilder {
        DomainBuilder { capacity, ..self }
    }

    /// Set the number of retired pointers that must be pending before a pop
    /// attempts a reclamation pass.
    ///
    /// A batch size of `1` attempts reclamation after every pop. Larger batches
    /// amortize the cost of scanning the hazard slots, at the cost of keeping more
    /// memory alive.
    pub fn batch_size(self, batch_size: usize) -> DomainBuilder {
        DomainBuilder {
            batch_size: batch_size.max(1),
            ..self
        }
    }

    /// Construct a [`Domain`] from the builder, using the configured options.
    pub fn build(self) -> Domain {
        Domain {
            registry: Registry::with_capacity(self.capacity),
            retired: RetireList::new(),
            batch_size: self.batch_size,
        }
    }
}

impl Domain {
    /// The default number of pending pointers that triggers a reclamation pass.
    pub const DEFAULT_BATCH_SIZE: usize = 1;

    /// Returns the process-wide domain.
    ///
    /// The global domain has [`DEFAULT_CAPACITY`] hazard slots.
    pub fn global() -> &'static Domain {
        static GLOBAL: OnceLock<Domain> = OnceLock::new();
        GLOBAL.get_or_init(Domain::new)
    }

    /// Creates a domain with [`DEFAULT_CAPACITY`] hazard slots.
    pub fn new() -> Domain {
        Domain::builder().build()
    }

    /// Creates a domain with `capacity` hazard slots.
    pub fn with_capacity(capacity: usize) -> Domain {
        Domain::builder().capacity(capacity).build()
    }

    /// Returns a builder for a `Domain`.
    pub fn builder() -> DomainBuilder {
        DomainBuilder {
            capacity: DEFAULT_CAPACITY,
            batch_size: Domain::DEFAULT_BATCH_SIZE,
        }
    }

    /// Returns the hazard slot registry of this domain.
    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the number of retired pointers that must be pending before a
    /// reclamation pass is attempted.
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Retires a pointer, running `reclaim` once no hazard slot in this domain
    /// guards it.
    ///
    /// Reclamation is deferred to a later pass, see [`Domain::reclaim`].
    ///
    /// # Safety
    ///
    /// - `ptr` must have been unlinked from any shared structure, so that only
    ///   threads which already published it in a hazard slot can still access it.
    /// - `ptr` must not be retired more than once.
    /// - `reclaim` must be safe to call with `ptr` on any thread, and must not
    ///   access any data that may have been freed in the meantime.
    pub unsafe fn retire<T>(&self, ptr: *mut T, reclaim: unsafe fn(*mut ())) {
        // safety: guaranteed by caller
        unsafe { self.retired.retire(ptr.cast(), reclaim) }
    }

    /// Runs a reclamation pass, freeing every retired pointer that is not guarded
    /// by a hazard slot.
    ///
    /// Pointers that are still guarded are kept for a later pass. Returns the
    /// number of pointers that were reclaimed.
    pub fn reclaim(&self) -> usize {
        self.retired.run_pass(&self.registry)
    }

    /// Returns the approximate number of retired pointers waiting to be reclaimed.
    #[inline]
    pub fn pending(&self) -> usize {
        self.retired.pending()
    }

    // Run a reclamation pass if enough pointers are pending.
    #[inline]
    pub(crate) fn try_reclaim(&self) {
        if self.pending() >= self.batch_size {
            self.reclaim();
        }
    }

    // Returns the hazard slot of the current thread in this domain, claiming one if
    // this is the first access from this thread.
    //
    // Slots are cached in thread-local storage and released when the thread exits.
    pub(crate) fn local(&'static self) -> Result<LocalHazard, ResourceExhausted> {
        thread_local! {
            static HANDLES: RefCell<Vec<HazardHandle<'static>>> = const { RefCell::new(Vec::new()) };
        }

        let cached = HANDLES.try_with(|handles| {
            let mut handles = handles.borrow_mut();

            if let Some(handle) = handles
                .iter()
                .find(|handle| std::ptr::eq(handle.registry(), &self.registry))
            {
                return Ok(handle.slot());
            }

            let handle = self.registry.acquire()?;
            let slot = handle.slot();
            handles.push(handle);
            Ok(slot)
        });

        match cached {
            Ok(slot) => slot.map(LocalHazard::Cached),
            // thread-local storage is being torn down, use a slot for
            // the duration of this operation only
            Err(_) => {
                trace!("thread-local storage destroyed, acquiring a temporary hazard slot");
                self.registry.acquire().map(LocalHazard::Temporary)
            }
        }
    }
}

impl Default for Domain {
    fn default() -> Domain {
        Domain::new()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("registry", &self.registry)
            .field("pending", &self.pending())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

// The hazard slot a thread uses for a single operation.
pub(crate) enum LocalHazard {
    // A slot owned by this thread until it exits.
    Cached(&'static Slot),
    // A slot owned for the lifetime of this value.
    Temporary(HazardHandle<'static>),
}

impl Deref for LocalHazard {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        match self {
            LocalHazard::Cached(slot) => slot,
            LocalHazard::Temporary(handle) => handle.slot(),
        }
    }
}
