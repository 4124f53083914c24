//! Hazard pointer reclamation and the stack built on it.
//!
//! A thread that wants to dereference a shared node first *publishes* its address
//! in a hazard slot, then re-validates that the node is still reachable. A thread
//! that unlinks a node *retires* it into the domain's deferred list, where it stays
//! until a reclamation pass finds no slot guarding it.

mod domain;
mod registry;
mod retire;

pub mod reclaim;

pub use domain::{Domain, DomainBuilder};
pub use registry::{HazardHandle, Registry, ResourceExhausted, Slot, DEFAULT_CAPACITY};

use std::fmt;
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::stack::Stack;

/// A lock-free stack that reclaims popped nodes with hazard pointers.
///
/// Every thread that pops claims a hazard slot in the stack's [`Domain`] and keeps
/// it until it exits. See the [crate-level documentation](crate#hazard-slots) for
/// details.
///
/// # Examples
///
/// ```
/// use treiber::HazardStack;
///
/// let stack = HazardStack::new();
/// stack.push(1);
/// stack.push(2);
///
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct HazardStack<T> {
    head: AtomicPtr<Node<T>>,
    domain: &'static Domain,
}

struct Node<T> {
    // Moved out exactly once, by the thread that unlinks the node.
    value: ManuallyDrop<T>,
    // Written before the node is published, immutable afterwards.
    next: *mut Node<T>,
}

// Safety: values are moved in through `push` and out through `pop`, possibly on
// different threads. No references to values are ever handed out.
unsafe impl<T: Send> Send for HazardStack<T> {}
unsafe impl<T: Send> Sync for HazardStack<T> {}

/// A builder for a [`HazardStack`].
///
/// # Examples
///
/// ```rust
/// use treiber::hazard::Domain;
/// use treiber::HazardStack;
///
/// let domain: &'static Domain = Box::leak(Box::new(Domain::with_capacity(4)));
/// let stack: HazardStack<u64> = HazardStack::builder().domain(domain).build();
/// ```
pub struct HazardStackBuilder<T> {
    domain: &'static Domain,
    _t: std::marker::PhantomData<T>,
}

impl<T> HazardStackBuilder<T> {
    /// Set the hazard pointer [`Domain`] used by the stack.
    ///
    /// The domain must be `'static`: threads keep their hazard slots cached until
    /// they exit, which may be long after the stack is dropped.
    pub fn domain(self, domain: &'static Domain) -> HazardStackBuilder<T> {
        HazardStackBuilder { domain, ..self }
    }

    /// Construct a [`HazardStack`] from the builder, using the configured options.
    pub fn build(self) -> HazardStack<T> {
        HazardStack {
            head: AtomicPtr::new(ptr::null_mut()),
            domain: self.domain,
        }
    }
}

impl<T> fmt::Debug for HazardStackBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardStackBuilder")
            .field("domain", &self.domain)
            .finish()
    }
}

impl<T> HazardStack<T> {
    /// Creates an empty stack in the [global domain](Domain::global).
    pub fn new() -> HazardStack<T> {
        HazardStack::builder().build()
    }

    /// Returns a builder for a `HazardStack`.
    pub fn builder() -> HazardStackBuilder<T> {
        HazardStackBuilder {
            domain: Domain::global(),
            _t: std::marker::PhantomData,
        }
    }

    /// Returns the hazard pointer domain of this stack.
    pub fn domain(&self) -> &'static Domain {
        self.domain
    }

    /// Pushes a value on top of the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: ManuallyDrop::new(value),
            next: ptr::null_mut(),
        }));

        // relaxed: the compare-exchange below publishes the node
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            // safety: the node is not published yet, we have exclusive access
            unsafe { (*node).next = head }

            // release: publish the node's value and link
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(found) => head = found,
            }
        }
    }

    /// Pops the value on top of the stack.
    ///
    /// Returns `Ok(None)` if the stack is empty, or an error if this is the first pop
    /// from the current thread and every hazard slot of the stack's domain is owned by
    /// another live thread.
    pub fn try_pop(&self) -> Result<Option<T>, ResourceExhausted> {
        let hazard = self.domain.local()?;

        let node = loop {
            // relaxed: the pointer is re-validated below
            let mut head = self.head.load(Ordering::Relaxed);

            // protect the head node
            loop {
                hazard.publish(head);

                // the node may have been popped and retired between the load and the
                // publication, in which case the reclaimer could have missed our hazard
                //
                // seqcst: see `Slot::publish`
                let current = self.head.load(Ordering::SeqCst);
                if current == head {
                    break;
                }

                head = current;
            }

            if head.is_null() {
                hazard.clear();
                return Ok(None);
            }

            // safety: the node is protected by our hazard slot
            let next = unsafe { (*head).next };

            // seqcst: order the unlink before the reclamation pass in `retire`
            if self
                .head
                .compare_exchange(head, next, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break head;
            }
        };

        // safety: we unlinked the node, no other thread will read its value
        let value = unsafe { ptr::read(&(*node).value) };

        hazard.clear();

        // other threads may still be validating a hazard for this node
        //
        // safety: the node is unlinked and retired exactly once. `reclaim::boxed` does
        // not drop the (already moved) value
        unsafe { self.domain.retire(node, reclaim::boxed::<Node<T>>) };
        self.domain.try_reclaim();

        Ok(Some(ManuallyDrop::into_inner(value)))
    }

    /// Pops the value on top of the stack.
    ///
    /// Returns `None` if the stack is empty.
    ///
    /// # Panics
    ///
    /// Panics if this is the first pop from the current thread and every hazard
    /// slot of the stack's domain is owned by another live thread. Use
    /// [`try_pop`](HazardStack::try_pop) to handle that case.
    pub fn pop(&self) -> Option<T> {
        match self.try_pop() {
            Ok(value) => value,
            Err(err) => panic!("{}", err),
        }
    }

    /// Returns `true` if the stack is empty.
    ///
    /// The result is only a snapshot and may be stale by the time it is returned.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for HazardStack<T> {
    fn default() -> Self {
        HazardStack::new()
    }
}

impl<T> Stack<T> for HazardStack<T> {
    fn push(&self, value: T) {
        HazardStack::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        HazardStack::pop(self)
    }

    fn is_empty(&self) -> bool {
        HazardStack::is_empty(self)
    }
}

impl<T> Drop for HazardStack<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();

        while !head.is_null() {
            // safety: we have `&mut self`, every node still linked is owned by the stack
            // and was never retired
            let mut node = unsafe { Box::from_raw(head) };
            head = node.next;

            // safety: values of linked nodes have not been moved out
            unsafe { ManuallyDrop::drop(&mut node.value) };
        }
    }
}

impl<T> fmt::Debug for HazardStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HazardStack")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
