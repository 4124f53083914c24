mod order;
mod ptr;

pub use order::{MemoryOrder, Relaxed, Strict};

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;

#[cfg(loom)]
use loom::sync::atomic::{fence, AtomicIsize};
#[cfg(not(loom))]
use std::sync::atomic::{fence, AtomicIsize};

use self::ptr::{AtomicCountedPtr, CountedPtr};
use crate::cfg::trace;
use crate::stack::Stack;

/// A [`CountedStack`] that performs every atomic operation with sequentially
/// consistent ordering.
pub type StrictStack<T> = CountedStack<T, Strict>;

/// A [`CountedStack`] that uses the weakest orderings that keep reclamation sound.
pub type RelaxedStack<T> = CountedStack<T, Relaxed>;

/// A lock-free stack that reclaims popped nodes with split reference counting.
///
/// The head of the stack is a pointer paired with an *external* count, updated as a
/// single double-width atomic. A thread bumps the external count before it
/// dereferences the head node, which keeps the node alive without any per-thread
/// registration. Once a node is unlinked, its external count is folded into the
/// node's *internal* count, and the node is freed by whichever thread brings the
/// internal count to zero.
///
/// The memory orderings used are selected by `O`, see [`MemoryOrder`].
///
/// # Examples
///
/// ```
/// use treiber::{RelaxedStack, StrictStack};
///
/// let strict = StrictStack::new();
/// strict.push(1);
/// assert_eq!(strict.pop(), Some(1));
///
/// let relaxed = RelaxedStack::new();
/// relaxed.push("a");
/// assert_eq!(relaxed.pop(), Some("a"));
/// assert_eq!(relaxed.pop(), None);
/// ```
pub struct CountedStack<T, O: MemoryOrder = Strict> {
    head: AtomicCountedPtr<Node<T>>,
    #[cfg(test)]
    nodes: counters::NodeCount,
    _marker: PhantomData<(T, O)>,
}

struct Node<T> {
    // Moved out exactly once, by the thread that unlinks the node.
    value: ManuallyDrop<T>,
    // The sum of external references given back to the node, minus those still
    // held by the head once it is unlinked.
    internal: AtomicIsize,
    // Written before the node is published, immutable afterwards.
    next: CountedPtr<Node<T>>,
}

// Safety: values are moved in through `push` and out through `pop`, possibly on
// different threads. No references to values are ever handed out.
unsafe impl<T: Send, O: MemoryOrder> Send for CountedStack<T, O> {}
unsafe impl<T: Send, O: MemoryOrder> Sync for CountedStack<T, O> {}

impl<T, O: MemoryOrder> CountedStack<T, O> {
    /// Creates an empty stack.
    pub fn new() -> CountedStack<T, O> {
        CountedStack {
            head: AtomicCountedPtr::null(),
            #[cfg(test)]
            nodes: counters::NodeCount::default(),
            _marker: PhantomData,
        }
    }

    /// Returns `true` if the double-width compare-exchange used for the head is
    /// natively lock-free on this machine.
    ///
    /// When it is not, atomic operations on the head fall back to a global lock
    /// table, and the stack is not lock-free.
    pub fn is_lock_free() -> bool {
        AtomicCountedPtr::<Node<T>>::is_lock_free()
    }

    /// Pushes a value on top of the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: ManuallyDrop::new(value),
            internal: AtomicIsize::new(0),
            next: CountedPtr::null(),
        }));

        #[cfg(test)]
        self.nodes.allocated();

        // the head holds the only external reference
        let new = CountedPtr::new(node, 1);
        let mut head = self.head.load(O::LOAD);

        loop {
            // safety: the node is not published yet, we have exclusive access
            unsafe { (*node).next = head }

            match self
                .head
                .compare_exchange_weak(head, new, O::PUSH, O::PUSH_FAILURE)
            {
                Ok(()) => return,
                Err(found) => head = found,
            }
        }
    }

    /// Pops the value on top of the stack.
    ///
    /// Returns `None` if the stack is empty.
    pub fn pop(&self) -> Option<T> {
        let mut head = self.head.load(O::LOAD);

        loop {
            // register a reference to the head node before dereferencing it
            self.claim(&mut head);

            let node = head.ptr();
            if node.is_null() {
                return None;
            }

            // safety: our claim keeps the node alive
            let next = unsafe { (*node).next };

            match self
                .head
                .compare_exchange(head, next, O::UNLINK, O::UNLINK_FAILURE)
            {
                Ok(()) => {
                    // safety: we unlinked the node, no other thread will read its value
                    let value = unsafe { std::ptr::read(&(*node).value) };

                    // one external reference belonged to the head, which no longer
                    // points to the node, and one is our own claim. every other
                    // reference is given back by the thread holding it
                    let outstanding = head.count() - 2;

                    // safety: our claim keeps the node alive
                    let internal = unsafe { &(*node).internal };
                    if internal.fetch_add(outstanding, O::RECONCILE) == -outstanding {
                        // safety: every reference was given back
                        unsafe { self.free(node) }
                    }

                    return Some(ManuallyDrop::into_inner(value));
                }
                Err(found) => {
                    // the head changed under us, give back our claim on the old node
                    //
                    // safety: our claim keeps the node alive
                    let internal = unsafe { &(*node).internal };
                    if internal.fetch_sub(1, O::RECONCILE) == 1 {
                        // safety: the node was unlinked and we held the last reference
                        unsafe { self.free(node) }
                    }

                    head = found;
                }
            }
        }
    }

    /// Returns `true` if the stack is empty.
    ///
    /// The result is only a snapshot and may be stale by the time it is returned.
    pub fn is_empty(&self) -> bool {
        self.head.load(O::LOAD).ptr().is_null()
    }

    // Increment the external count of the head, which must currently equal `head`.
    //
    // On return `head` holds the value that was installed, which carries our claim.
    fn claim(&self, head: &mut CountedPtr<Node<T>>) {
        loop {
            // there is no node to keep alive
            if head.ptr().is_null() {
                return;
            }

            let claimed = head.increment();

            match self
                .head
                .compare_exchange(*head, claimed, O::CLAIM, O::CLAIM_FAILURE)
            {
                Ok(()) => {
                    *head = claimed;
                    return;
                }
                Err(found) => *head = found,
            }
        }
    }

    // Free an unlinked node.
    //
    // # Safety
    //
    // The node must be unlinked with its value moved out, and the caller must have
    // observed its reconciled internal count reach zero.
    unsafe fn free(&self, node: *mut Node<T>) {
        // synchronize with the release of every other reference to the node
        fence(O::FREE);

        trace!("freeing node {:p}", node);

        // safety: guaranteed by caller. the value was moved out, dropping the
        // `ManuallyDrop` leaves it untouched
        let _ = unsafe { Box::from_raw(node) };

        #[cfg(test)]
        self.nodes.freed();
    }
}

impl<T, O: MemoryOrder> Default for CountedStack<T, O> {
    fn default() -> Self {
        CountedStack::new()
    }
}

impl<T, O: MemoryOrder> Stack<T> for CountedStack<T, O> {
    fn push(&self, value: T) {
        CountedStack::push(self, value)
    }

    fn pop(&self) -> Option<T> {
        CountedStack::pop(self)
    }

    fn is_empty(&self) -> bool {
        CountedStack::is_empty(self)
    }
}

impl<T, O: MemoryOrder> Drop for CountedStack<T, O> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T, O: MemoryOrder> fmt::Debug for CountedStack<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountedStack")
            .field("head", &self.head.load(O::LOAD))
            .finish()
    }
}



// Exhaustive interleavings of small workloads, run with
// `RUSTFLAGS="--cfg loom" cargo test --lib --release loom`.
#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;

    use loom::sync::Arc;
    use loom::thread;

    fn drain<O: MemoryOrder>(stack: &CountedStack<usize, O>) -> Vec<usize> {
        std::iter::from_fn(|| stack.pop()).collect()
    }

    // A push racing a pop.
    fn push_pop<O: MemoryOrder>() {
        loom::model(|| {
            let stack = Arc::new(CountedStack::<usize, O>::new());
            stack.push(1);

            let pusher = {
                let stack = stack.clone();
                thread::spawn(move || stack.push(2))
            };
            let popper = {
                let stack = stack.clone();
                thread::spawn(move || stack.pop())
            };

            pusher.join().unwrap();
            let popped = popper.join().unwrap();
            assert!(popped.is_some());

            let mut values = popped.into_iter().chain(drain(&stack)).collect::<Vec<_>>();
            values.sort();
            assert_eq!(values, [1, 2]);
            assert_eq!(stack.nodes.get(), (2, 2));
        });
    }

    #[test]
    fn push_pop_strict() {
        push_pop::<Strict>();
    }

    #[test]
    fn push_pop_relaxed() {
        push_pop::<Relaxed>();
    }

    // Two pops claiming the same head, where the loser of the unlink may hold the last
    // reference to the node.
    fn pop_pop<O: MemoryOrder>() {
        loom::model(|| {
            let stack = Arc::new(CountedStack::<usize, O>::new());
            stack.push(1);
            stack.push(2);

            let poppers = (0..2)
                .map(|_| {
                    let stack = stack.clone();
                    thread::spawn(move || stack.pop())
                })
                .collect::<Vec<_>>();

            let mut values = poppers
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect::<Vec<_>>();
            values.sort();

            assert_eq!(values, [1, 2]);
            assert!(stack.is_empty());
            assert_eq!(stack.nodes.get(), (2, 2));
        });
    }

    #[test]
    fn pop_pop_strict() {
        pop_pop::<Strict>();
    }

    #[test]
    fn pop_pop_relaxed() {
        pop_pop::<Relaxed>();
    }

    // A pusher and two poppers on a single-element stack.
    #[test]
    fn push_pop_pop_relaxed() {
        let mut builder = loom::model::Builder::new();
        builder.preemption_bound = Some(2);

        builder.check(|| {
            let stack = Arc::new(RelaxedStack::<usize>::new());
            stack.push(1);

            let pusher = {
                let stack = stack.clone();
                thread::spawn(move || stack.push(2))
            };
            let poppers = (0..2)
                .map(|_| {
                    let stack = stack.clone();
                    thread::spawn(move || stack.pop())
                })
                .collect::<Vec<_>>();

            pusher.join().unwrap();
            let mut values = poppers
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .chain(drain(&stack))
                .collect::<Vec<_>>();
            values.sort();

            // both values come out exactly once, and each node is freed exactly once
            assert_eq!(values, [1, 2]);
            assert_eq!(stack.nodes.get(), (2, 2));
        });
    }
}
