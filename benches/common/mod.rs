#![allow(dead_code)]

use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

use seize::{reclaim, Collector, Guard, Linked};
use treiber::Stack;

// A Treiber stack that reclaims nodes with epoch-based reclamation, for comparison.
pub struct SeizeStack<T> {
    head: AtomicPtr<Linked<Node<T>>>,
    collector: Collector,
}

struct Node<T> {
    value: ManuallyDrop<T>,
    next: *mut Linked<Node<T>>,
}

unsafe impl<T: Send> Send for SeizeStack<T> {}
unsafe impl<T: Send> Sync for SeizeStack<T> {}

impl<T> SeizeStack<T> {
    pub fn new() -> SeizeStack<T> {
        SeizeStack {
            head: AtomicPtr::new(ptr::null_mut()),
            collector: Collector::new(),
        }
    }
}

impl<T> Stack<T> for SeizeStack<T> {
    fn push(&self, value: T) {
        let node = self.collector.link_boxed(Node {
            value: ManuallyDrop::new(value),
            next: ptr::null_mut(),
        });

        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).value.next = head }

            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(found) => head = found,
            }
        }
    }

    fn pop(&self) -> Option<T> {
        let guard = self.collector.enter();

        loop {
            let head = guard.protect(&self.head, Ordering::Acquire);
            if head.is_null() {
                return None;
            }

            let next = unsafe { (*head).value.next };

            if self
                .head
                .compare_exchange(head, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                unsafe {
                    let value = ptr::read(&(*head).value.value);
                    guard.defer_retire(head, reclaim::boxed::<Linked<Node<T>>>);
                    return Some(ManuallyDrop::into_inner(value));
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }
}

impl<T> Drop for SeizeStack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

// A `Vec` behind a lock.
pub struct MutexStack<T>(Mutex<Vec<T>>);

impl<T> MutexStack<T> {
    pub fn new() -> MutexStack<T> {
        MutexStack(Mutex::new(Vec::new()))
    }
}

impl<T> Stack<T> for MutexStack<T> {
    fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    fn pop(&self) -> Option<T> {
        self.0.lock().unwrap().pop()
    }

    fn is_empty(&self) -> bool {
        self.0.lock().unwrap().is_empty()
    }
}

// Run the benchmark on every stack implementation.
pub fn with_stacks(mut bench: impl FnMut(&str, &(dyn Stack<usize> + Sync))) {
    let mut run = |name: &str, stack: &(dyn Stack<usize> + Sync)| {
        check(name, stack);
        bench(name, stack);
    };

    run("hazard", &treiber::HazardStack::<usize>::new());
    run("counted-strict", &treiber::StrictStack::<usize>::new());
    run("counted-relaxed", &treiber::RelaxedStack::<usize>::new());
    run("seize", &SeizeStack::<usize>::new());
    run("mutex", &MutexStack::<usize>::new());
}

// Make sure a stack behaves like one before measuring it.
fn check(name: &str, stack: &dyn Stack<usize>) {
    for i in 0..64 {
        stack.push(i);
    }

    let popped = std::iter::from_fn(|| stack.pop()).collect::<Vec<_>>();
    assert_eq!(popped, (0..64).rev().collect::<Vec<_>>(), "{name} is not LIFO");
    assert!(stack.is_empty(), "{name} is not empty after draining");
}
