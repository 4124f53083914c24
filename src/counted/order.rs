use std::sync::atomic::Ordering;

mod sealed {
    pub trait Sealed {}
}

/// The memory orderings used by a [`CountedStack`](crate::CountedStack).
///
/// This trait is sealed. Two policies are provided: [`Strict`], which makes every
/// atomic operation sequentially consistent, and [`Relaxed`], which uses the weakest
/// orderings that keep reclamation sound.
pub trait MemoryOrder: sealed::Sealed + Send + Sync + 'static {
    /// Loads of the head pointer that are validated by a later compare-exchange.
    const LOAD: Ordering;

    /// A successful compare-exchange publishing a new node.
    const PUSH: Ordering;
    /// A failed compare-exchange publishing a new node.
    const PUSH_FAILURE: Ordering;

    /// A successful compare-exchange that bumps the external count of the head,
    /// after which the node may be dereferenced.
    const CLAIM: Ordering;
    /// A failed compare-exchange bumping the external count.
    const CLAIM_FAILURE: Ordering;

    /// A successful compare-exchange unlinking the head node.
    const UNLINK: Ordering;
    /// A failed compare-exchange unlinking the head node.
    const UNLINK_FAILURE: Ordering;

    /// Updates of a node's internal count, either folding in the external count of an
    /// unlinked node or giving back a single claim.
    const RECONCILE: Ordering;

    /// The fence executed by the thread that frees a node, after it observed the
    /// internal count reach zero.
    const FREE: Ordering;
}

/// Sequentially consistent ordering for every atomic operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Strict;

impl sealed::Sealed for Strict {}

impl MemoryOrder for Strict {
    const LOAD: Ordering = Ordering::SeqCst;
    const PUSH: Ordering = Ordering::SeqCst;
    const PUSH_FAILURE: Ordering = Ordering::SeqCst;
    const CLAIM: Ordering = Ordering::SeqCst;
    const CLAIM_FAILURE: Ordering = Ordering::SeqCst;
    const UNLINK: Ordering = Ordering::SeqCst;
    const UNLINK_FAILURE: Ordering = Ordering::SeqCst;
    const RECONCILE: Ordering = Ordering::SeqCst;
    const FREE: Ordering = Ordering::SeqCst;
}

/// The minimal orderings that keep reclamation sound.
///
/// - The head is only ever modified by read-modify-write operations, so every value
///   it holds is part of the release sequence of the push that published the node.
///   Claiming a node with an acquire compare-exchange therefore makes its value and
///   link visible, and the other head operations can be relaxed.
/// - Every update of a node's internal count is a release, and the thread that sees
///   the count reach zero issues an acquire fence before freeing the node. Every read
///   through the node by any thread thus happens-before the node is freed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Relaxed;

impl sealed::Sealed for Relaxed {}

impl MemoryOrder for Relaxed {
    const LOAD: Ordering = Ordering::Relaxed;
    const PUSH: Ordering = Ordering::Release;
    const PUSH_FAILURE: Ordering = Ordering::Relaxed;
    const CLAIM: Ordering = Ordering::Acquire;
    const CLAIM_FAILURE: Ordering = Ordering::Relaxed;
    const UNLINK: Ordering = Ordering::Relaxed;
    const UNLINK_FAILURE: Ordering = Ordering::Relaxed;
    const RECONCILE: Ordering = Ordering::Release;
    const FREE: Ordering = Ordering::Acquire;
}
