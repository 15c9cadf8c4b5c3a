//! Michael-Scott lock-free FIFO queue.
//!
//! `enqueue` linearizes at the CAS that installs the new node onto the old
//! tail's `next`; `dequeue` linearizes at the CAS that advances `Head` past
//! the node being returned. The retired sentinel is reclaimed through
//! [`crate::epoch`] rather than freed immediately, since a concurrent
//! enqueuer may still hold a stale `tail` pointing at it.

use std::mem::MaybeUninit;
use std::ptr;
use crossbeam_utils::CachePadded;
use tracing::warn;

use crate::epoch::Guard;
use crate::error::{Error, Result};
use crate::sync::Ordering;
use crate::tagged::{Tagged, TaggedPtr};

struct Node<T> {
    next: TaggedPtr<Node<T>>,
    data: MaybeUninit<T>,
}

impl<T> Node<T> {
    fn sentinel() -> Box<Self> {
        Box::new(Node {
            next: TaggedPtr::null(),
            data: MaybeUninit::uninit(),
        })
    }

    fn holding(value: T) -> Box<Self> {
        Box::new(Node {
            next: TaggedPtr::null(),
            data: MaybeUninit::new(value),
        })
    }
}

/// Unbounded multi-producer, multi-consumer FIFO queue.
///
/// A sentinel node is always present at `Head`; the first real element is
/// `Head.next`. See the crate's design notes for the full invariant list.
pub struct Queue<T> {
    // `head` and `tail` are each CAS'd by every dequeue/enqueue attempt;
    // padding them apart keeps those hot words off the same cache line.
    head: CachePadded<TaggedPtr<Node<T>>>,
    tail: CachePadded<TaggedPtr<Node<T>>>,
}

unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    /// Create a new, empty queue (allocates one sentinel node).
    pub fn new() -> Self {
        let sentinel = Box::into_raw(Node::sentinel());
        Queue {
            head: CachePadded::new(TaggedPtr::new(Tagged::new(sentinel, 0))),
            tail: CachePadded::new(TaggedPtr::new(Tagged::new(sentinel, 0))),
        }
    }

    /// Enqueue `value` at the tail. Only fails (`Error::OutOfMemory`) if the
    /// system allocator cannot provide a node, which this safe wrapper
    /// cannot observe ahead of time — included for parity with the bounded
    /// containers' error surface.
    pub fn enqueue(&self, value: T) -> Result<()> {
        let node = Box::into_raw(Node::holding(value));

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let tail_node = unsafe { &*tail.ptr() };
            let next = tail_node.next.load(Ordering::Acquire);

            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }

            if next.is_null() {
                let desired = next.with_ptr(node);
                if tail_node
                    .next
                    .compare_exchange_weak(next, desired, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    let _ = self.tail.compare_exchange_weak(
                        tail,
                        tail.with_ptr(node),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return Ok(());
                }
            } else {
                let _ = self.tail.compare_exchange_weak(
                    tail,
                    tail.with_ptr(next.ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
    }

    /// Dequeue the oldest element, or `Error::Empty` if none is present.
    pub fn dequeue(&self) -> Result<T> {
        let guard = Guard::pin();
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            let head_node = unsafe { &*head.ptr() };
            let next = head_node.next.load(Ordering::Acquire);

            if head != self.head.load(Ordering::Acquire) {
                continue;
            }

            if head.ptr() == tail.ptr() {
                if next.is_null() {
                    return Err(Error::Empty);
                }
                let _ = self.tail.compare_exchange_weak(
                    tail,
                    tail.with_ptr(next.ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

            let next_node = unsafe { &*next.ptr() };
            let value = unsafe { ptr::read(next_node.data.as_ptr()) };

            if self
                .head
                .compare_exchange_weak(
                    head,
                    head.with_ptr(next.ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                unsafe { guard.defer_destroy(head.ptr()) };
                return Ok(value);
            }

            // Lost the race: forget the copy we took so `T`'s destructor
            // does not run twice (the winner's reader will read it again).
            std::mem::forget(value);
        }
    }

    /// Debug helper: a best-effort, non-linearizable snapshot of the queue's
    /// current contents, front to back. Not used by any correctness check.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::new();
        let head = self.head.load(Ordering::Acquire);
        let mut curr = unsafe { &*head.ptr() }.next.load(Ordering::Acquire);
        while !curr.is_null() {
            let node = unsafe { &*curr.ptr() };
            out.push(unsafe { (*node.data.as_ptr()).clone() });
            curr = node.next.load(Ordering::Acquire);
        }
        out
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Single-threaded teardown: drain remaining values, then free the
        // last sentinel.
        while self.dequeue().is_ok() {}
        let head = self.head.load(Ordering::Relaxed);
        if !head.is_null() {
            unsafe { drop(Box::from_raw(head.ptr())) };
        } else {
            warn!("queue dropped with a null sentinel; this should be unreachable");
        }
    }
}
