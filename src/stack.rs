//! Treiber-style lock-free LIFO stack with a bounded, pre-allocated freelist.
//!
//! The stack never calls into the system allocator after construction: both
//! the live stack (`head`) and the pool of unused slots (`free`) are
//! tagged-pointer lists threaded through one `Box<[Node<T>]>` allocation, so
//! there is no concurrent-reclamation problem to solve — a node is always on
//! exactly one of the two lists, never freed while the stack is alive.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use crossbeam_utils::CachePadded;

use crate::error::{Error, Result};
use crate::sync::{AtomicUsize, Ordering};
use crate::tagged::{Tagged, TaggedPtr};

struct Node<T> {
    next: TaggedPtr<Node<T>>,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded, multi-producer multi-consumer LIFO stack.
///
/// Capacity is fixed at construction; `push` past capacity returns
/// `Error::OutOfMemory` rather than growing.
pub struct Stack<T> {
    storage: Box<[Node<T>]>,
    // `head` (the live stack) and `free` (the freelist) are CAS'd by every
    // push/pop; padding them apart keeps push from bouncing pop's cache line.
    head: CachePadded<TaggedPtr<Node<T>>>,
    free: CachePadded<TaggedPtr<Node<T>>>,
    size: AtomicUsize,
    capacity: usize,
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

fn pop_list<T>(list: &TaggedPtr<Node<T>>) -> Option<*mut Node<T>> {
    loop {
        let top = list.load(Ordering::Acquire);
        if top.is_null() {
            return None;
        }
        let top_node = unsafe { &*top.ptr() };
        let next = top_node.next.load(Ordering::Acquire);
        let desired = top.with_ptr(next.ptr());
        if list
            .compare_exchange_weak(top, desired, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return Some(top.ptr());
        }
    }
}

fn push_list<T>(list: &TaggedPtr<Node<T>>, node: *mut Node<T>) {
    loop {
        let top = list.load(Ordering::Acquire);
        unsafe { (*node).next.store(top, Ordering::Relaxed) };
        let desired = top.with_ptr(node);
        if list
            .compare_exchange_weak(top, desired, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }
    }
}

impl<T> Stack<T> {
    /// Create a stack that can hold up to `capacity` live elements.
    /// `capacity == 0` is `Error::InvalidArgument`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument);
        }

        let mut storage: Vec<Node<T>> = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            storage.push(Node {
                next: TaggedPtr::null(),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }
        let storage = storage.into_boxed_slice();

        // Thread every slot onto the free list: slot i -> slot i+1 -> ... -> null.
        for i in 0..capacity {
            let next_ptr = if i + 1 < capacity {
                &storage[i + 1] as *const Node<T> as *mut Node<T>
            } else {
                std::ptr::null_mut()
            };
            storage[i].next.store(Tagged::new(next_ptr, 0), Ordering::Relaxed);
        }

        let free_head = if capacity > 0 {
            &storage[0] as *const Node<T> as *mut Node<T>
        } else {
            std::ptr::null_mut()
        };

        Ok(Stack {
            storage,
            head: CachePadded::new(TaggedPtr::null()),
            free: CachePadded::new(TaggedPtr::new(Tagged::new(free_head, 0))),
            size: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Number of live elements. Advisory: may be stale the instant it is
    /// read under concurrent mutation.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// `true` if `len() == 0` at the moment of the call.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of live elements this stack can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push `value`. Returns `Error::OutOfMemory` if every slot is already
    /// live.
    pub fn push(&self, value: T) -> Result<()> {
        let node = pop_list(&self.free).ok_or(Error::OutOfMemory)?;
        unsafe { (*(*node).data.get()).write(value) };
        push_list(&self.head, node);
        self.size.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pop the most recently pushed value, or `Error::Empty`.
    pub fn pop(&self) -> Result<T> {
        let node = pop_list(&self.head).ok_or(Error::Empty)?;
        self.size.fetch_sub(1, Ordering::Relaxed);
        let value = unsafe { (*(*node).data.get()).assume_init_read() };
        push_list(&self.free, node);
        Ok(value)
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        while self.pop().is_ok() {}
    }
}
