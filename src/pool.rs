//! Lock-free bounded memory pool.
//!
//! A fixed-capacity freelist of fixed-size fragments, itself implemented as
//! a Michael-Scott lock-free queue (`alloc` is the MS dequeue, `free` is the
//! MS enqueue) over one contiguous backing allocation. Used by [`crate::deque`]
//! for node storage; exposed directly because the bounded-freelist-of-fragments
//! shape is generically useful, not just a deque implementation detail.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use crossbeam_utils::CachePadded;
use tracing::debug;

use crate::error::{Error, Result};
use crate::sync::{AtomicUsize, Ordering};
use crate::tagged::{Tagged, TaggedPtr};

pub(crate) struct Fragment<T> {
    next: TaggedPtr<Fragment<T>>,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// An opaque handle to one allocated fragment. Only this crate can reach
/// back into the fragment it was carved from.
pub struct PoolSlot<T>(*mut Fragment<T>);

impl<T> Clone for PoolSlot<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for PoolSlot<T> {}

impl<T> PoolSlot<T> {
    pub(crate) fn data_ptr(self) -> *mut T {
        unsafe { (*self.0).data.get() as *mut T }
    }

    pub(crate) fn as_raw(self) -> *mut Fragment<T> {
        self.0
    }

    pub(crate) fn from_raw(ptr: *mut Fragment<T>) -> Self {
        PoolSlot(ptr)
    }
}

impl<T> PartialEq for PoolSlot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for PoolSlot<T> {}

/// Bounded lock-free pool of `capacity` fixed-size fragments, plus one
/// permanent sentinel used purely to anchor the free list's head/tail.
pub struct Pool<T> {
    // index 0 is the sentinel; indices 1..=capacity are the free fragments.
    storage: Box<[Fragment<T>]>,
    head: CachePadded<TaggedPtr<Fragment<T>>>,
    tail: CachePadded<TaggedPtr<Fragment<T>>>,
    freeable: AtomicUsize,
    capacity: usize,
}

unsafe impl<T: Send> Send for Pool<T> {}
unsafe impl<T: Send> Sync for Pool<T> {}

impl<T> Pool<T> {
    /// Allocate a pool able to hand out `capacity` fragments at once.
    /// `capacity == 0` is `Error::InvalidArgument`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument);
        }

        let mut storage: Vec<Fragment<T>> = Vec::with_capacity(capacity + 1);
        for _ in 0..=capacity {
            storage.push(Fragment {
                next: TaggedPtr::null(),
                data: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }
        let storage = storage.into_boxed_slice();

        let sentinel_ptr = &storage[0] as *const Fragment<T> as *mut Fragment<T>;
        let pool = Pool {
            storage,
            head: CachePadded::new(TaggedPtr::new(Tagged::new(sentinel_ptr, 0))),
            tail: CachePadded::new(TaggedPtr::new(Tagged::new(sentinel_ptr, 0))),
            freeable: AtomicUsize::new(0),
            capacity,
        };

        for i in 1..=capacity {
            let frag_ptr = &pool.storage[i] as *const Fragment<T> as *mut Fragment<T>;
            pool.free(PoolSlot::from_raw(frag_ptr));
        }

        Ok(pool)
    }

    /// Hand out one free fragment, or `Error::OutOfMemory` if the pool is
    /// exhausted (only the sentinel remains).
    pub fn alloc(&self) -> Result<PoolSlot<T>> {
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
                    debug!(capacity = self.capacity, "pool exhausted on alloc");
                    return Err(Error::OutOfMemory);
                }
                let _ = self.tail.compare_exchange_weak(
                    tail,
                    tail.with_ptr(next.ptr()),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                continue;
            }

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
                self.freeable.fetch_sub(1, Ordering::Relaxed);
                return Ok(PoolSlot::from_raw(next.ptr()));
            }
        }
    }

    /// Return a fragment previously obtained from `alloc` (or, at
    /// construction, the initial chain of free fragments).
    pub fn free(&self, slot: PoolSlot<T>) {
        let node = slot.as_raw();
        unsafe { (*node).next.store(Tagged::null(0), Ordering::Relaxed) };

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
                    self.freeable.fetch_add(1, Ordering::Relaxed);
                    return;
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

    /// Advisory count of currently-free fragments. Eventually consistent
    /// with the free list, not linearizable with `alloc`/`free`.
    pub fn freeable(&self) -> usize {
        self.freeable.load(Ordering::Relaxed)
    }

    /// Total number of fragments this pool can have in flight at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `slot` was carved from this pool's backing storage.
    pub(crate) fn contains(&self, slot: PoolSlot<T>) -> bool {
        let start = self.storage.as_ptr() as usize;
        let end = start + self.storage.len() * std::mem::size_of::<Fragment<T>>();
        let ptr = slot.as_raw() as usize;
        ptr >= start && ptr < end
    }

    /// Recover the [`PoolSlot`] a live `data_ptr()` was carved from. Used by
    /// callers (the deque) that hand out the bare data pointer and need to
    /// give the fragment back to `free` later without keeping the slot
    /// handle around for the data's whole lifetime.
    pub(crate) fn slot_for(data_ptr: *mut T) -> PoolSlot<T> {
        let offset = std::mem::offset_of!(Fragment<T>, data);
        let frag_ptr = (data_ptr as usize - offset) as *mut Fragment<T>;
        PoolSlot::from_raw(frag_ptr)
    }
}
