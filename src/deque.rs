//! Sundell-Tsigas lock-free doubly-linked deque.
//!
//! Every node carries an atomic reference count: a node stays alive as long
//! as either the live list or some in-flight helper routine holds a
//! reference to it. Deletions mark a node's own `next` link first (the
//! linearization point for `pop_front`/`pop_back`), then physically unlink it
//! via `help_delete`, then break the dangling `prev`/`next` edges it leaves
//! behind via `remove_cross_reference` once no concurrent helper can still
//! reach it through them. Node storage comes from [`crate::pool`] rather than
//! the system allocator, so the deque never frees or allocates after
//! construction.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr;

use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::sync::{AtomicU32, AtomicUsize, Ordering};

const MARK_BIT: usize = 1;

/// An unpacked `(pointer, deletion-mark)` pair for one `prev`/`next` edge.
struct LinkVal<T> {
    ptr: *mut DequeNode<T>,
    mark: bool,
}

impl<T> Clone for LinkVal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for LinkVal<T> {}

impl<T> PartialEq for LinkVal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr && self.mark == other.mark
    }
}

impl<T> LinkVal<T> {
    fn new(ptr: *mut DequeNode<T>, mark: bool) -> Self {
        LinkVal { ptr, mark }
    }

    fn null() -> Self {
        LinkVal::new(ptr::null_mut(), false)
    }

    fn pack(self) -> usize {
        debug_assert!(
            (self.ptr as usize) & MARK_BIT == 0,
            "deque node is not even 2-byte aligned; the mark bit has nowhere to live"
        );
        (self.ptr as usize) | (self.mark as usize)
    }

    fn unpack(word: usize) -> Self {
        let mark = word & MARK_BIT != 0;
        let ptr = (word & !MARK_BIT) as *mut DequeNode<T>;
        LinkVal::new(ptr, mark)
    }
}

/// Atomic packed `(pointer, deletion-mark)` edge.
struct LinkWord<T> {
    packed: AtomicUsize,
    _marker: PhantomData<*mut DequeNode<T>>,
}

impl<T> LinkWord<T> {
    fn new(value: LinkVal<T>) -> Self {
        LinkWord {
            packed: AtomicUsize::new(value.pack()),
            _marker: PhantomData,
        }
    }

    fn null() -> Self {
        LinkWord::new(LinkVal::null())
    }

    fn load(&self, order: Ordering) -> LinkVal<T> {
        LinkVal::unpack(self.packed.load(order))
    }

    fn store(&self, value: LinkVal<T>, order: Ordering) {
        self.packed.store(value.pack(), order);
    }

    fn compare_exchange_weak(
        &self,
        expected: LinkVal<T>,
        new: LinkVal<T>,
        success: Ordering,
        failure: Ordering,
    ) -> std::result::Result<LinkVal<T>, LinkVal<T>> {
        self.packed
            .compare_exchange_weak(expected.pack(), new.pack(), success, failure)
            .map(LinkVal::unpack)
            .map_err(LinkVal::unpack)
    }
}

struct DequeNode<T> {
    prev: LinkWord<T>,
    next: LinkWord<T>,
    ref_count: AtomicU32,
    data: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded, multi-producer multi-consumer doubly-linked deque: push/pop at
/// either end in O(1) amortized steps with no locks.
///
/// Capacity counts live user elements; it does not include the two
/// permanent sentinel nodes (`head`, `tail`) the deque allocates from its
/// own pool at construction and never returns.
pub struct Deque<T> {
    pool: Pool<DequeNode<T>>,
    head: *mut DequeNode<T>,
    tail: *mut DequeNode<T>,
}

unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T> Deque<T> {
    /// Create a deque that can hold up to `capacity` live elements.
    /// `capacity == 0` is `Error::InvalidArgument`.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument);
        }

        let pool = Pool::new(capacity + 2)?;
        let head = pool.alloc()?.data_ptr();
        let tail = pool.alloc()?.data_ptr();

        // head.prev and tail.next are never traversed by any operation, so
        // they are left null rather than made to point at themselves.
        unsafe {
            ptr::write(
                head,
                DequeNode {
                    prev: LinkWord::null(),
                    next: LinkWord::new(LinkVal::new(tail, false)),
                    ref_count: AtomicU32::new(1),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                },
            );
            ptr::write(
                tail,
                DequeNode {
                    prev: LinkWord::new(LinkVal::new(head, false)),
                    next: LinkWord::null(),
                    ref_count: AtomicU32::new(1),
                    data: UnsafeCell::new(MaybeUninit::uninit()),
                },
            );
        }

        Ok(Deque { pool, head, tail })
    }

    /// Maximum number of live user elements this deque can hold.
    pub fn capacity(&self) -> usize {
        self.pool.capacity() - 2
    }

    /// Push `value` onto the front of the deque.
    pub fn push_front(&self, value: T) -> Result<()> {
        let node = self.create_node(value)?;
        let prev = self.copy(self.head);
        let mut next = self.deref_live(&unsafe { &*prev }.next);

        loop {
            let prev_ref = unsafe { &*prev };
            let prev_next = prev_ref.next.load(Ordering::Acquire);
            if prev_next.ptr != next || prev_next.mark {
                self.release(next);
                next = self.deref_live(&prev_ref.next);
                continue;
            }

            let node_ref = unsafe { &*node };
            node_ref.prev.store(LinkVal::new(prev, false), Ordering::Relaxed);
            node_ref.next.store(LinkVal::new(next, false), Ordering::Relaxed);

            if prev_ref
                .next
                .compare_exchange_weak(
                    LinkVal::new(next, false),
                    LinkVal::new(node, false),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.copy(node);
                break;
            }
        }

        self.push_common(node, next);
        Ok(())
    }

    /// Push `value` onto the back of the deque.
    pub fn push_back(&self, value: T) -> Result<()> {
        let node = self.create_node(value)?;
        let next = self.copy(self.tail);
        let mut prev = self.deref_live(&unsafe { &*next }.prev);

        loop {
            let prev_ref = unsafe { &*prev };
            let prev_next = prev_ref.next.load(Ordering::Acquire);
            if prev_next.ptr != next || prev_next.mark {
                prev = self.help_insert(prev, next);
                continue;
            }

            let node_ref = unsafe { &*node };
            node_ref.prev.store(LinkVal::new(prev, false), Ordering::Relaxed);
            node_ref.next.store(LinkVal::new(next, false), Ordering::Relaxed);

            if prev_ref
                .next
                .compare_exchange_weak(
                    LinkVal::new(next, false),
                    LinkVal::new(node, false),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.copy(node);
                break;
            }
        }

        self.push_common(node, next);
        Ok(())
    }

    /// Pop the frontmost element, or `Error::Empty`.
    pub fn pop_front(&self) -> Result<T> {
        let mut prev = self.copy(self.head);
        let node;

        loop {
            let candidate = self.deref_live(&unsafe { &*prev }.next);
            if candidate == self.tail {
                self.release(candidate);
                self.release(prev);
                return Err(Error::Empty);
            }

            let candidate_ref = unsafe { &*candidate };
            let link1 = candidate_ref.next.load(Ordering::Acquire);
            if link1.mark {
                self.help_delete(candidate);
                self.release(candidate);
                continue;
            }

            if candidate_ref
                .next
                .compare_exchange_weak(
                    link1,
                    LinkVal::new(link1.ptr, true),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.help_delete(candidate);
                let next = self.deref_link_ignoring_mark(&candidate_ref.next);
                prev = self.help_insert(prev, next);
                self.release(prev);
                self.release(next);
                node = candidate;
                break;
            }
            self.release(candidate);
        }

        let value = unsafe { (*(*node).data.get()).assume_init_read() };
        self.remove_cross_reference(node);
        self.release(node);
        Ok(value)
    }

    /// Pop the backmost element, or `Error::Empty`.
    pub fn pop_back(&self) -> Result<T> {
        let next = self.copy(self.tail);
        let mut node = self.deref_live(&unsafe { &*next }.prev);

        loop {
            let node_ref = unsafe { &*node };
            let node_next = node_ref.next.load(Ordering::Acquire);
            if node_next.ptr != next || node_next.mark {
                node = self.help_insert(node, next);
                continue;
            }

            if node == self.head {
                self.release(node);
                self.release(next);
                return Err(Error::Empty);
            }

            if node_ref
                .next
                .compare_exchange_weak(
                    LinkVal::new(next, false),
                    LinkVal::new(next, true),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.help_delete(node);
                let prev = self.deref_link_ignoring_mark(&node_ref.prev);
                let prev = self.help_insert(prev, next);
                self.release(prev);
                self.release(next);
                break;
            }
        }

        let value = unsafe { (*(*node).data.get()).assume_init_read() };
        self.remove_cross_reference(node);
        self.release(node);
        Ok(value)
    }

    /// Debug helper: a best-effort, non-linearizable snapshot of the
    /// deque's current contents, front to back.
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::new();
        let mut curr = unsafe { &*self.head }.next.load(Ordering::Acquire).ptr;
        while curr != self.tail {
            let node_ref = unsafe { &*curr };
            out.push(unsafe { (*node_ref.data.get()).assume_init_ref().clone() });
            curr = node_ref.next.load(Ordering::Acquire).ptr;
        }
        out
    }

    fn create_node(&self, value: T) -> Result<*mut DequeNode<T>> {
        let ptr = self.pool.alloc()?.data_ptr();
        unsafe {
            ptr::write(
                ptr,
                DequeNode {
                    prev: LinkWord::null(),
                    next: LinkWord::null(),
                    ref_count: AtomicU32::new(0),
                    data: UnsafeCell::new(MaybeUninit::new(value)),
                },
            );
        }
        Ok(ptr)
    }

    /// `DEREF`: follow a link, returning `None` if it is marked for
    /// deletion, and bumping the target's reference count otherwise.
    fn deref_link(&self, link: &LinkWord<T>) -> Option<*mut DequeNode<T>> {
        let val = link.load(Ordering::Acquire);
        if val.mark {
            None
        } else {
            unsafe { &*val.ptr }.ref_count.fetch_add(1, Ordering::AcqRel);
            Some(val.ptr)
        }
    }

    /// `DEREF_D`: follow a link regardless of its deletion mark.
    fn deref_link_ignoring_mark(&self, link: &LinkWord<T>) -> *mut DequeNode<T> {
        let val = link.load(Ordering::Acquire);
        unsafe { &*val.ptr }.ref_count.fetch_add(1, Ordering::AcqRel);
        val.ptr
    }

    /// `DEREF` on a link that by construction is never marked for deletion
    /// (the predecessor sentinel's own outgoing edge). Retries rather than
    /// panicking if that invariant is ever violated.
    fn deref_live(&self, link: &LinkWord<T>) -> *mut DequeNode<T> {
        loop {
            if let Some(node) = self.deref_link(link) {
                return node;
            }
        }
    }

    /// `COPY`: take an additional owned reference to an already-reachable
    /// node.
    fn copy(&self, node: *mut DequeNode<T>) -> *mut DequeNode<T> {
        unsafe { &*node }.ref_count.fetch_add(1, Ordering::AcqRel);
        node
    }

    /// `REL`: drop one owned reference. At zero, releases the node's own
    /// `prev`/`next` edges (which are themselves owned references) and
    /// returns the node's storage to the pool. The two permanent sentinels
    /// carry a baseline reference from construction that is never released,
    /// so they never reach this path.
    fn release(&self, node: *mut DequeNode<T>) {
        let node_ref = unsafe { &*node };
        if node_ref.ref_count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let prev = node_ref.prev.load(Ordering::Acquire).ptr;
        let next = node_ref.next.load(Ordering::Acquire).ptr;
        if !prev.is_null() {
            self.release(prev);
        }
        if !next.is_null() {
            self.release(next);
        }
        self.pool.free(Pool::slot_for(node));
    }

    fn mark_prev(&self, node: *mut DequeNode<T>) {
        loop {
            let node_ref = unsafe { &*node };
            let link1 = node_ref.prev.load(Ordering::Acquire);
            if link1.mark {
                return;
            }
            if node_ref
                .prev
                .compare_exchange_weak(
                    link1,
                    LinkVal::new(link1.ptr, true),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
    }

    /// Walks `prev` forward until it is a direct, consistent predecessor of
    /// `node`, physically relinking past any nodes it finds already marked
    /// for deletion along the way. Consumes the caller's reference on
    /// `prev`; returns a newly-owned reference to the resulting predecessor.
    /// `node` is a borrowed pointer the caller still owns separately.
    fn help_insert(&self, prev: *mut DequeNode<T>, node: *mut DequeNode<T>) -> *mut DequeNode<T> {
        let mut prev = prev;
        let mut last: Option<*mut DequeNode<T>> = None;

        loop {
            let prev_ref = unsafe { &*prev };
            let prev2 = match self.deref_link(&prev_ref.next) {
                Some(p) => p,
                None => {
                    if let Some(last_node) = last {
                        self.mark_prev(prev);
                        let next2 = self.deref_link_ignoring_mark(&prev_ref.next);
                        let last_ref = unsafe { &*last_node };
                        if last_ref
                            .next
                            .compare_exchange_weak(
                                LinkVal::new(prev, false),
                                LinkVal::new(next2, false),
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            self.release(prev);
                        } else {
                            self.release(next2);
                        }
                        self.release(prev);
                        prev = last_node;
                        last = None;
                    } else {
                        let prev2 = self.deref_link_ignoring_mark(&prev_ref.prev);
                        self.release(prev);
                        prev = prev2;
                    }
                    continue;
                }
            };

            let link1 = unsafe { &*node }.prev.load(Ordering::Acquire);
            if link1.mark {
                self.release(prev2);
                break;
            }

            if prev2 != node {
                if let Some(last_node) = last {
                    self.release(last_node);
                }
                last = Some(prev);
                prev = prev2;
                continue;
            }
            self.release(prev2);

            if link1.ptr == prev {
                break;
            }

            let prev_next_ptr = prev_ref.next.load(Ordering::Acquire).ptr;
            if prev_next_ptr == node
                && unsafe { &*node }
                    .prev
                    .compare_exchange_weak(
                        link1,
                        LinkVal::new(prev, false),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
            {
                self.copy(prev);
                self.release(link1.ptr);
                if !unsafe { &*prev }.prev.load(Ordering::Acquire).mark {
                    break;
                }
            }
        }

        if let Some(last_node) = last {
            self.release(last_node);
        }
        prev
    }

    /// Physically unlinks `node`, whose `next` edge is already marked for
    /// deletion, from its predecessor. Consumes no references; `node` is
    /// borrowed throughout.
    fn help_delete(&self, node: *mut DequeNode<T>) {
        self.mark_prev(node);

        let mut last: Option<*mut DequeNode<T>> = None;
        let mut prev = self.deref_link_ignoring_mark(&unsafe { &*node }.prev);
        let mut next = self.deref_link_ignoring_mark(&unsafe { &*node }.next);

        loop {
            if prev == next {
                break;
            }

            let next_ref = unsafe { &*next };
            if next_ref.next.load(Ordering::Acquire).mark {
                self.mark_prev(next);
                let next2 = self.deref_link_ignoring_mark(&next_ref.next);
                self.release(next);
                next = next2;
                continue;
            }

            let prev_ref = unsafe { &*prev };
            let prev2 = match self.deref_link(&prev_ref.next) {
                Some(p) => p,
                None => {
                    if let Some(last_node) = last {
                        self.mark_prev(prev);
                        let next2 = self.deref_link_ignoring_mark(&prev_ref.next);
                        let last_ref = unsafe { &*last_node };
                        if last_ref
                            .next
                            .compare_exchange_weak(
                                LinkVal::new(prev, false),
                                LinkVal::new(next2, false),
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            self.release(prev);
                        } else {
                            self.release(next2);
                        }
                        self.release(prev);
                        prev = last_node;
                        last = None;
                    } else {
                        let prev2 = self.deref_link_ignoring_mark(&prev_ref.prev);
                        self.release(prev);
                        prev = prev2;
                    }
                    continue;
                }
            };

            if prev2 != node {
                if let Some(last_node) = last {
                    self.release(last_node);
                }
                last = Some(prev);
                prev = prev2;
                continue;
            }
            self.release(prev2);

            if prev_ref
                .next
                .compare_exchange_weak(
                    LinkVal::new(node, false),
                    LinkVal::new(next, false),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.copy(next);
                self.release(node);
                break;
            }
        }

        if let Some(last_node) = last {
            self.release(last_node);
        }
        self.release(prev);
        self.release(next);
    }

    /// Once `node` has been physically unlinked, its `prev`/`next` fields
    /// may still point at other nodes that are themselves now unreachable
    /// except through `node`. Walks both edges forward past any such
    /// already-deleted neighbors so `node`'s own release can proceed without
    /// pinning them alive forever.
    fn remove_cross_reference(&self, node: *mut DequeNode<T>) {
        loop {
            let node_ref = unsafe { &*node };

            let prev = node_ref.prev.load(Ordering::Acquire).ptr;
            let prev_ref = unsafe { &*prev };
            if prev_ref.prev.load(Ordering::Acquire).mark {
                let prev2 = self.deref_link_ignoring_mark(&prev_ref.prev);
                node_ref.prev.store(LinkVal::new(prev2, true), Ordering::Release);
                self.release(prev);
                continue;
            }

            let next = node_ref.next.load(Ordering::Acquire).ptr;
            let next_ref = unsafe { &*next };
            if next_ref.prev.load(Ordering::Acquire).mark {
                let next2 = self.deref_link_ignoring_mark(&next_ref.next);
                node_ref.next.store(LinkVal::new(next2, true), Ordering::Release);
                self.release(next);
                continue;
            }

            break;
        }
    }

    fn push_common(&self, node: *mut DequeNode<T>, next: *mut DequeNode<T>) {
        loop {
            let next_ref = unsafe { &*next };
            let link1 = next_ref.prev.load(Ordering::Acquire);
            let node_ref = unsafe { &*node };
            let node_next = node_ref.next.load(Ordering::Acquire);
            if link1.mark || node_next.ptr != next || node_next.mark {
                break;
            }
            if next_ref
                .prev
                .compare_exchange_weak(
                    link1,
                    LinkVal::new(node, false),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.copy(node);
                self.release(link1.ptr);
                if node_ref.prev.load(Ordering::Acquire).mark {
                    let prev2 = self.copy(node);
                    let prev2 = self.help_insert(prev2, next);
                    self.release(prev2);
                }
                break;
            }
        }
        self.release(next);
        self.release(node);
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        // Single-threaded teardown: drain remaining values so their
        // destructors run. The sentinels and the freed node fragments are
        // then reclaimed in bulk when `self.pool`'s own storage drops.
        while self.pop_front().is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn zero_capacity_is_invalid() {
        assert_eq!(Deque::<i32>::new(0).unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn push_front_pop_front_is_lifo() {
        let d = Deque::new(10).unwrap();
        d.push_front(1).unwrap();
        d.push_front(2).unwrap();
        d.push_front(3).unwrap();
        assert_eq!(d.pop_front(), Ok(3));
        assert_eq!(d.pop_front(), Ok(2));
        assert_eq!(d.pop_front(), Ok(1));
        assert_eq!(d.pop_front(), Err(Error::Empty));
    }

    #[test]
    fn push_back_pop_back_is_lifo() {
        let d = Deque::new(10).unwrap();
        d.push_back(1).unwrap();
        d.push_back(2).unwrap();
        d.push_back(3).unwrap();
        assert_eq!(d.pop_back(), Ok(3));
        assert_eq!(d.pop_back(), Ok(2));
        assert_eq!(d.pop_back(), Ok(1));
        assert_eq!(d.pop_back(), Err(Error::Empty));
    }

    #[test]
    fn four_corner_scenario() {
        // Push both ends, pop both ends, interleaved.
        let d = Deque::new(10).unwrap();
        d.push_front(2).unwrap(); // [2]
        d.push_back(3).unwrap(); // [2, 3]
        d.push_front(1).unwrap(); // [1, 2, 3]
        d.push_back(4).unwrap(); // [1, 2, 3, 4]
        assert_eq!(d.snapshot(), vec![1, 2, 3, 4]);

        assert_eq!(d.pop_front(), Ok(1)); // [2, 3, 4]
        assert_eq!(d.pop_back(), Ok(4)); // [2, 3]
        assert_eq!(d.pop_back(), Ok(3)); // [2]
        assert_eq!(d.pop_front(), Ok(2)); // []
        assert_eq!(d.pop_front(), Err(Error::Empty));
        assert_eq!(d.pop_back(), Err(Error::Empty));
    }

    #[test]
    fn push_beyond_capacity_is_out_of_memory() {
        let d = Deque::new(2).unwrap();
        d.push_back(1).unwrap();
        d.push_back(2).unwrap();
        assert_eq!(d.push_back(3), Err(Error::OutOfMemory));
        assert_eq!(d.pop_front(), Ok(1));
        d.push_back(3).unwrap();
        assert_eq!(d.snapshot(), vec![2, 3]);
    }

    #[test]
    fn drop_runs_live_element_destructors_only() {
        static DROPS: StdAtomicUsize = StdAtomicUsize::new(0);
        struct D;
        impl Drop for D {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }
        {
            let d = Deque::new(4).unwrap();
            d.push_back(D).unwrap();
            d.push_back(D).unwrap();
            let _ = d.pop_front().unwrap();
        }
        assert_eq!(DROPS.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn parallel_push_front_and_push_back_cover_full_range() {
        const PER_THREAD: u32 = 2_000;
        let total = PER_THREAD * 2;
        let deque = Arc::new(Deque::new(total as usize).unwrap());

        let front = {
            let deque = Arc::clone(&deque);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    deque.push_front(i).unwrap();
                }
            })
        };
        let back = {
            let deque = Arc::clone(&deque);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    deque.push_back(PER_THREAD + i).unwrap();
                }
            })
        };
        front.join().unwrap();
        back.join().unwrap();

        let mut seen = std::collections::HashSet::new();
        while let Ok(v) = deque.pop_front() {
            assert!(seen.insert(v), "duplicate value {v}");
        }
        assert_eq!(seen.len(), total as usize);
        for v in 0..total {
            assert!(seen.contains(&v));
        }
    }

    #[test]
    fn parallel_mixed_ends_scenario() {
        // One push_front thread, one push_back thread, one pop_front
        // thread, one pop_back thread, all racing.
        const N: u32 = 3_000;
        let deque = Arc::new(Deque::new((2 * N) as usize).unwrap());
        let popped = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..N {
            deque.push_front(i).unwrap();
            deque.push_back(N + i).unwrap();
        }

        let mut handles = vec![];
        for _ in 0..2 {
            let deque = Arc::clone(&deque);
            let popped = Arc::clone(&popped);
            handles.push(thread::spawn(move || {
                for _ in 0..N {
                    if let Ok(v) = deque.pop_front() {
                        popped.lock().unwrap().push(v);
                    }
                }
            }));
        }
        {
            let deque = Arc::clone(&deque);
            let popped = Arc::clone(&popped);
            handles.push(thread::spawn(move || {
                while let Ok(v) = deque.pop_back() {
                    popped.lock().unwrap().push(v);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        while let Ok(v) = deque.pop_front() {
            popped.lock().unwrap().push(v);
        }

        let popped = popped.lock().unwrap();
        let distinct: std::collections::HashSet<_> = popped.iter().copied().collect();
        assert_eq!(distinct.len(), (2 * N) as usize);
        assert_eq!(popped.len(), (2 * N) as usize);
    }

    #[test]
    fn no_reference_count_leak_across_many_operations() {
        // Every node that goes through a full push+pop cycle must return to
        // the pool; if reference counting leaked, the pool would run out
        // well before `capacity` rounds, and a stranded reference (rather
        // than a dropped node) would leave `freeable()` permanently short
        // of `capacity()` even though `snapshot()` still reads empty.
        let d: Deque<u32> = Deque::new(4).unwrap();
        for round in 0..10_000u32 {
            d.push_back(round).unwrap();
            d.push_front(round).unwrap();
            assert!(d.pop_back().is_ok());
            assert!(d.pop_front().is_ok());
        }
        assert_eq!(d.snapshot(), Vec::<u32>::new());
        // Two of the pool's fragments are the deque's own permanent head/tail
        // sentinels and are never returned, so full capacity means
        // `pool.capacity() - 2`, i.e. every live-element slot free again.
        assert_eq!(d.pool.freeable(), d.pool.capacity() - 2);
    }
}
