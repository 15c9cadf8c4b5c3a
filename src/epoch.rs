//! Epoch-based memory reclamation for the FIFO queue.
//!
//! The Michael-Scott dequeue step retires the old sentinel node, but a
//! concurrent enqueuer may still be holding a stale `tail` that points at
//! it. Freeing immediately is unsound; deferring
//! the free until every thread that could have observed the old epoch has
//! moved on is what makes it safe. This is a small, crate-local epoch
//! scheme (three epochs: current, previous, grace) rather than a pulled-in
//! crate, because the reclamation need here is narrow (one sentinel node
//! retired per successful dequeue) and the scheme mirrors the technique the
//! rest of this codebase's lock-free module already uses.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr};

use crate::sync::{AtomicUsize, Ordering};

const EPOCH_COUNT: usize = 3;
const MAX_DEFERRED: usize = 256;

static GLOBAL_EPOCH: AtomicUsize = AtomicUsize::new(0);
static PARTICIPANTS: AtomicPtr<Participant> = AtomicPtr::new(ptr::null_mut());

struct Participant {
    epoch: AtomicUsize,
    active: AtomicBool,
    next: AtomicPtr<Participant>,
    deferred: RefCell<[VecDeque<Box<dyn FnOnce() + Send>>; EPOCH_COUNT]>,
    pin_count: Cell<usize>,
}

impl Participant {
    fn new() -> Self {
        Participant {
            epoch: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            next: AtomicPtr::new(ptr::null_mut()),
            deferred: RefCell::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            pin_count: Cell::new(0),
        }
    }

    fn enter(&self) {
        let count = self.pin_count.get();
        self.pin_count.set(count + 1);

        if count == 0 {
            let global = GLOBAL_EPOCH.load(Ordering::Relaxed);
            self.epoch.store(global, Ordering::Relaxed);
            self.active.store(true, Ordering::Release);
        }
    }

    fn leave(&self) {
        let count = self.pin_count.get();
        debug_assert!(count > 0, "unbalanced epoch enter/leave");
        let new_count = count - 1;
        self.pin_count.set(new_count);

        if new_count == 0 {
            self.active.store(false, Ordering::Release);
            self.try_collect();
        }
    }

    fn defer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let epoch = self.epoch.load(Ordering::Relaxed);
        let index = epoch % EPOCH_COUNT;
        self.deferred.borrow_mut()[index].push_back(Box::new(f));

        let total: usize = self.deferred.borrow().iter().map(VecDeque::len).sum();
        if total >= MAX_DEFERRED {
            self.try_advance_epoch();
        }
    }

    fn try_advance_epoch(&self) {
        let global = GLOBAL_EPOCH.load(Ordering::Relaxed);
        if self.can_advance(global) {
            let _ = GLOBAL_EPOCH.compare_exchange(
                global,
                global + 1,
                Ordering::Release,
                Ordering::Relaxed,
            );
        }
    }

    fn can_advance(&self, epoch: usize) -> bool {
        let mut curr = PARTICIPANTS.load(Ordering::Acquire);
        while !curr.is_null() {
            let participant = unsafe { &*curr };
            if participant.active.load(Ordering::Acquire) {
                let p_epoch = participant.epoch.load(Ordering::Relaxed);
                if p_epoch < epoch {
                    return false;
                }
            }
            curr = participant.next.load(Ordering::Acquire);
        }
        true
    }

    fn try_collect(&self) {
        let global = GLOBAL_EPOCH.load(Ordering::Relaxed);
        if global >= 2 {
            let safe_epoch = global - 2;
            let index = safe_epoch % EPOCH_COUNT;
            let mut deferred = self.deferred.borrow_mut();
            while let Some(op) = deferred[index].pop_front() {
                op();
            }
        }
    }

    fn flush(&self) {
        for _ in 0..EPOCH_COUNT {
            self.try_advance_epoch();
        }
        let global = GLOBAL_EPOCH.load(Ordering::Relaxed);
        for epoch in 0..global.saturating_sub(1) {
            let index = epoch % EPOCH_COUNT;
            let mut deferred = self.deferred.borrow_mut();
            while let Some(op) = deferred[index].pop_front() {
                op();
            }
        }
    }
}

impl Drop for Participant {
    fn drop(&mut self) {
        self.flush();
    }
}

fn register_participant() -> &'static Participant {
    thread_local! {
        static PARTICIPANT: Participant = Participant::new();
    }

    PARTICIPANT.with(|p| {
        let p_ptr = p as *const Participant as *mut Participant;
        loop {
            let head = PARTICIPANTS.load(Ordering::Acquire);
            p.next.store(head, Ordering::Relaxed);
            match PARTICIPANTS.compare_exchange_weak(
                head,
                p_ptr,
                Ordering::Release,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }
        unsafe { &*p_ptr }
    })
}

fn current_participant() -> &'static Participant {
    thread_local! {
        static PARTICIPANT: &'static Participant = register_participant();
    }
    PARTICIPANT.with(|p| *p)
}

/// A pin on the current epoch. While a `Guard` is alive, nothing this thread
/// defers through it can be reclaimed, and the grace-period detector treats
/// this thread as potentially observing the epoch it pinned.
pub(crate) struct Guard {
    participant: &'static Participant,
}

impl Guard {
    /// Pin the current thread to the global epoch.
    pub(crate) fn pin() -> Self {
        let participant = current_participant();
        participant.enter();
        Guard { participant }
    }

    /// Defer destruction of a heap-allocated node until no pinned thread can
    /// still observe the epoch it was retired in.
    ///
    /// # Safety
    /// `ptr` must have come from `Box::into_raw` and must not be
    /// dereferenced by the caller after this call.
    pub(crate) unsafe fn defer_destroy<T: Send + 'static>(&self, ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        let ptr = ptr as usize;
        self.participant.defer(move || {
            drop(unsafe { Box::from_raw(ptr as *mut T) });
        });
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.participant.leave();
    }
}
