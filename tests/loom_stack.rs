//! Exhaustive interleaving check of the stack's push/pop CAS loops.
//!
//! Run with `RUSTFLAGS="--cfg loom" cargo test --test loom_stack --release`.
//! Not part of the default `cargo test` run: loom explores every scheduling
//! interleaving of the atomic operations, which is orders of magnitude
//! slower than a normal test and only meaningful when the crate itself was
//! built against `loom`'s atomics (see `src/sync.rs`). Only the stack is
//! modeled here — it has the smallest state space of the three containers
//! (one CAS-based list plus one CAS-based freelist) while still exercising
//! the same tagged-pointer retry pattern the queue and deque share.
#![cfg(loom)]

use knhk_concurrent::Stack;

#[test]
fn two_pushers_two_poppers_never_lose_or_duplicate() {
    loom::model(|| {
        let stack = std::sync::Arc::new(Stack::new(4).unwrap());
        let mut handles = vec![];

        for t in 0..2 {
            let stack = stack.clone();
            handles.push(loom::thread::spawn(move || {
                stack.push(t).unwrap();
            }));
        }
        for _ in 0..2 {
            let stack = stack.clone();
            handles.push(loom::thread::spawn(move || {
                let _ = stack.pop();
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut drained = 0;
        while stack.pop().is_ok() {
            drained += 1;
        }
        assert!(drained <= 2);
    });
}
