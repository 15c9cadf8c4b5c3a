//! End-to-end scenarios exercising the public API as an external crate
//! would, with producers/consumers released together via a `Barrier` so
//! the race windows the unit tests can't reach get real contention.

use knhk_concurrent::{Deque, Error, Queue, Stack};
use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[test]
fn stack_round_trip_scenario() {
    let s = Stack::new(10).unwrap();
    s.push(10).unwrap();
    s.push(20).unwrap();
    assert_eq!(s.pop(), Ok(20));
    s.push(30).unwrap();
    assert_eq!(s.pop(), Ok(30));
    s.push(40).unwrap();
    assert_eq!(s.pop(), Ok(40));
    assert_eq!(s.pop(), Ok(10));
    s.push(50).unwrap();
    assert_eq!(s.pop(), Ok(50));
    assert_eq!(s.pop(), Err(Error::Empty));
}

#[test]
fn deque_four_corner_scenario() {
    let d = Deque::new(10).unwrap();
    d.push_front(2).unwrap();
    d.push_back(3).unwrap();
    d.push_front(1).unwrap();
    d.push_back(4).unwrap();
    assert_eq!(d.snapshot(), vec![1, 2, 3, 4]);

    assert_eq!(d.pop_front(), Ok(1));
    assert_eq!(d.pop_back(), Ok(4));
    assert_eq!(d.pop_back(), Ok(3));
    assert_eq!(d.pop_front(), Ok(2));
    assert_eq!(d.pop_front(), Err(Error::Empty));
}

#[test]
fn stack_push_beyond_capacity_leaves_it_usable() {
    let s = Stack::new(3).unwrap();
    for i in 0..3 {
        s.push(i).unwrap();
    }
    assert_eq!(s.push(99), Err(Error::OutOfMemory));
    assert_eq!(s.pop(), Ok(2));
    s.push(99).unwrap();
    assert_eq!(s.pop(), Ok(99));
}

#[test]
fn queue_barrier_synchronized_producers_no_lost_no_duplicate() {
    // Four producers enqueueing disjoint ranges, barrier-synchronized so
    // every producer starts racing at the same instant rather than
    // serializing through scheduler luck; drain and assert no lost or
    // duplicate values.
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u32 = 5_000;
    let total = PRODUCERS as u32 * PER_PRODUCER;

    let queue: Arc<Queue<u32>> = Arc::new(Queue::new());
    let barrier = Arc::new(Barrier::new(PRODUCERS));
    let mut handles = vec![];

    for t in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..PER_PRODUCER {
                queue.enqueue(t as u32 * PER_PRODUCER + i).unwrap();
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let mut seen = HashSet::new();
    for _ in 0..total {
        let v = queue.dequeue().expect("expected every produced value");
        assert!(seen.insert(v), "duplicate value {v}");
    }
    assert_eq!(queue.dequeue(), Err(Error::Empty));
    assert_eq!(seen.len(), total as usize);
}

#[test]
fn stack_barrier_synchronized_pushers_and_poppers_cover_full_range() {
    // Four pushers and four poppers, barrier-synchronized, each pusher
    // pushing a disjoint range; every popped value lands in a shared
    // presence set that must cover the full range once everything drains.
    const PUSHERS: u32 = 4;
    const PER_THREAD: u32 = 5_000;
    let total = PUSHERS * PER_THREAD;

    let stack: Arc<Stack<u32>> = Arc::new(Stack::new(total as usize).unwrap());
    let barrier = Arc::new(Barrier::new((PUSHERS * 2) as usize));
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let mut handles = vec![];

    for t in 0..PUSHERS {
        let stack = Arc::clone(&stack);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            for i in 0..PER_THREAD {
                stack.push(t * PER_THREAD + i).unwrap();
            }
        }));
    }
    for _ in 0..PUSHERS {
        let stack = Arc::clone(&stack);
        let seen = Arc::clone(&seen);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut popped = 0;
            while popped < PER_THREAD {
                if let Ok(v) = stack.pop() {
                    seen.lock().unwrap().insert(v);
                    popped += 1;
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    while let Ok(v) = stack.pop() {
        seen.lock().unwrap().insert(v);
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), total as usize);
    for v in 0..total {
        assert!(seen.contains(&v));
    }
}

#[test]
fn deque_barrier_synchronized_four_way_mix() {
    // One push_front thread, one push_back thread, one pop_front thread,
    // one pop_back thread, all released together at a barrier.
    const N: u32 = 8_000;
    let deque: Arc<Deque<u32>> = Arc::new(Deque::new((2 * N) as usize).unwrap());
    for i in 0..N {
        deque.push_front(i).unwrap();
        deque.push_back(N + i).unwrap();
    }

    let barrier = Arc::new(Barrier::new(3));
    let popped = Arc::new(Mutex::new(Vec::new()));
    let mut handles = vec![];

    {
        let deque = Arc::clone(&deque);
        let barrier = Arc::clone(&barrier);
        let popped = Arc::clone(&popped);
        handles.push(thread::spawn(move || {
            barrier.wait();
            while let Ok(v) = deque.pop_front() {
                popped.lock().unwrap().push(v);
            }
        }));
    }
    {
        let deque = Arc::clone(&deque);
        let barrier = Arc::clone(&barrier);
        let popped = Arc::clone(&popped);
        handles.push(thread::spawn(move || {
            barrier.wait();
            while let Ok(v) = deque.pop_back() {
                popped.lock().unwrap().push(v);
            }
        }));
    }
    {
        let deque = Arc::clone(&deque);
        let barrier = Arc::clone(&barrier);
        handles.push(thread::spawn(move || {
            barrier.wait();
            // Every slot is already occupied; pushes race the drain above
            // and legitimately see transient OutOfMemory.
            for i in 0..N {
                let _ = deque.push_back(2 * N + i);
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
    let distinct: HashSet<_> = popped.iter().copied().collect();
    assert_eq!(distinct.len(), popped.len(), "no value observed twice");
    for v in 0..(2 * N) {
        assert!(distinct.contains(&v), "original value {v} was not lost");
    }
}
