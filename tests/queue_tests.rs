//! Tests for the lock-free index queues and capacity resizing

use std::sync::Arc;
use std::thread;

use floe::{IndexQueue, ResizableIndexQueue};

#[test]
fn test_spsc_fifo_roundtrip() {
    let queue = IndexQueue::new(16);
    for value in 0..10 {
        assert!(queue.try_push(value).is_ok());
    }
    for value in 0..10 {
        assert_eq!(queue.try_pop(), Some(value));
    }
    assert_eq!(queue.try_pop(), None);
}

#[test]
fn test_resizable_grows_from_zero() {
    let queue = ResizableIndexQueue::new(10, 0);
    assert_eq!(queue.capacity(), 0);

    assert!(queue.set_capacity(5));
    for value in 0..5 {
        assert!(queue.try_push(value).is_ok(), "push {} must fit", value);
    }
    assert_eq!(queue.try_push(5), Err(5));

    for value in 0..5 {
        assert_eq!(queue.try_pop(), Some(value));
    }
}

#[test]
fn test_resizable_shrink_hands_out_oldest_first() {
    let queue = ResizableIndexQueue::with_max_capacity(10);
    for value in 0..10 {
        assert!(queue.try_push(value).is_ok());
    }

    let mut removed = Vec::new();
    assert!(queue.set_capacity_with(5, |value| removed.push(value)));

    assert_eq!(removed, vec![0, 1, 2, 3, 4]);
    for value in 5..10 {
        assert_eq!(queue.try_pop(), Some(value));
    }
    assert_eq!(queue.try_pop(), None);
}

#[test]
fn test_shrink_handler_runs_exactly_surplus_times() {
    let queue = ResizableIndexQueue::with_max_capacity(8);
    for value in 0..6 {
        assert!(queue.try_push(value).is_ok());
    }

    let mut calls = 0;
    assert!(queue.set_capacity_with(2, |_| calls += 1));
    assert_eq!(calls, 4);
    assert_eq!(queue.len(), 2);
}

#[test]
fn test_resize_to_same_capacity_is_invisible() {
    let queue = ResizableIndexQueue::with_max_capacity(8);
    for value in 0..4 {
        assert!(queue.try_push(value).is_ok());
    }

    assert!(queue.set_capacity(queue.capacity()));
    assert_eq!(queue.len(), 4);
    for value in 0..4 {
        assert_eq!(queue.try_pop(), Some(value));
    }
}

#[test]
fn test_interleaved_resize_and_traffic() {
    let queue = ResizableIndexQueue::with_max_capacity(10);
    let half = 5;

    assert!(queue.set_capacity(half));
    let mut value = 0;
    while queue.try_push(value).is_ok() {
        value += 1;
    }
    assert_eq!(value as usize, half);

    // Growing back re-enables the idle slots without touching content.
    assert!(queue.set_capacity(10));
    assert_eq!(queue.len(), half);
    while queue.try_push(value).is_ok() {
        value += 1;
    }
    assert_eq!(value, 10);

    for expected in 0..10 {
        assert_eq!(queue.try_pop(), Some(expected));
    }
}

#[test]
fn test_concurrent_push_pop_with_resizes() {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    let queue = Arc::new(ResizableIndexQueue::with_max_capacity(64));
    let total: u32 = 20_000;
    let removed = Arc::new(AtomicU32::new(0));
    let producer_done = Arc::new(AtomicBool::new(false));
    let resizer_done = Arc::new(AtomicBool::new(false));

    let producer = {
        let queue = Arc::clone(&queue);
        let done = Arc::clone(&producer_done);
        thread::spawn(move || {
            for i in 0..total {
                let mut value = i;
                loop {
                    match queue.try_push(value) {
                        Ok(()) => break,
                        Err(v) => {
                            value = v;
                            thread::yield_now();
                        }
                    }
                }
            }
            done.store(true, Ordering::Release);
        })
    };

    let resizer = {
        let queue = Arc::clone(&queue);
        let removed = Arc::clone(&removed);
        let done = Arc::clone(&resizer_done);
        thread::spawn(move || {
            for target in [32usize, 64, 16, 64, 8, 64].into_iter().cycle().take(60) {
                assert!(queue.set_capacity_with(target, |_| {
                    removed.fetch_add(1, Ordering::Relaxed);
                }));
                thread::yield_now();
            }
            assert!(queue.set_capacity(64));
            done.store(true, Ordering::Release);
        })
    };

    // Every produced value must surface exactly once: either popped here or
    // discarded by a shrink.
    let mut popped = 0u32;
    loop {
        match queue.try_pop() {
            Some(_) => popped += 1,
            None => {
                if producer_done.load(Ordering::Acquire)
                    && resizer_done.load(Ordering::Acquire)
                    && queue.is_empty()
                {
                    break;
                }
                thread::yield_now();
            }
        }
    }

    producer.join().unwrap();
    resizer.join().unwrap();
    assert_eq!(popped + removed.load(Ordering::Relaxed), total);
    assert!(queue.is_empty());
}
