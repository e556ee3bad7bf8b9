//! Fixed-capacity lock-free FIFO of 32-bit values

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Bounded multi-producer/multi-consumer FIFO of `u32` values
///
/// Each slot carries its own sequence number. A producer reserves the tail
/// position, writes the value, then publishes by storing `position + 1` into
/// the slot sequence with release ordering. A consumer takes a slot whose
/// sequence matches `position + 1` with acquire ordering and recycles it by
/// advancing the sequence one full lap. The handshake makes every value
/// write happen-before the read that consumes it.
///
/// Single-producer/single-consumer use is the degenerate case of the same
/// protocol; no separate implementation is needed.
#[derive(Debug)]
pub struct IndexQueue {
    slots: Box<[Slot]>,
    mask: u64,
    enqueue_pos: AtomicU64,
    dequeue_pos: AtomicU64,
}

#[derive(Debug)]
struct Slot {
    sequence: AtomicU64,
    value: UnsafeCell<u32>,
}

unsafe impl Send for IndexQueue {}
unsafe impl Sync for IndexQueue {}

impl IndexQueue {
    /// Create a queue holding up to `capacity` values
    ///
    /// The physical slot count is `capacity` rounded up to a power of two;
    /// `capacity` itself may be any value of at least 1.
    pub fn new(capacity: usize) -> Self {
        let physical = capacity.max(1).next_power_of_two();
        let slots = (0..physical)
            .map(|i| Slot {
                sequence: AtomicU64::new(i as u64),
                value: UnsafeCell::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: physical as u64 - 1,
            enqueue_pos: AtomicU64::new(0),
            dequeue_pos: AtomicU64::new(0),
        }
    }

    /// Number of physical slots
    pub fn physical_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Current number of queued values (approximate under concurrency)
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Acquire);
        let head = self.dequeue_pos.load(Ordering::Acquire);
        tail.saturating_sub(head) as usize
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value; on a full queue the value is handed back
    pub fn try_push(&self, value: u32) -> Result<(), u32> {
        loop {
            let pos = self.enqueue_pos.load(Ordering::Relaxed);
            let slot = &self.slots[(pos & self.mask) as usize];
            let sequence = slot.sequence.load(Ordering::Acquire);

            if sequence == pos {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { *slot.value.get() = value };
                        slot.sequence.store(pos + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(_) => {
                        std::hint::spin_loop();
                        continue;
                    }
                }
            } else if sequence < pos {
                // One full lap behind: the slot still holds an unconsumed value.
                return Err(value);
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Take the oldest value, or `None` when the queue is empty
    pub fn try_pop(&self) -> Option<u32> {
        loop {
            let pos = self.dequeue_pos.load(Ordering::Relaxed);
            let slot = &self.slots[(pos & self.mask) as usize];
            let sequence = slot.sequence.load(Ordering::Acquire);

            if sequence == pos + 1 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { *slot.value.get() };
                        slot.sequence
                            .store(pos + self.slots.len() as u64, Ordering::Release);
                        return Some(value);
                    }
                    Err(_) => {
                        std::hint::spin_loop();
                        continue;
                    }
                }
            } else if sequence <= pos {
                return None;
            } else {
                std::hint::spin_loop();
            }
        }
    }
}
