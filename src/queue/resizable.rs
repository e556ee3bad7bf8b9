//! Index queue with a runtime-adjustable logical capacity

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::queue::index_queue::IndexQueue;

/// A bounded FIFO whose capacity can change while it carries elements
///
/// Physical storage is sized for `max_capacity` once; the logical capacity
/// moves between 0 and that maximum. Shrinking a non-empty queue removes the
/// oldest elements first and hands each one to the caller's remove handler
/// before `set_capacity` returns. Push and pop stay lock-free; resizers are
/// serialized among themselves by a mutex.
#[derive(Debug)]
pub struct ResizableIndexQueue {
    inner: IndexQueue,
    capacity: AtomicUsize,
    size: AtomicUsize,
    max_capacity: usize,
    resize_lock: Mutex<()>,
}

impl ResizableIndexQueue {
    /// Create a queue with `initial_capacity`, saturating at `max_capacity`
    pub fn new(max_capacity: usize, initial_capacity: usize) -> Self {
        let max_capacity = max_capacity.max(1);
        Self {
            inner: IndexQueue::new(max_capacity),
            capacity: AtomicUsize::new(initial_capacity.min(max_capacity)),
            size: AtomicUsize::new(0),
            max_capacity,
            resize_lock: Mutex::new(()),
        }
    }

    /// Create a queue starting at its maximum capacity
    pub fn with_max_capacity(max_capacity: usize) -> Self {
        Self::new(max_capacity, max_capacity)
    }

    /// Current logical capacity
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Upper bound the capacity can ever reach
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    /// Current number of queued values
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a value; on a full queue the value is handed back
    pub fn try_push(&self, value: u32) -> Result<(), u32> {
        // Claim a size credit against the logical capacity first; the inner
        // queue is sized for the maximum, so a claimed credit guarantees a
        // physical slot.
        loop {
            let size = self.size.load(Ordering::Relaxed);
            if size >= self.capacity.load(Ordering::Acquire) {
                return Err(value);
            }
            if self
                .size
                .compare_exchange_weak(size, size + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            std::hint::spin_loop();
        }

        match self.inner.try_push(value) {
            Ok(()) => Ok(()),
            Err(value) => {
                // Unreachable with a correctly sized inner queue; give the
                // credit back rather than lose accounting.
                self.size.fetch_sub(1, Ordering::AcqRel);
                Err(value)
            }
        }
    }

    /// Take the oldest value, or `None` when the queue is empty
    pub fn try_pop(&self) -> Option<u32> {
        let value = self.inner.try_pop()?;
        self.size.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    /// Change the logical capacity, discarding nothing
    ///
    /// Equivalent to [`ResizableIndexQueue::set_capacity_with`] with a
    /// handler that drops the removed values.
    pub fn set_capacity(&self, new_capacity: usize) -> bool {
        self.set_capacity_with(new_capacity, |_| {})
    }

    /// Change the logical capacity
    ///
    /// Returns `false` when `new_capacity` exceeds the maximum. Shrinking a
    /// queue that holds more values than the new capacity pops the oldest
    /// surplus values in FIFO order, invoking `remove_handler` for each one
    /// before returning. Shrinking to 0 is permitted; growing preserves all
    /// queued values.
    pub fn set_capacity_with<F>(&self, new_capacity: usize, mut remove_handler: F) -> bool
    where
        F: FnMut(u32),
    {
        if new_capacity > self.max_capacity {
            return false;
        }

        let _guard = self
            .resize_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Publish the new bound first so producers stop filling beyond it
        // for the whole drain window.
        self.capacity.store(new_capacity, Ordering::Release);

        while self.size.load(Ordering::Acquire) > new_capacity {
            match self.try_pop() {
                Some(value) => remove_handler(value),
                // A concurrent consumer got there first; re-check the size.
                None => std::hint::spin_loop(),
            }
        }
        true
    }
}
