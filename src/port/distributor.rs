//! Fan-out of published chunks to attached subscriber queues

use std::collections::VecDeque;
use std::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::mempool::{MemPoolCollection, SharedChunk};
use crate::port::chunk_queue::ChunkQueue;
use crate::port::options::QueueFullPolicy;

/// Retries granted to one slot whose generation keeps moving mid-delivery
const SLOT_RETRY_LIMIT: usize = 3;

/// One attachment slot
///
/// The generation counter moves on every attach and detach so a concurrent
/// delivery can tell that the slot changed under it.
#[derive(Debug)]
struct AttachSlot {
    generation: AtomicU64,
    queue: AtomicPtr<ChunkQueue>,
}

/// Fan-out endpoint of one publisher port
///
/// Attach and detach are serialized by a mutex; delivery never takes it.
/// The reference count of a delivered chunk is raised by the number of
/// attached queues in a single atomic add, then corrected downward for
/// every queue that rejects its delivery.
#[derive(Debug)]
pub struct ChunkDistributor {
    slots: Box<[AttachSlot]>,
    attach_lock: Mutex<()>,
    /// Deliveries in flight; detach waits for zero before freeing a queue
    active_deliveries: AtomicUsize,
    history: Mutex<VecDeque<SharedChunk>>,
    history_capacity: usize,
    pools: Arc<MemPoolCollection>,
}

impl ChunkDistributor {
    /// Create a distributor with `max_subscribers` attachment slots
    pub(crate) fn new(
        pools: Arc<MemPoolCollection>,
        max_subscribers: usize,
        history_capacity: usize,
    ) -> Self {
        let slots = (0..max_subscribers)
            .map(|_| AttachSlot {
                generation: AtomicU64::new(0),
                queue: AtomicPtr::new(std::ptr::null_mut()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            attach_lock: Mutex::new(()),
            active_deliveries: AtomicUsize::new(0),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            pools,
        }
    }

    /// Number of currently attached queues
    pub fn attached_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.queue.load(Ordering::Acquire).is_null())
            .count()
    }

    /// Whether at least one queue is attached
    pub fn has_subscribers(&self) -> bool {
        self.attached_count() > 0
    }

    /// Configured history depth
    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    /// Attach a subscriber queue, splicing requested history ahead of any
    /// fresh delivery
    ///
    /// Already-attached queues are left alone. Returns `false` when every
    /// slot is taken.
    pub(crate) fn attach(&self, queue: Arc<ChunkQueue>, history_request: usize) -> bool {
        let _guard = self
            .attach_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let raw = Arc::as_ptr(&queue) as *mut ChunkQueue;
        if self
            .slots
            .iter()
            .any(|slot| slot.queue.load(Ordering::Acquire) == raw)
        {
            return true;
        }

        let Some(slot) = self
            .slots
            .iter()
            .find(|slot| slot.queue.load(Ordering::Acquire).is_null())
        else {
            return false;
        };

        // History first: fresh deliveries only reach the queue once the
        // slot pointer is published, so the replay is ordered ahead of them.
        if history_request > 0 {
            let history = self
                .history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let replay = history_request.min(history.len());
            for chunk in history.iter().skip(history.len() - replay) {
                if let Err(rejected) = queue.try_push(chunk.duplicate_unowned()) {
                    drop(rejected);
                }
            }
        }

        slot.queue.store(Arc::into_raw(queue) as *mut ChunkQueue, Ordering::Release);
        slot.generation.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Detach a subscriber queue; returns whether it was attached
    pub(crate) fn detach(&self, queue: &Arc<ChunkQueue>) -> bool {
        let _guard = self
            .attach_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let raw = Arc::as_ptr(queue) as *mut ChunkQueue;
        for slot in self.slots.iter() {
            if slot.queue.load(Ordering::Acquire) == raw {
                slot.queue.store(std::ptr::null_mut(), Ordering::Release);
                slot.generation.fetch_add(1, Ordering::AcqRel);

                // A delivery that read the pointer before we nulled it may
                // still be pushing; wait it out before dropping our clone.
                while self.active_deliveries.load(Ordering::Acquire) != 0 {
                    std::thread::yield_now();
                }
                drop(unsafe { Arc::from_raw(raw as *const ChunkQueue) });
                return true;
            }
        }
        false
    }

    /// Deliver one chunk to every attached queue
    ///
    /// The reference count is raised once by the number of attached queues;
    /// a slot that appears during the scan mints its reference individually
    /// and unused credits are removed at the end, so every handed-out
    /// duplicate is backed by exactly one increment. A slot whose generation
    /// moves under the push is retried against its current occupant.
    ///
    /// `cancelled` is polled while a `BlockProducer` queue keeps the
    /// delivery waiting; a true return abandons that queue's delivery.
    /// Returns the number of queues that accepted the chunk.
    pub(crate) fn deliver(&self, chunk: &SharedChunk, cancelled: &dyn Fn() -> bool) -> usize {
        self.active_deliveries.fetch_add(1, Ordering::AcqRel);

        let mut credits = self.attached_count();
        if credits == 0 {
            self.active_deliveries.fetch_sub(1, Ordering::Release);
            return 0;
        }
        chunk.add_references(credits as u32);

        let mut delivered = 0;
        for slot in self.slots.iter() {
            let mut attempts = 0;
            loop {
                let generation_before = slot.generation.load(Ordering::Acquire);
                let raw = slot.queue.load(Ordering::Acquire);
                if raw.is_null() {
                    break;
                }
                if credits > 0 {
                    credits -= 1;
                } else {
                    chunk.add_references(1);
                }

                let queue = unsafe { &*raw };
                let duplicate =
                    SharedChunk::from_token_unowned(chunk.token(), Arc::clone(&self.pools));

                let accepted = match queue.policy() {
                    QueueFullPolicy::DiscardOldest => match queue.try_push(duplicate) {
                        Ok(()) => true,
                        Err(rejected) => {
                            drop(rejected);
                            false
                        }
                    },
                    QueueFullPolicy::BlockProducer => {
                        let mut pending = duplicate;
                        loop {
                            match queue.try_push(pending) {
                                Ok(()) => break true,
                                Err(rejected) => {
                                    if cancelled() {
                                        drop(rejected);
                                        break false;
                                    }
                                    pending = rejected;
                                    std::hint::spin_loop();
                                    std::thread::yield_now();
                                }
                            }
                        }
                    }
                };
                if accepted {
                    delivered += 1;
                }

                if slot.generation.load(Ordering::Acquire) == generation_before {
                    break;
                }
                // The slot changed under the push: a reference handed to a
                // detached queue stays accounted (the queue releases it when
                // drained or dropped), and this subscriber slot is retried
                // against whatever occupies it now. Bounded so attach churn
                // cannot pin the delivery.
                attempts += 1;
                if attempts == SLOT_RETRY_LIMIT {
                    log::debug!("giving up on a subscriber slot changing under delivery");
                    break;
                }
            }
        }

        for _ in 0..credits {
            chunk.remove_reference();
        }

        self.active_deliveries.fetch_sub(1, Ordering::Release);
        delivered
    }

    /// Retain a published chunk in the history ring
    ///
    /// With a zero history capacity the reference is dropped immediately.
    pub(crate) fn add_to_history(&self, chunk: SharedChunk) {
        if self.history_capacity == 0 {
            return;
        }
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(chunk);
    }

    /// Drop every history reference
    pub(crate) fn purge_history(&self) {
        let mut history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        history.clear();
    }

    /// Number of chunks currently retained in history
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Drop for ChunkDistributor {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            let raw = slot.queue.swap(std::ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                drop(unsafe { Arc::from_raw(raw as *const ChunkQueue) });
            }
        }
    }
}
