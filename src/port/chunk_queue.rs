//! Per-subscriber delivery queue of chunk references

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::enforce;
use crate::limits;
use crate::memory::RuntimeId;
use crate::mempool::{ChunkToken, MemPoolCollection, SharedChunk};
use crate::port::options::QueueFullPolicy;
use crate::queue::ResizableIndexQueue;

/// Bounded queue of chunk references owned by one subscriber
///
/// The queue holds one reference per queued chunk. Pushing transfers a
/// reference in; popping transfers it out to the caller. Under
/// `DiscardOldest`, overflow drops the displaced chunk's reference, which
/// may return its block to the pool right away.
#[derive(Debug)]
pub struct ChunkQueue {
    queue: ResizableIndexQueue,
    policy: QueueFullPolicy,
    lost_samples: AtomicBool,
    pools: Arc<MemPoolCollection>,
    owner: RuntimeId,
}

impl ChunkQueue {
    /// Create a queue with `capacity` slots
    ///
    /// Capacity outside `[1, MAX_QUEUE_CAPACITY]` is a contract violation.
    pub(crate) fn new(
        pools: Arc<MemPoolCollection>,
        capacity: usize,
        policy: QueueFullPolicy,
        owner: RuntimeId,
    ) -> Self {
        enforce!(
            capacity >= 1 && capacity <= limits::MAX_QUEUE_CAPACITY,
            "chunk queue capacity outside its legal range"
        );
        Self {
            queue: ResizableIndexQueue::new(limits::MAX_QUEUE_CAPACITY, capacity),
            policy,
            lost_samples: AtomicBool::new(false),
            pools,
            owner,
        }
    }

    /// The queue-full policy of this queue
    pub fn policy(&self) -> QueueFullPolicy {
        self.policy
    }

    /// Current logical capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether this queue ever discarded a chunk
    ///
    /// The flag is sticky; it also trips when a resize shrinks away queued
    /// chunks.
    pub fn has_lost_samples(&self) -> bool {
        self.lost_samples.load(Ordering::Acquire)
    }

    /// Push a chunk reference into the queue
    ///
    /// `Ok` means the queue took ownership of the reference. `Err` hands
    /// the chunk back: the queue is full and the policy forbids discarding
    /// (or the capacity is 0).
    pub(crate) fn try_push(&self, chunk: SharedChunk) -> Result<(), SharedChunk> {
        let token = chunk.into_token();
        match self.queue.try_push(token.raw()) {
            Ok(()) => Ok(()),
            Err(raw) => match self.policy {
                QueueFullPolicy::DiscardOldest => {
                    if let Some(displaced) = self.queue.try_pop() {
                        // Drop the overflow sample's reference so its block
                        // can recycle.
                        drop(SharedChunk::from_token_unowned(
                            ChunkToken::from_raw(displaced),
                            Arc::clone(&self.pools),
                        ));
                        self.lost_samples.store(true, Ordering::Release);
                    }
                    match self.queue.try_push(raw) {
                        Ok(()) => Ok(()),
                        Err(raw) => Err(SharedChunk::from_token_unowned(
                            ChunkToken::from_raw(raw),
                            Arc::clone(&self.pools),
                        )),
                    }
                }
                QueueFullPolicy::BlockProducer => Err(SharedChunk::from_token_unowned(
                    ChunkToken::from_raw(raw),
                    Arc::clone(&self.pools),
                )),
            },
        }
    }

    /// Pop the oldest chunk, transferring its reference to the caller
    pub(crate) fn try_pop(&self) -> Option<SharedChunk> {
        self.queue.try_pop().map(|raw| {
            SharedChunk::from_token_owned(
                ChunkToken::from_raw(raw),
                Arc::clone(&self.pools),
                self.owner,
            )
        })
    }

    /// Drop every queued chunk reference, returning how many were dropped
    pub(crate) fn drain(&self) -> usize {
        let mut dropped = 0;
        while let Some(raw) = self.queue.try_pop() {
            drop(SharedChunk::from_token_unowned(
                ChunkToken::from_raw(raw),
                Arc::clone(&self.pools),
            ));
            dropped += 1;
        }
        dropped
    }

    /// Resize the queue within `[0, max]`
    ///
    /// Shrinking below the current fill level drops the oldest chunks and
    /// trips the lost-samples flag: loss is loss, whatever caused it.
    pub fn set_capacity(&self, new_capacity: usize) -> bool {
        let mut dropped = 0usize;
        let accepted = self.queue.set_capacity_with(new_capacity, |raw| {
            drop(SharedChunk::from_token_unowned(
                ChunkToken::from_raw(raw),
                Arc::clone(&self.pools),
            ));
            dropped += 1;
        });
        if dropped > 0 {
            self.lost_samples.store(true, Ordering::Release);
        }
        accepted
    }
}

impl Drop for ChunkQueue {
    fn drop(&mut self) {
        // Undelivered chunks still hold references; give them back.
        while let Some(raw) = self.queue.try_pop() {
            drop(SharedChunk::from_token_unowned(
                ChunkToken::from_raw(raw),
                Arc::clone(&self.pools),
            ));
        }
    }
}
