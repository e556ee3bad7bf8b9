//! Subscriber port: subscribe, take, release

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::lifecycle::ServiceRegistry;
use crate::memory::RuntimeId;
use crate::mempool::MemPoolCollection;
use crate::port::chunk_queue::ChunkQueue;
use crate::port::options::SubscriberOptions;
use crate::port::sample::Sample;
use crate::port::service::ServiceId;

/// Consuming endpoint of one service
///
/// Owns the delivery queue that attached publishers feed. Taking a sample
/// transfers the queue's chunk reference to the caller; releasing (or
/// dropping) the sample gives it back to the pool once it is the last one.
#[derive(Debug)]
pub struct SubscriberPort {
    service: ServiceId,
    port_id: u64,
    owner: RuntimeId,
    queue: Arc<ChunkQueue>,
    registry: Weak<ServiceRegistry>,
    history_request: usize,
    subscribed: AtomicBool,
}

impl SubscriberPort {
    pub(crate) fn new(
        service: ServiceId,
        options: &SubscriberOptions,
        pools: Arc<MemPoolCollection>,
        port_id: u64,
        owner: RuntimeId,
        registry: Weak<ServiceRegistry>,
    ) -> Self {
        let queue = Arc::new(ChunkQueue::new(
            pools,
            options.queue_capacity,
            options.queue_full_policy,
            owner,
        ));
        Self {
            service,
            port_id,
            owner,
            queue,
            registry,
            history_request: options.history_request,
            subscribed: AtomicBool::new(false),
        }
    }

    /// The service this port consumes
    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Port identity
    pub fn id(&self) -> u64 {
        self.port_id
    }

    /// The runtime owning this port
    pub fn owner(&self) -> RuntimeId {
        self.owner
    }

    /// Attach to every offered publisher of the service
    ///
    /// `queue_capacity` resizes the delivery queue first; `history_request`
    /// chunks of publisher history are replayed ahead of fresh deliveries.
    pub fn subscribe(&self, queue_capacity: usize, history_request: usize) -> Result<()> {
        self.queue.set_capacity(queue_capacity);
        if let Some(registry) = self.registry.upgrade() {
            registry.wire_subscriber(&self.service, &self.queue, history_request)?;
        }
        self.subscribed.store(true, Ordering::Release);
        Ok(())
    }

    /// Detach from every publisher of the service
    ///
    /// Chunks already queued stay takeable.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unwire_subscriber(&self.service, &self.queue);
        }
        self.subscribed.store(false, Ordering::Release);
    }

    /// Whether the port is currently subscribed
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Take the oldest delivered sample, if any
    pub fn try_take(&self) -> Option<Sample> {
        self.queue.try_pop().map(Sample::new)
    }

    /// Release a taken sample
    pub fn release(&self, sample: Sample) {
        drop(sample);
    }

    /// Whether this port ever lost a sample to queue overflow or shrink
    ///
    /// Sticky; survives takes and releases.
    pub fn has_lost_samples(&self) -> bool {
        self.queue.has_lost_samples()
    }

    /// Number of samples waiting in the delivery queue
    pub fn pending_samples(&self) -> usize {
        self.queue.len()
    }

    /// Capacity of the delivery queue
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// History depth requested on attach
    pub fn history_request(&self) -> usize {
        self.history_request
    }

    pub(crate) fn queue(&self) -> &Arc<ChunkQueue> {
        &self.queue
    }

    pub(crate) fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Release);
    }
}

impl Drop for SubscriberPort {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
