//! Publisher port: loan, publish, offer

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::error::{FloeError, Result};
use crate::lifecycle::ServiceRegistry;
use crate::limits;
use crate::memory::RuntimeId;
use crate::mempool::MemPoolCollection;
use crate::port::chunk_queue::ChunkQueue;
use crate::port::distributor::ChunkDistributor;
use crate::port::options::PublisherOptions;
use crate::port::sample::SampleMut;
use crate::port::service::ServiceId;

/// Producing endpoint of one service
///
/// Loans chunks from the pools, stamps origin and sequence on publish and
/// fans the chunk out through its distributor. `offer` / `stop_offer`
/// toggle discoverability; a stopped port rejects further loans, which also
/// cancels any delivery blocked on a `BlockProducer` subscriber.
#[derive(Debug)]
pub struct PublisherPort {
    service: ServiceId,
    /// Port identity stamped into every chunk as origin
    origin_id: u64,
    owner: RuntimeId,
    pools: Arc<MemPoolCollection>,
    distributor: ChunkDistributor,
    sequence: AtomicU64,
    offered: AtomicBool,
    defunct: AtomicBool,
    registry: Weak<ServiceRegistry>,
    /// Serializes publishes so per-subscriber order equals publish order
    publish_lock: Mutex<()>,
}

impl PublisherPort {
    pub(crate) fn new(
        service: ServiceId,
        options: &PublisherOptions,
        pools: Arc<MemPoolCollection>,
        origin_id: u64,
        owner: RuntimeId,
        registry: Weak<ServiceRegistry>,
    ) -> Self {
        let distributor = ChunkDistributor::new(
            Arc::clone(&pools),
            limits::MAX_SUBSCRIBERS_PER_PUBLISHER,
            options.history_capacity,
        );
        Self {
            service,
            origin_id,
            owner,
            pools,
            distributor,
            sequence: AtomicU64::new(0),
            offered: AtomicBool::new(options.offer_on_create),
            defunct: AtomicBool::new(false),
            registry,
            publish_lock: Mutex::new(()),
        }
    }

    /// The service this port publishes
    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// Port identity; appears as `origin_id` in published chunk headers
    pub fn id(&self) -> u64 {
        self.origin_id
    }

    /// The runtime owning this port
    pub fn owner(&self) -> RuntimeId {
        self.owner
    }

    /// Loan a chunk for `payload_size` bytes aligned to `payload_align`
    pub fn loan(&self, payload_size: usize, payload_align: usize) -> Result<SampleMut> {
        if self.defunct.load(Ordering::Acquire) {
            return Err(FloeError::port_stopped("publisher is defunct"));
        }
        if !self.offered.load(Ordering::Acquire) {
            return Err(FloeError::port_stopped("publisher is not offered"));
        }
        let chunk =
            self.pools
                .allocate_chunk(payload_size, payload_align, self.origin_id, self.owner)?;
        Ok(SampleMut::new(chunk))
    }

    /// Publish a loaned sample to every attached subscriber
    ///
    /// Stamps the origin id and the next sequence number, delivers, then
    /// retains one reference in the history ring.
    pub fn publish(&self, sample: SampleMut) -> Result<()> {
        if self.defunct.load(Ordering::Acquire) || !self.offered.load(Ordering::Acquire) {
            // The sample drops here, releasing its chunk.
            return Err(FloeError::port_stopped("publish on a stopped publisher"));
        }

        let _guard = self
            .publish_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut chunk = sample.into_chunk();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        chunk.header_mut().stamp(self.origin_id, sequence);

        let cancelled =
            || self.defunct.load(Ordering::Acquire) || !self.offered.load(Ordering::Acquire);
        self.distributor.deliver(&chunk, &cancelled);
        self.distributor.add_to_history(chunk);
        Ok(())
    }

    /// Release an unpublished loan
    pub fn release(&self, sample: SampleMut) {
        drop(sample);
    }

    /// Make the port discoverable, attaching already-subscribed subscribers
    pub fn offer(&self) {
        self.offered.store(true, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.wire_publisher(self);
        }
    }

    /// Withdraw the port from discovery and reject further loans
    ///
    /// Also cancels a publish currently blocked on a full `BlockProducer`
    /// subscriber queue.
    pub fn stop_offer(&self) {
        self.offered.store(false, Ordering::Release);
    }

    /// Whether the port is currently offered
    pub fn is_offered(&self) -> bool {
        self.offered.load(Ordering::Acquire) && !self.defunct.load(Ordering::Acquire)
    }

    /// Whether at least one subscriber queue is attached
    pub fn has_subscribers(&self) -> bool {
        self.distributor.has_subscribers()
    }

    /// Number of publishes so far
    pub fn published_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Number of chunks retained in the history ring
    pub fn history_len(&self) -> usize {
        self.distributor.history_len()
    }

    pub(crate) fn attach_queue(&self, queue: Arc<ChunkQueue>, history_request: usize) -> bool {
        self.distributor.attach(queue, history_request)
    }

    pub(crate) fn detach_queue(&self, queue: &Arc<ChunkQueue>) -> bool {
        self.distributor.detach(queue)
    }

    /// Stop the port on behalf of a dead or offboarding process
    pub(crate) fn mark_defunct(&self) {
        self.defunct.store(true, Ordering::Release);
    }

    /// Drop every reference the port still holds
    pub(crate) fn purge(&self) {
        self.distributor.purge_history();
    }
}
