//! Service discovery and per-process port bookkeeping

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::error::Result;
use crate::memory::RuntimeId;
use crate::mempool::MemPoolCollection;
use crate::port::chunk_queue::ChunkQueue;
use crate::port::{PublisherOptions, PublisherPort, ServiceId, SubscriberOptions, SubscriberPort};

/// Ports known for one service identity
#[derive(Debug, Default)]
struct ServiceEntry {
    publishers: Vec<Weak<PublisherPort>>,
    subscribers: Vec<Weak<SubscriberPort>>,
}

/// Ports and metadata of one registered process
#[derive(Debug)]
struct ProcessRecord {
    name: String,
    publishers: Vec<Weak<PublisherPort>>,
    subscribers: Vec<Weak<SubscriberPort>>,
}

/// Broker-side registry wiring publishers to subscribers
///
/// Holds only weak handles: a port owned solely by its application process
/// disappears from the registry when the process drops it. Port records of
/// crashed processes stay reachable through their leaked strong handles, so
/// the reclaimer can still shut them down.
#[derive(Debug)]
pub struct ServiceRegistry {
    pools: Arc<MemPoolCollection>,
    services: RwLock<HashMap<ServiceId, ServiceEntry>>,
    processes: RwLock<HashMap<u32, ProcessRecord>>,
    next_port_id: AtomicU64,
}

impl ServiceRegistry {
    /// Create a registry over the segment's pools
    pub(crate) fn new(pools: Arc<MemPoolCollection>) -> Arc<Self> {
        Arc::new(Self {
            pools,
            services: RwLock::new(HashMap::new()),
            processes: RwLock::new(HashMap::new()),
            next_port_id: AtomicU64::new(1),
        })
    }

    /// Record a registered process
    pub(crate) fn register_process(&self, runtime: RuntimeId, name: impl Into<String>) {
        let mut processes = self.processes.write().unwrap();
        processes.insert(
            runtime.0,
            ProcessRecord {
                name: name.into(),
                publishers: Vec::new(),
                subscribers: Vec::new(),
            },
        );
    }

    /// Name a process registered under, if any
    pub fn process_name(&self, runtime: RuntimeId) -> Option<String> {
        let processes = self.processes.read().unwrap();
        processes.get(&runtime.0).map(|record| record.name.clone())
    }

    /// Create a publisher port for `runtime`, wiring current subscribers
    pub(crate) fn create_publisher(
        self: &Arc<Self>,
        runtime: RuntimeId,
        service: ServiceId,
        options: PublisherOptions,
    ) -> Result<Arc<PublisherPort>> {
        options.validate()?;
        let port_id = self.next_port_id.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(PublisherPort::new(
            service.clone(),
            &options,
            Arc::clone(&self.pools),
            port_id,
            runtime,
            Arc::downgrade(self),
        ));

        {
            let mut services = self.services.write().unwrap();
            let entry = services.entry(service).or_default();
            if port.is_offered() {
                for subscriber in entry.subscribers.iter().filter_map(Weak::upgrade) {
                    if subscriber.is_subscribed() {
                        port.attach_queue(
                            Arc::clone(subscriber.queue()),
                            subscriber.history_request(),
                        );
                    }
                }
            }
            entry.publishers.push(Arc::downgrade(&port));
            entry.publishers.retain(|weak| weak.upgrade().is_some());
        }
        {
            let mut processes = self.processes.write().unwrap();
            if let Some(record) = processes.get_mut(&runtime.0) {
                record.publishers.push(Arc::downgrade(&port));
            }
        }

        log::debug!(
            "created publisher {} for service {}",
            port.id(),
            port.service()
        );
        Ok(port)
    }

    /// Create a subscriber port for `runtime`, attaching it to every
    /// offered publisher of the service
    pub(crate) fn create_subscriber(
        self: &Arc<Self>,
        runtime: RuntimeId,
        service: ServiceId,
        options: SubscriberOptions,
    ) -> Result<Arc<SubscriberPort>> {
        options.validate()?;
        let port_id = self.next_port_id.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(SubscriberPort::new(
            service.clone(),
            &options,
            Arc::clone(&self.pools),
            port_id,
            runtime,
            Arc::downgrade(self),
        ));

        {
            let mut services = self.services.write().unwrap();
            let entry = services.entry(service).or_default();
            for publisher in entry.publishers.iter().filter_map(Weak::upgrade) {
                if publisher.is_offered() {
                    publisher.attach_queue(Arc::clone(port.queue()), options.history_request);
                }
            }
            entry.subscribers.push(Arc::downgrade(&port));
            entry.subscribers.retain(|weak| weak.upgrade().is_some());
        }
        port.set_subscribed(true);
        {
            let mut processes = self.processes.write().unwrap();
            if let Some(record) = processes.get_mut(&runtime.0) {
                record.subscribers.push(Arc::downgrade(&port));
            }
        }

        log::debug!(
            "created subscriber {} for service {}",
            port.id(),
            port.service()
        );
        Ok(port)
    }

    /// Attach `queue` to every offered publisher of `service`
    pub(crate) fn wire_subscriber(
        &self,
        service: &ServiceId,
        queue: &Arc<ChunkQueue>,
        history_request: usize,
    ) -> Result<()> {
        let services = self.services.read().unwrap();
        if let Some(entry) = services.get(service) {
            for publisher in entry.publishers.iter().filter_map(Weak::upgrade) {
                if publisher.is_offered() {
                    publisher.attach_queue(Arc::clone(queue), history_request);
                }
            }
        }
        Ok(())
    }

    /// Detach `queue` from every publisher of `service`
    pub(crate) fn unwire_subscriber(&self, service: &ServiceId, queue: &Arc<ChunkQueue>) {
        let services = self.services.read().unwrap();
        if let Some(entry) = services.get(service) {
            for publisher in entry.publishers.iter().filter_map(Weak::upgrade) {
                publisher.detach_queue(queue);
            }
        }
    }

    /// Attach every subscribed subscriber of the service to `publisher`
    ///
    /// Called when a publisher starts offering after creation.
    pub(crate) fn wire_publisher(&self, publisher: &PublisherPort) {
        let services = self.services.read().unwrap();
        if let Some(entry) = services.get(publisher.service()) {
            for subscriber in entry.subscribers.iter().filter_map(Weak::upgrade) {
                if subscriber.is_subscribed() {
                    publisher.attach_queue(
                        Arc::clone(subscriber.queue()),
                        subscriber.history_request(),
                    );
                }
            }
        }
    }

    /// Shut down and unlink every port of a process
    ///
    /// With `crashed` set, subscriber queues are drained as well: their
    /// owner can no longer take the chunks, so the references go back to
    /// the pools here. Returns the number of ports handled.
    pub(crate) fn remove_runtime(&self, runtime: RuntimeId, crashed: bool) -> usize {
        let record = {
            let mut processes = self.processes.write().unwrap();
            processes.remove(&runtime.0)
        };
        let Some(record) = record else {
            return 0;
        };

        let mut handled = 0;
        for publisher in record.publishers.iter().filter_map(Weak::upgrade) {
            publisher.mark_defunct();
            publisher.purge();
            handled += 1;
        }
        for subscriber in record.subscribers.iter().filter_map(Weak::upgrade) {
            self.unwire_subscriber(subscriber.service(), subscriber.queue());
            subscriber.set_subscribed(false);
            if crashed {
                let dropped = subscriber.queue().drain();
                if dropped > 0 {
                    log::warn!(
                        "drained {} undelivered chunks of crashed {}",
                        dropped,
                        runtime
                    );
                }
            }
            handled += 1;
        }

        if handled > 0 {
            log::info!(
                "removed {} ports of process '{}' ({})",
                handled,
                record.name,
                runtime
            );
        }
        handled
    }

    /// Number of live publisher ports for a service
    pub fn publisher_count(&self, service: &ServiceId) -> usize {
        let services = self.services.read().unwrap();
        services
            .get(service)
            .map(|entry| {
                entry
                    .publishers
                    .iter()
                    .filter(|weak| weak.upgrade().is_some())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Number of live subscriber ports for a service
    pub fn subscriber_count(&self, service: &ServiceId) -> usize {
        let services = self.services.read().unwrap();
        services
            .get(service)
            .map(|entry| {
                entry
                    .subscribers
                    .iter()
                    .filter(|weak| weak.upgrade().is_some())
                    .count()
            })
            .unwrap_or(0)
    }
}
