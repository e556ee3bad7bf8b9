//! Process-wide runtime handle
//!
//! One `Runtime` per registered process owns the mapped segment view, the
//! liveness slot and the ports the process creates. Setup and teardown are
//! explicit: the handle registers on creation and offboards when dropped,
//! no hidden process-global state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{FloeError, Result};
use crate::lifecycle::ServiceRegistry;
use crate::memory::{ProcessLivenessTable, RuntimeId, SharedMemorySegment};
use crate::mempool::{MemPoolCollection, PoolStats};
use crate::port::{
    PublisherOptions, PublisherPort, ServiceId, SubscriberOptions, SubscriberPort,
};
use crate::registration::client::RegistrationClient;

/// Builder for registering against a broker over its socket
#[derive(Debug)]
pub struct RuntimeBuilder {
    name: String,
    socket_path: PathBuf,
    timeout: Duration,
}

impl RuntimeBuilder {
    /// Set the broker socket path
    pub fn socket_path(mut self, socket_path: impl Into<PathBuf>) -> Self {
        self.socket_path = socket_path.into();
        self
    }

    /// Set the hard registration deadline
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Perform the handshake and map the segment
    ///
    /// The returned runtime can stamp keep-alives and inspect the segment.
    /// Port creation goes through the broker's process-local API; a runtime
    /// registered over the socket cannot create ports.
    pub fn register(self) -> Result<Runtime> {
        let client = RegistrationClient::new(&self.socket_path);
        let token = client.register(&self.name, self.timeout)?;

        let segment = Arc::new(SharedMemorySegment::open(&token.segment_path, None)?);
        if segment.size() as u64 != token.segment_size {
            return Err(FloeError::registration_rejected(
                "segment size differs from the broker's answer",
            ));
        }
        let pools = MemPoolCollection::open(segment)?;
        let liveness = pools.segment().liveness_table();
        let runtime_id = RuntimeId(token.runtime_id);
        liveness.stamp(runtime_id)?;

        Ok(Runtime {
            name: self.name,
            runtime_id,
            pools,
            liveness,
            registry: None,
            remote: Some(client),
            keep_alive_thread: None,
            offboarded: false,
        })
    }
}

/// A registered process's handle on the shared-memory world
#[derive(Debug)]
pub struct Runtime {
    name: String,
    runtime_id: RuntimeId,
    pools: Arc<MemPoolCollection>,
    liveness: ProcessLivenessTable,
    /// Present when attached to an in-process broker
    registry: Option<Arc<ServiceRegistry>>,
    /// Present when registered over the broker socket
    remote: Option<RegistrationClient>,
    keep_alive_thread: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
    offboarded: bool,
}

impl Runtime {
    /// Start a registration against a broker socket
    pub fn builder(name: impl Into<String>) -> RuntimeBuilder {
        RuntimeBuilder {
            name: name.into(),
            socket_path: PathBuf::from("/tmp/floe-broker.sock"),
            timeout: Duration::from_secs(5),
        }
    }

    /// Attach directly to an in-process broker (no socket involved)
    pub(crate) fn attached(
        name: String,
        runtime_id: RuntimeId,
        pools: Arc<MemPoolCollection>,
        liveness: ProcessLivenessTable,
        registry: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            name,
            runtime_id,
            pools,
            liveness,
            registry: Some(registry),
            remote: None,
            keep_alive_thread: None,
            offboarded: false,
        }
    }

    /// Process name this runtime registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity assigned at registration
    pub fn id(&self) -> RuntimeId {
        self.runtime_id
    }

    /// Create a publisher port for `service`
    pub fn create_publisher(
        &self,
        service: ServiceId,
        options: PublisherOptions,
    ) -> Result<Arc<PublisherPort>> {
        let registry = self.registry.as_ref().ok_or_else(|| {
            FloeError::platform("port creation needs an in-process broker attachment")
        })?;
        registry.create_publisher(self.runtime_id, service, options)
    }

    /// Create a subscriber port for `service`
    pub fn create_subscriber(
        &self,
        service: ServiceId,
        options: SubscriberOptions,
    ) -> Result<Arc<SubscriberPort>> {
        let registry = self.registry.as_ref().ok_or_else(|| {
            FloeError::platform("port creation needs an in-process broker attachment")
        })?;
        registry.create_subscriber(self.runtime_id, service, options)
    }

    /// Stamp this runtime's keep-alive slot once
    pub fn keep_alive(&self) -> Result<()> {
        self.liveness.stamp(self.runtime_id)
    }

    /// Spawn a thread stamping the keep-alive at the broker's cadence
    pub fn spawn_keep_alive(&mut self) {
        if self.keep_alive_thread.is_some() {
            return;
        }
        let interval_ns = self.pools.segment().management().keep_alive_interval_ns;
        let interval = if interval_ns == 0 {
            Duration::from_millis(100)
        } else {
            Duration::from_nanos(interval_ns)
        };

        let liveness = self.liveness;
        let runtime_id = self.runtime_id;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Acquire) {
                if let Err(error) = liveness.stamp(runtime_id) {
                    log::error!("keep-alive stamping stopped: {}", error);
                    break;
                }
                std::thread::sleep(interval);
            }
        });
        self.keep_alive_thread = Some((stop, thread));
    }

    /// Per-pool occupancy of the mapped segment
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.pools.stats()
    }

    /// The mapped segment
    pub fn segment(&self) -> &Arc<SharedMemorySegment> {
        self.pools.segment()
    }

    /// Deregister explicitly instead of at drop time
    pub fn offboard(mut self) {
        self.do_offboard();
    }

    fn do_offboard(&mut self) {
        if self.offboarded {
            return;
        }
        self.offboarded = true;

        if let Some((stop, thread)) = self.keep_alive_thread.take() {
            stop.store(true, Ordering::Release);
            let _ = thread.join();
        }
        if let Some(registry) = self.registry.take() {
            registry.remove_runtime(self.runtime_id, false);
            self.liveness.release(self.runtime_id);
        }
        if let Some(client) = self.remote.take() {
            client.offboard(self.runtime_id.0);
        }
        log::info!("runtime '{}' ({}) offboarded", self.name, self.runtime_id);
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.do_offboard();
    }
}
