//! The broker: segment owner, registrar and supervisor

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FloeError, Result};
use crate::lifecycle::{ProcessMonitor, ServiceRegistry};
use crate::memory::{
    ProcessLivenessTable, RuntimeId, SegmentConfig, SegmentLayout, SharedMemorySegment,
};
use crate::mempool::{MemPoolCollection, PoolStats};
use crate::registration::{RegistrationServer, Runtime};
use crate::relative::SegmentId;

/// Broker configuration
///
/// Every field has an effect: the segment defines the pools, the intervals
/// drive keep-alive and dead-process detection, and the socket path enables
/// registration of external processes.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// The shared-memory segment to create and own
    pub segment: SegmentConfig,
    /// Keep-alive stamping cadence; legal range `[1ms, dead_interval)`
    pub keep_alive_interval: Duration,
    /// Silence after which a process counts as dead; at least twice the
    /// keep-alive interval
    pub dead_interval: Duration,
    /// Deadline granted to registering clients
    pub registration_timeout: Duration,
    /// Socket for external registrations; `None` keeps the broker local
    pub socket_path: Option<PathBuf>,
}

impl BrokerConfig {
    /// Create a configuration around a segment definition
    pub fn new(segment: SegmentConfig) -> Self {
        Self {
            segment,
            keep_alive_interval: Duration::from_millis(100),
            dead_interval: Duration::from_secs(1),
            registration_timeout: Duration::from_secs(5),
            socket_path: None,
        }
    }

    /// Set the keep-alive interval
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the dead interval
    pub fn with_dead_interval(mut self, interval: Duration) -> Self {
        self.dead_interval = interval;
        self
    }

    /// Set the registration deadline
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// Set the registration socket path
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.segment.validate()?;
        if self.keep_alive_interval < Duration::from_millis(1) {
            return Err(FloeError::invalid_parameter(
                "keep_alive_interval",
                "Keep-alive interval must be at least 1 ms",
            ));
        }
        if self.dead_interval < self.keep_alive_interval * 2 {
            return Err(FloeError::invalid_parameter(
                "dead_interval",
                "Dead interval must be at least twice the keep-alive interval",
            ));
        }
        if self.registration_timeout.is_zero() {
            return Err(FloeError::invalid_parameter(
                "registration_timeout",
                "Registration timeout must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// State shared between the broker, its monitor and the socket server
#[derive(Debug)]
pub(crate) struct BrokerCore {
    pools: Arc<MemPoolCollection>,
    liveness: ProcessLivenessTable,
    registry: Arc<ServiceRegistry>,
}

impl BrokerCore {
    /// Claim a liveness slot for an externally registering process
    ///
    /// `Ok(None)` means every slot is taken.
    pub(crate) fn register_remote(&self, name: &str, pid: u32) -> Result<Option<RuntimeId>> {
        let Some(runtime_id) = self.liveness.claim(pid)? else {
            return Ok(None);
        };
        self.registry.register_process(runtime_id, name);
        Ok(Some(runtime_id))
    }

    /// Offboard an externally registered process
    pub(crate) fn offboard_remote(&self, runtime_id: RuntimeId) {
        self.registry.remove_runtime(runtime_id, false);
        self.liveness.release(runtime_id);
    }

    /// Path clients can open the segment by, if it has one
    pub(crate) fn segment_path(&self) -> Option<PathBuf> {
        self.pools.segment().path().map(PathBuf::from)
    }

    /// Mapped segment size in bytes
    pub(crate) fn segment_size(&self) -> usize {
        self.pools.segment().size()
    }
}

/// Central owner of the shared-memory segment and its lifecycle
///
/// Creates the segment and pools, hands out runtimes, answers socket
/// registrations and reclaims after dead peers. Dropping the broker stops
/// its threads and removes the segment file it created.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    core: Arc<BrokerCore>,
    monitor: ProcessMonitor,
    server: Option<RegistrationServer>,
}

impl Broker {
    /// Create the segment and bring up the broker state
    pub fn open(config: BrokerConfig) -> Result<Self> {
        config.validate()?;

        let layout = SegmentLayout::compute(&config.segment)?;
        let segment = SharedMemorySegment::create(&config.segment, SegmentId(0))?;
        segment.set_liveness_intervals(
            config.keep_alive_interval.as_nanos() as u64,
            config.dead_interval.as_nanos() as u64,
        );

        let pools = MemPoolCollection::create(Arc::new(segment), &layout)?;
        let liveness = pools.segment().liveness_table();
        let registry = ServiceRegistry::new(Arc::clone(&pools));
        let monitor = ProcessMonitor::new(
            liveness,
            Arc::clone(&registry),
            Arc::clone(&pools),
            config.keep_alive_interval,
            config.dead_interval,
        );

        Ok(Self {
            config,
            core: Arc::new(BrokerCore {
                pools,
                liveness,
                registry,
            }),
            monitor,
            server: None,
        })
    }

    /// Spawn the dead-process supervisor thread
    pub fn start_monitor(&mut self) {
        self.monitor.start();
    }

    /// The supervisor, for synchronous scans
    pub fn monitor(&self) -> &ProcessMonitor {
        &self.monitor
    }

    /// Bind the registration socket and start answering clients
    pub fn start_registration_server(&mut self) -> Result<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let socket_path = self.config.socket_path.clone().ok_or_else(|| {
            FloeError::invalid_parameter("socket_path", "No registration socket configured")
        })?;
        if self.core.segment_path().is_none() {
            return Err(FloeError::invalid_parameter(
                "segment",
                "External registration needs a file-backed segment",
            ));
        }
        self.server = Some(RegistrationServer::spawn(socket_path, Arc::clone(&self.core))?);
        Ok(())
    }

    /// Register a process living in the broker's own address space
    pub fn create_runtime(&self, name: impl Into<String>) -> Result<Runtime> {
        let name = name.into();
        let runtime_id = self
            .core
            .liveness
            .claim(std::process::id())?
            .ok_or_else(|| FloeError::exhausted("liveness slots"))?;
        self.core.registry.register_process(runtime_id, &name);
        log::info!("runtime '{}' attached as {}", name, runtime_id);
        Ok(Runtime::attached(
            name,
            runtime_id,
            Arc::clone(&self.core.pools),
            self.core.liveness,
            Arc::clone(&self.core.registry),
        ))
    }

    /// The broker configuration
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The segment's chunk pools
    pub fn pools(&self) -> &Arc<MemPoolCollection> {
        &self.core.pools
    }

    /// The service registry
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.core.registry
    }

    /// Per-pool occupancy snapshot
    pub fn pool_stats(&self) -> Vec<PoolStats> {
        self.core.pools.stats()
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.server = None;
        self.monitor.stop();
        let segment = self.core.pools.segment();
        if segment.is_creator() {
            if let Some(path) = segment.path() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
