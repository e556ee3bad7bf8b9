//! Dead-process detection and chunk reclamation

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::fault::{fatal, FatalKind};
use crate::lifecycle::registry::ServiceRegistry;
use crate::memory::{monotonic_ns, ProcessLivenessTable, RuntimeId};
use crate::mempool::MemPoolCollection;

/// Sweep every pool block for references leaked by a dead runtime
///
/// For each block whose owner bitmap carries the runtime's bit, the bit is
/// cleared and the reference count dropped by one; the 1-to-0 transition
/// returns the block to its pool. References held by surviving processes
/// or still sitting in live queues are untouched.
pub fn sweep_owner_bitmap(pools: &MemPoolCollection, runtime: RuntimeId) -> usize {
    let bit = runtime.bit();
    let mut reclaimed = 0;

    for pool in pools.pools() {
        for index in 0..pool.block_count() {
            let header = pools.raw_header(pool.pool_id(), index);
            let header = unsafe { header.as_ref() };
            let bitmap = header.owner_bitmap_atomic();
            if bitmap.load(Ordering::Acquire) & bit == 0 {
                continue;
            }
            let previous_bits = bitmap.fetch_and(!bit, Ordering::AcqRel);
            if previous_bits & bit == 0 {
                // Another sweep got here first.
                continue;
            }

            let previous = header.reference_count_atomic().fetch_sub(1, Ordering::AcqRel);
            if previous == 0 {
                fatal(
                    FatalKind::Corruption,
                    "owner sweep found a bit set on an unreferenced chunk",
                );
            }
            if previous == 1 {
                fence(Ordering::Acquire);
                bitmap.store(0, Ordering::Relaxed);
                pools.release_block(pool.pool_id(), index);
            }
            reclaimed += 1;
        }
    }
    reclaimed
}

/// Shared state of the monitor, usable from the supervisor thread
#[derive(Debug)]
struct MonitorShared {
    liveness: ProcessLivenessTable,
    registry: Arc<ServiceRegistry>,
    pools: Arc<MemPoolCollection>,
    dead_interval: Duration,
}

impl MonitorShared {
    /// One scan over the liveness table; returns reclaimed process count
    fn scan_once(&self) -> usize {
        let now = match monotonic_ns() {
            Ok(now) => now,
            Err(error) => {
                log::error!("liveness scan skipped: {}", error);
                return 0;
            }
        };
        let dead_ns = self.dead_interval.as_nanos() as u64;
        let mut reclaimed = 0;

        for (runtime, pid, last_alive) in self.liveness.claimed() {
            if now.saturating_sub(last_alive) <= dead_ns {
                continue;
            }
            log::warn!(
                "process {} (pid {}) missed its keep-alive; reclaiming",
                runtime,
                pid
            );
            let ports = self.registry.remove_runtime(runtime, true);
            let chunks = sweep_owner_bitmap(&self.pools, runtime);
            self.liveness.release(runtime);
            log::warn!(
                "reclaimed {} ports and {} leaked chunk references of {}",
                ports,
                chunks,
                runtime
            );
            reclaimed += 1;
        }
        reclaimed
    }
}

/// Supervisor that watches the liveness table and repairs after peer death
///
/// Runs its scan either from a spawned thread at the keep-alive cadence or
/// on demand through [`ProcessMonitor::scan_once`].
#[derive(Debug)]
pub struct ProcessMonitor {
    shared: Arc<MonitorShared>,
    keep_alive_interval: Duration,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProcessMonitor {
    pub(crate) fn new(
        liveness: ProcessLivenessTable,
        registry: Arc<ServiceRegistry>,
        pools: Arc<MemPoolCollection>,
        keep_alive_interval: Duration,
        dead_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                liveness,
                registry,
                pools,
                dead_interval,
            }),
            keep_alive_interval,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Run one scan synchronously; returns the number of reclaimed processes
    pub fn scan_once(&self) -> usize {
        self.shared.scan_once()
    }

    /// Spawn the supervisor thread
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let stop = Arc::clone(&self.stop);
        let interval = self.keep_alive_interval;
        self.thread = Some(std::thread::spawn(move || {
            log::info!("process monitor started");
            while !stop.load(Ordering::Acquire) {
                std::thread::sleep(interval);
                if stop.load(Ordering::Acquire) {
                    break;
                }
                shared.scan_once();
            }
            log::info!("process monitor stopped");
        }));
    }

    /// Stop the supervisor thread and wait for it
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ProcessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
