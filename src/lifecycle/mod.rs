//! Broker-side port bookkeeping and dead-process reclamation
//!
//! The service registry wires publishers and subscribers of matching
//! service identities together and keeps weak handles per process. The
//! monitor scans the liveness table; a process that stops stamping gets its
//! ports shut down and its leaked chunk references swept back to the pools.

pub mod monitor;
pub mod registry;

pub use monitor::{sweep_owner_bitmap, ProcessMonitor};
pub use registry::ServiceRegistry;
