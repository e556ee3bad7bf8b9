//! Shared-memory segments, their deterministic layout, and liveness tracking
//!
//! A segment is created once by the broker and opened read-write by every
//! registered process. All offsets inside it are a pure function of the
//! configuration, so peers compute identical layouts without talking to each
//! other. The management area at the front carries the validation header,
//! the serialized pool configuration and the process-liveness table.

pub mod config;
pub mod headers;
pub mod layout;
pub mod liveness;
pub mod segment;

pub use config::{BackingType, PoolConfig, SegmentConfig};
pub use headers::{LivenessSlot, ManagementHeader, PoolHeader};
pub use layout::{PoolLayout, SegmentLayout};
pub use liveness::{monotonic_ns, ProcessLivenessTable, RuntimeId};
pub use segment::SharedMemorySegment;
