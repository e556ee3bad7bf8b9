//! # Floe - Zero-Copy Shared-Memory IPC
//!
//! Floe is a true zero-copy inter-process communication middleware:
//! cooperating processes on one host exchange typed samples through shared
//! memory without serialization or copies. A central broker owns the
//! shared-memory segment and mediates discovery; application processes
//! register with it, loan chunks from fixed-size pools, and publish or
//! subscribe to topics identified by a `(service, instance, event)` tuple.
//!
//! ## Features
//!
//! - **Fixed-size chunk pools**: lock-free LIFO free lists over block
//!   indices, multi-size-class selection, no steady-state allocation
//! - **Lock-free delivery**: bounded index queues carry chunk tokens from
//!   publisher to subscribers; overflow either discards the oldest sample
//!   or blocks the producer, per subscriber
//! - **Reference-counted chunks**: the count lives in the chunk header in
//!   shared memory, so every block returns to its pool exactly once even
//!   across process crashes
//! - **History for late joiners**: publishers replay their most recent
//!   chunks to newly attached subscribers, ahead of fresh deliveries
//! - **Crash recovery**: a broker-side monitor detects silent processes
//!   and sweeps their leaked references back to the pools
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Broker process                      │
//! │  segment creation │ registration │ liveness monitor    │
//! └───────────┬────────────────────────────────┬───────────┘
//!             ▼                                ▼
//! ┌──────────────────────┐       ┌──────────────────────────┐
//! │  Publisher process   │       │   Subscriber process     │
//! │  loan ─► publish ────┼──────►│ take ─► release          │
//! │  (chunk pools)       │ queue │ (chunk references)       │
//! └──────────────────────┘       └──────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use floe::{Broker, BrokerConfig, PoolConfig, SegmentConfig, ServiceId};
//! use floe::{PublisherOptions, SubscriberOptions};
//!
//! let config = BrokerConfig::new(
//!     SegmentConfig::new("demo")
//!         .with_pool(PoolConfig::new(128, 16))
//!         .with_pool(PoolConfig::new(1024, 8)),
//! );
//! let broker = Broker::open(config).unwrap();
//!
//! let runtime = broker.create_runtime("demo_app").unwrap();
//! let service = ServiceId::new("radar", "front", "objects");
//! let publisher = runtime
//!     .create_publisher(service.clone(), PublisherOptions::default())
//!     .unwrap();
//! let subscriber = runtime
//!     .create_subscriber(service, SubscriberOptions::default())
//!     .unwrap();
//!
//! let mut sample = publisher.loan(4, 8).unwrap();
//! sample.write_payload(&42u32.to_le_bytes());
//! publisher.publish(sample).unwrap();
//!
//! let received = subscriber.try_take().unwrap();
//! assert_eq!(received.payload(), &42u32.to_le_bytes());
//! ```

pub mod broker;
pub mod error;
pub mod fault;
pub mod lifecycle;
pub mod memory;
pub mod mempool;
pub mod port;
pub mod queue;
pub mod registration;
pub mod relative;

// Main API re-exports
pub use broker::{Broker, BrokerConfig};
pub use error::{FloeError, Result};
pub use fault::{set_fatal_handler, FatalHandler, FatalInfo, FatalKind};
pub use lifecycle::{ProcessMonitor, ServiceRegistry};
pub use memory::{
    BackingType, PoolConfig, ProcessLivenessTable, RuntimeId, SegmentConfig, SharedMemorySegment,
};
pub use mempool::{ChunkHeader, ChunkToken, MemPoolCollection, PoolStats, SharedChunk};
pub use port::{
    ChunkDistributor, ChunkQueue, PublisherOptions, PublisherPort, QueueFullPolicy, Sample,
    SampleMut, ServiceId, SubscriberOptions, SubscriberPort,
};
pub use queue::{IndexQueue, ResizableIndexQueue};
pub use registration::{
    RegistrationClient, RegistrationServer, RegistrationToken, Runtime, RuntimeBuilder,
};
pub use relative::{RelativePointer, SegmentId};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity limits fixed at build time
///
/// All runtime capacities are bounded; nothing on the data path allocates
/// at steady state.
pub mod limits {
    /// Maximum simultaneously registered processes (one owner bit each)
    pub const MAX_PROCESSES: usize = 64;

    /// Maximum chunk pools per segment
    pub const MAX_POOLS: usize = 32;

    /// Maximum blocks per pool (token index range)
    pub const MAX_CHUNKS_PER_POOL: usize = 1 << 24;

    /// Maximum subscriber queues attached to one publisher
    pub const MAX_SUBSCRIBERS_PER_PUBLISHER: usize = 64;

    /// Maximum capacity of a subscriber delivery queue
    pub const MAX_QUEUE_CAPACITY: usize = 1024;

    /// Maximum publisher history depth
    pub const MAX_HISTORY_CAPACITY: usize = 64;

    /// Delivery queue capacity used when none is configured
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

    /// Payload alignment used when none is configured
    pub const DEFAULT_PAYLOAD_ALIGNMENT: usize = 8;
}
