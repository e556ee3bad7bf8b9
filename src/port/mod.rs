//! User-facing publish/subscribe ports and their delivery machinery
//!
//! A publisher port loans chunks, stamps them and fans them out through its
//! [`ChunkDistributor`]; every attached subscriber owns a [`ChunkQueue`]
//! that carries chunk tokens until the subscriber takes them. Samples are
//! the RAII payload views handed to application code.

pub mod chunk_queue;
pub mod distributor;
pub mod options;
pub mod publisher;
pub mod sample;
pub mod service;
pub mod subscriber;

pub use chunk_queue::ChunkQueue;
pub use distributor::ChunkDistributor;
pub use options::{PublisherOptions, QueueFullPolicy, SubscriberOptions};
pub use publisher::PublisherPort;
pub use sample::{Sample, SampleMut};
pub use service::ServiceId;
pub use subscriber::SubscriberPort;
