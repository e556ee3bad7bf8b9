//! Fixed-size chunk pools and the reference-counted chunk lifecycle
//!
//! Chunks are blocks inside a shared-memory segment, prefixed by an
//! in-place [`ChunkHeader`]. A lock-free LIFO free list hands indices out
//! and takes them back; the cross-process reference count embedded in the
//! header guarantees every block returns to its pool exactly once.

pub mod chunk;
pub mod collection;
pub mod pool;

pub use chunk::{ChunkHeader, ChunkToken, SharedChunk, CHUNK_HEADER_SIZE, CHUNK_HEADER_VERSION};
pub use collection::{MemPoolCollection, PoolStats};
pub use pool::MemPool;
