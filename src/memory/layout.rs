//! Deterministic segment layout computation
//!
//! The layout is a pure function of the segment configuration: management
//! header, serialized pool configuration, liveness table, pool metadata
//! array, then each pool's block array aligned to its declared alignment.
//! Every peer that knows the configuration computes identical offsets.

use std::mem::size_of;

use crate::error::Result;
use crate::memory::config::{PoolConfig, SegmentConfig};
use crate::memory::headers::{LivenessSlot, ManagementHeader, PoolHeader, CACHE_LINE_SIZE};
use crate::mempool::CHUNK_HEADER_SIZE;

/// Computed placement of one pool inside the segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLayout {
    /// Index of the pool within the collection
    pub pool_id: u32,
    /// Usable payload bytes per chunk
    pub block_size: u32,
    /// Payload alignment of this pool
    pub block_align: u32,
    /// Number of blocks
    pub block_count: u32,
    /// Segment-relative offset of the first block
    pub base_offset: u64,
    /// Distance between consecutive blocks
    pub stride: u64,
}

/// Complete placement of every region inside a segment
#[derive(Debug, Clone)]
pub struct SegmentLayout {
    /// Total segment size, page-aligned
    pub total_size: usize,
    /// Offset of the serialized pool configuration
    pub config_offset: usize,
    /// Length of the serialized pool configuration
    pub config_len: usize,
    /// Offset of the process-liveness table
    pub liveness_offset: usize,
    /// Offset of the pool metadata array
    pub pool_headers_offset: usize,
    /// Per-pool placements, in configuration order
    pub pools: Vec<PoolLayout>,
}

/// Round `value` up to the next multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Physical bytes occupied by one block of the given pool
///
/// A block is the chunk header, padding so the payload start satisfies the
/// pool alignment, and the payload capacity itself.
pub fn block_stride(pool: &PoolConfig) -> usize {
    let payload_align = (pool.block_align as usize).max(8);
    let payload_offset = align_up(CHUNK_HEADER_SIZE, payload_align);
    align_up(payload_offset + pool.block_size as usize, payload_align)
}

impl SegmentLayout {
    /// Compute the layout for a validated configuration
    pub fn compute(config: &SegmentConfig) -> Result<Self> {
        config.validate()?;

        let config_offset = align_up(size_of::<ManagementHeader>(), 8);
        let config_len = bincode::serialized_size(&config.pools)? as usize;

        let liveness_offset = align_up(config_offset + config_len, CACHE_LINE_SIZE);
        let liveness_len = config.max_processes as usize * size_of::<LivenessSlot>();

        let pool_headers_offset = align_up(liveness_offset + liveness_len, CACHE_LINE_SIZE);
        let mut offset = pool_headers_offset + config.pools.len() * size_of::<PoolHeader>();

        let mut pools = Vec::with_capacity(config.pools.len());
        for (pool_id, pool) in config.pools.iter().enumerate() {
            let block_align = (pool.block_align as usize).max(CACHE_LINE_SIZE);
            let stride = block_stride(pool);

            offset = align_up(offset, block_align);
            pools.push(PoolLayout {
                pool_id: pool_id as u32,
                block_size: pool.block_size,
                block_align: pool.block_align,
                block_count: pool.block_count,
                base_offset: offset as u64,
                stride: stride as u64,
            });
            offset += stride * pool.block_count as usize;
        }

        Ok(Self {
            total_size: align_up(offset, 4096),
            config_offset,
            config_len,
            liveness_offset,
            pool_headers_offset,
            pools,
        })
    }
}
