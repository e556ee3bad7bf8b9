//! Ordered set of chunk pools with size-class selection

use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{FloeError, Result};
use crate::fault::{fatal, FatalKind};
use crate::memory::headers::POOL_MAGIC;
use crate::memory::layout::{align_up, SegmentLayout};
use crate::memory::{RuntimeId, SharedMemorySegment};
use crate::mempool::chunk::{ChunkHeader, ChunkToken, SharedChunk, CHUNK_HEADER_SIZE};
use crate::mempool::pool::MemPool;

/// Snapshot of one pool's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Usable payload bytes per chunk
    pub block_size: u32,
    /// Number of blocks in the pool
    pub block_count: u32,
    /// Blocks currently on the free list
    pub free_blocks: u32,
}

/// All chunk pools of one segment, sorted by strictly increasing block size
///
/// Selection picks the smallest pool whose payload capacity and alignment
/// satisfy the request. A request never falls back to a larger pool when its
/// chosen pool is exhausted; predictability wins over utilization.
#[derive(Debug)]
pub struct MemPoolCollection {
    segment: Arc<SharedMemorySegment>,
    pools: Vec<MemPool>,
}

impl MemPoolCollection {
    /// Creator side: write the pool headers from the layout and link the
    /// free lists
    pub(crate) fn create(
        segment: Arc<SharedMemorySegment>,
        layout: &SegmentLayout,
    ) -> Result<Arc<Self>> {
        let base = segment.base_ptr();
        let mut pools = Vec::with_capacity(layout.pools.len());
        for (index, pool_layout) in layout.pools.iter().enumerate() {
            let header = segment.pool_header_ptr(index);
            pools.push(unsafe { MemPool::initialize(header, base, pool_layout) });
        }
        Ok(Arc::new(Self { segment, pools }))
    }

    /// Peer side: build views over the pool headers the creator wrote
    pub(crate) fn open(segment: Arc<SharedMemorySegment>) -> Result<Arc<Self>> {
        let base = segment.base_ptr();
        let pool_count = segment.management().pool_count as usize;
        let mut pools = Vec::with_capacity(pool_count);
        for index in 0..pool_count {
            let header = segment.pool_header_ptr(index);
            if unsafe { header.as_ref() }.magic != POOL_MAGIC {
                return Err(FloeError::invalid_parameter(
                    "pool",
                    format!("Pool header {} carries a bad magic number", index),
                ));
            }
            pools.push(unsafe { MemPool::from_raw(header, base) });
        }
        Ok(Arc::new(Self { segment, pools }))
    }

    /// The segment this collection lives in
    pub fn segment(&self) -> &Arc<SharedMemorySegment> {
        &self.segment
    }

    /// Number of pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Payload capacity of the largest pool
    pub fn largest_payload(&self) -> usize {
        self.pools.last().map(|p| p.block_size() as usize).unwrap_or(0)
    }

    fn pool(&self, pool_id: u32) -> &MemPool {
        match self.pools.get(pool_id as usize) {
            Some(pool) => pool,
            None => fatal(FatalKind::Corruption, "chunk references an unknown pool"),
        }
    }

    /// Binary search for the smallest pool satisfying size and alignment
    fn select_pool(&self, payload_size: usize, payload_align: usize) -> Option<&MemPool> {
        let start = self
            .pools
            .partition_point(|p| (p.block_size() as usize) < payload_size);
        self.pools[start..]
            .iter()
            .find(|p| p.block_align() as usize >= payload_align)
    }

    /// Allocate a chunk for `payload_size` bytes with `payload_align`
    ///
    /// Fails with `OversizeRequest` when no pool fits the request and with
    /// `Exhausted` when the chosen pool has no free block left.
    pub(crate) fn allocate_chunk(
        self: &Arc<Self>,
        payload_size: usize,
        payload_align: usize,
        origin_id: u64,
        owner: RuntimeId,
    ) -> Result<SharedChunk> {
        if !payload_align.is_power_of_two() {
            return Err(FloeError::invalid_parameter(
                "payload_align",
                "Payload alignment must be a power of two",
            ));
        }

        let pool = self
            .select_pool(payload_size, payload_align)
            .ok_or_else(|| FloeError::oversize(payload_size, self.largest_payload()))?;

        let index = pool
            .acquire_block()
            .ok_or_else(|| FloeError::exhausted(format!("chunk pool ({} B)", pool.block_size())))?;

        let block = pool.block_at(index);
        let payload_offset = align_up(CHUNK_HEADER_SIZE, (pool.block_align() as usize).max(8));
        let header = unsafe { NonNull::new_unchecked(block as *mut ChunkHeader) };
        unsafe {
            ChunkHeader::initialize(
                header,
                pool.stride() as u32,
                payload_size as u32,
                payload_align as u32,
                payload_offset as i32,
                origin_id,
                pool.pool_id(),
                index,
            );
        }
        Ok(SharedChunk::from_new(header, Arc::clone(self), owner))
    }

    /// Return a block to its pool; called on the final reference drop
    pub(crate) fn release_block(&self, pool_id: u32, index: u32) {
        self.pool(pool_id).release_block(index);
    }

    /// Resolve a token to its chunk header, validating the header version
    ///
    /// Tokens travel between processes, so resolution goes through the
    /// segment-relative addressing layer rather than trusting any local
    /// pointer arithmetic.
    pub(crate) fn header_for_token(&self, token: ChunkToken) -> NonNull<ChunkHeader> {
        let pool = self.pool(token.pool_id());
        let pointer = self.segment.relative(pool.block_offset(token.index()));
        let block = match self.segment.resolve(pointer) {
            Some(block) => block,
            None => fatal(FatalKind::Corruption, "chunk token outside its segment"),
        };
        let header = unsafe { NonNull::new_unchecked(block as *mut ChunkHeader) };
        unsafe { header.as_ref() }.validate();
        header
    }

    /// Raw chunk header access for maintenance sweeps
    pub(crate) fn raw_header(&self, pool_id: u32, index: u32) -> NonNull<ChunkHeader> {
        let block = self.pool(pool_id).block_at(index);
        unsafe { NonNull::new_unchecked(block as *mut ChunkHeader) }
    }

    /// Per-pool occupancy snapshot
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|p| PoolStats {
                block_size: p.block_size(),
                block_count: p.block_count(),
                free_blocks: p.free_blocks(),
            })
            .collect()
    }

    /// Whether every block of every pool is back on its free list
    pub fn is_fully_free(&self) -> bool {
        self.pools
            .iter()
            .all(|p| p.free_blocks() == p.block_count())
    }

    pub(crate) fn pools(&self) -> &[MemPool] {
        &self.pools
    }
}
