//! In-segment header structures shared between processes

use std::sync::atomic::{AtomicU32, AtomicU64};

use crate::error::{FloeError, Result};

/// Magic number identifying a Floe segment ("FLOE" "SEG" + format byte)
pub const SEGMENT_MAGIC: u64 = 0x464C_4F45_5345_4701;

/// Layout version; bumped on every breaking change to the on-segment format
pub const LAYOUT_VERSION: u32 = 1;

/// Magic number of each pool metadata header
pub const POOL_MAGIC: u32 = 0x464C_504C;

/// Cache line size used to pad shared hot fields
pub const CACHE_LINE_SIZE: usize = 64;

/// Management header at offset 0 of every segment
///
/// Written once by the creating broker before any peer maps the segment;
/// read-only afterwards.
#[repr(C)]
#[derive(Debug)]
pub struct ManagementHeader {
    /// Magic number for validation
    pub magic: u64,
    /// Layout version
    pub version: u32,
    /// Identifier the broker assigned to this segment
    pub segment_id: u32,
    /// Hash of the layout-relevant configuration
    pub config_hash: u64,
    /// Total mapped size in bytes
    pub total_size: u64,
    /// Number of chunk pools
    pub pool_count: u32,
    /// Capacity of the process-liveness table
    pub process_capacity: u32,
    /// Offset of the serialized pool configuration
    pub config_offset: u64,
    /// Length of the serialized pool configuration
    pub config_len: u64,
    /// Offset of the process-liveness table
    pub liveness_offset: u64,
    /// Offset of the pool metadata array
    pub pool_headers_offset: u64,
    /// Keep-alive stamping interval in nanoseconds
    pub keep_alive_interval_ns: u64,
    /// Interval without a stamp after which a process counts as dead
    pub dead_interval_ns: u64,
}

impl ManagementHeader {
    /// Validate magic, version and size against the actual mapping
    pub fn validate(&self, mapped_size: usize) -> Result<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(FloeError::invalid_parameter(
                "magic",
                "Not a Floe segment (bad magic number)",
            ));
        }
        if self.version != LAYOUT_VERSION {
            return Err(FloeError::invalid_parameter(
                "version",
                format!("Unsupported segment layout version {}", self.version),
            ));
        }
        if self.total_size as usize > mapped_size {
            return Err(FloeError::invalid_parameter(
                "total_size",
                "Segment header claims more bytes than are mapped",
            ));
        }
        Ok(())
    }
}

/// Per-pool metadata header inside the segment
///
/// The free list head packs `(generation, index)` into one atomic so a
/// single 64-bit compare-and-swap covers the ABA problem.
#[repr(C)]
#[derive(Debug)]
pub struct PoolHeader {
    /// Magic number for validation
    pub magic: u32,
    /// Index of this pool within the collection
    pub pool_id: u32,
    /// Usable payload bytes per chunk
    pub block_size: u32,
    /// Payload alignment guaranteed by this pool
    pub block_align: u32,
    /// Number of blocks in this pool
    pub block_count: u32,
    /// Padding for field alignment
    pub _pad0: u32,
    /// Segment-relative offset of the first block
    pub base_offset: u64,
    /// Distance between consecutive blocks in bytes
    pub stride: u64,
    /// LIFO free list head: `(generation << 32) | index`
    pub free_head: AtomicU64,
    /// Number of blocks currently on the free list
    pub free_count: AtomicU32,
    /// Padding for field alignment
    pub _pad1: u32,
}

/// One entry of the process-liveness table
///
/// Slot index equals the runtime id of the claiming process. Padded to a
/// cache line so keep-alive stamping of one process never contends with
/// another.
#[repr(C)]
pub struct LivenessSlot {
    /// 0 = free, 1 = claimed
    pub state: AtomicU32,
    /// OS process id of the claimant
    pub pid: AtomicU32,
    /// Monotonic timestamp of the last keep-alive
    pub last_alive_ns: AtomicU64,
    _pad: [u8; CACHE_LINE_SIZE - 16],
}

impl LivenessSlot {
    /// Slot state: unclaimed
    pub const FREE: u32 = 0;
    /// Slot state: owned by a registered process
    pub const CLAIMED: u32 = 1;
}

const _: () = assert!(std::mem::size_of::<LivenessSlot>() == CACHE_LINE_SIZE);
