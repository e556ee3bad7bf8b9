//! Chunk headers, tokens and the reference-counted chunk handle

use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::enforce;
use crate::fault::{fatal, FatalKind};
use crate::memory::RuntimeId;
use crate::mempool::collection::MemPoolCollection;

/// Version byte at offset 0 of every chunk header
pub const CHUNK_HEADER_VERSION: u8 = 1;

/// Size of the fixed-layout chunk header in bytes
pub const CHUNK_HEADER_SIZE: usize = 64;

/// Fixed-layout prefix of every block in a chunk pool
///
/// The header lives in shared memory, directly in front of the payload it
/// describes, so every process observing the chunk sees the same reference
/// count and owner bitmap.
#[repr(C)]
#[derive(Debug)]
pub struct ChunkHeader {
    version: u8,
    _reserved: [u8; 3],
    /// Physical bytes of the whole block (header + padding + payload area)
    chunk_size: u32,
    user_payload_size: u32,
    user_payload_alignment: u32,
    /// Identity of the publisher port that produced this chunk
    origin_id: u64,
    /// Monotonically increasing per origin
    sequence_number: u64,
    /// Cross-process reference count
    reference_count: AtomicU32,
    pool_id: u32,
    chunk_index: u32,
    /// Offset of an optional user header; 0 when absent
    user_header_offset: i32,
    /// Offset of the payload, relative to the header start
    user_payload_offset: i32,
    _pad0: u32,
    /// One bit per runtime that currently holds a reference
    owner_bitmap: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<ChunkHeader>() == CHUNK_HEADER_SIZE);

impl ChunkHeader {
    /// Write a fresh header into a block
    ///
    /// # Safety
    /// `ptr` must point at the start of a block just acquired from its pool,
    /// with at least `chunk_size` writable bytes behind it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) unsafe fn initialize(
        ptr: NonNull<ChunkHeader>,
        chunk_size: u32,
        user_payload_size: u32,
        user_payload_alignment: u32,
        user_payload_offset: i32,
        origin_id: u64,
        pool_id: u32,
        chunk_index: u32,
    ) {
        std::ptr::write(
            ptr.as_ptr(),
            ChunkHeader {
                version: CHUNK_HEADER_VERSION,
                _reserved: [0; 3],
                chunk_size,
                user_payload_size,
                user_payload_alignment,
                origin_id,
                sequence_number: 0,
                reference_count: AtomicU32::new(1),
                pool_id,
                chunk_index,
                user_header_offset: 0,
                user_payload_offset,
                _pad0: 0,
                owner_bitmap: AtomicU64::new(0),
            },
        );
    }

    /// Abort if the header does not carry the expected version byte
    pub(crate) fn validate(&self) {
        if self.version != CHUNK_HEADER_VERSION {
            fatal(FatalKind::Corruption, "chunk header version mismatch");
        }
    }

    /// Header format version
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Physical size of the backing block
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Bytes of payload the producer declared
    pub fn user_payload_size(&self) -> u32 {
        self.user_payload_size
    }

    /// Alignment the producer requested for the payload
    pub fn user_payload_alignment(&self) -> u32 {
        self.user_payload_alignment
    }

    /// Identity of the producing publisher port
    pub fn origin_id(&self) -> u64 {
        self.origin_id
    }

    /// Publish sequence number, monotonic per origin
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Current cross-process reference count
    pub fn reference_count(&self) -> u32 {
        self.reference_count.load(Ordering::Acquire)
    }

    /// Pool this chunk was carved from
    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }

    /// Block index within its pool
    pub fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    /// Owner bitmap snapshot, one bit per runtime
    pub fn owner_bitmap(&self) -> u64 {
        self.owner_bitmap.load(Ordering::Acquire)
    }

    /// Offset of the optional user header; 0 when absent
    pub fn user_header_offset(&self) -> i32 {
        self.user_header_offset
    }

    /// Offset of the payload relative to the header start
    pub fn user_payload_offset(&self) -> i32 {
        self.user_payload_offset
    }

    /// Token addressing this chunk from any process
    pub fn token(&self) -> ChunkToken {
        ChunkToken::new(self.pool_id, self.chunk_index)
    }

    /// Stamp origin and sequence; called exactly once, before fan-out
    pub(crate) fn stamp(&mut self, origin_id: u64, sequence_number: u64) {
        self.origin_id = origin_id;
        self.sequence_number = sequence_number;
    }

    pub(crate) fn payload_ptr(&self) -> *mut u8 {
        let base = self as *const ChunkHeader as *mut u8;
        unsafe { base.add(self.user_payload_offset as usize) }
    }

    pub(crate) fn reference_count_atomic(&self) -> &AtomicU32 {
        &self.reference_count
    }

    pub(crate) fn owner_bitmap_atomic(&self) -> &AtomicU64 {
        &self.owner_bitmap
    }
}

/// Packed `(pool, index)` chunk reference that crosses process boundaries
///
/// Eight bits of pool id, twenty-four bits of block index; the whole token
/// fits the 32-bit value slots of the delivery queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkToken(u32);

impl ChunkToken {
    const INDEX_BITS: u32 = 24;
    const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    /// Pack a pool id and block index into a token
    pub fn new(pool_id: u32, index: u32) -> Self {
        enforce!(pool_id < 256, "pool id does not fit the token encoding");
        enforce!(
            index <= Self::INDEX_MASK,
            "chunk index does not fit the token encoding"
        );
        Self((pool_id << Self::INDEX_BITS) | index)
    }

    /// Reinterpret a raw queue value as a token
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw value for queue transport
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Pool id component
    pub fn pool_id(&self) -> u32 {
        self.0 >> Self::INDEX_BITS
    }

    /// Block index component
    pub fn index(&self) -> u32 {
        self.0 & Self::INDEX_MASK
    }
}

/// Process-local handle over a reference-counted chunk
///
/// Dropping the handle releases its reference; the final release returns
/// the block to its originating pool.
#[derive(Debug)]
pub struct SharedChunk {
    header: NonNull<ChunkHeader>,
    pools: Arc<MemPoolCollection>,
    /// Owner-bitmap bit this handle maintains, if it is process-owned
    owner_bit: Option<u64>,
}

unsafe impl Send for SharedChunk {}
unsafe impl Sync for SharedChunk {}

impl SharedChunk {
    /// Wrap a freshly initialized chunk (reference count already 1)
    pub(crate) fn from_new(
        header: NonNull<ChunkHeader>,
        pools: Arc<MemPoolCollection>,
        owner: RuntimeId,
    ) -> Self {
        let bit = owner.bit();
        unsafe { header.as_ref() }
            .owner_bitmap_atomic()
            .fetch_or(bit, Ordering::AcqRel);
        Self {
            header,
            pools,
            owner_bit: Some(bit),
        }
    }

    /// Reconstruct a handle from a queue token, acquiring process ownership
    ///
    /// The reference already belongs to the queue slot the token came from;
    /// ownership transfers to the new handle without touching the count.
    pub(crate) fn from_token_owned(
        token: ChunkToken,
        pools: Arc<MemPoolCollection>,
        owner: RuntimeId,
    ) -> Self {
        let header = pools.header_for_token(token);
        let bit = owner.bit();
        unsafe { header.as_ref() }
            .owner_bitmap_atomic()
            .fetch_or(bit, Ordering::AcqRel);
        Self {
            header,
            pools,
            owner_bit: Some(bit),
        }
    }

    /// Reconstruct a handle for an in-flight reference nobody owns yet
    ///
    /// Used for queue-internal transfers (displaced overflow samples,
    /// fan-out duplicates); no owner bit is maintained.
    pub(crate) fn from_token_unowned(token: ChunkToken, pools: Arc<MemPoolCollection>) -> Self {
        let header = pools.header_for_token(token);
        Self {
            header,
            pools,
            owner_bit: None,
        }
    }

    /// Create an additional unowned reference to the same chunk
    pub(crate) fn duplicate_unowned(&self) -> Self {
        self.header()
            .reference_count_atomic()
            .fetch_add(1, Ordering::AcqRel);
        Self {
            header: self.header,
            pools: Arc::clone(&self.pools),
            owner_bit: None,
        }
    }

    /// Add `n` references in one atomic operation (fan-out accounting)
    pub(crate) fn add_references(&self, n: u32) {
        self.header()
            .reference_count_atomic()
            .fetch_add(n, Ordering::AcqRel);
    }

    /// Drop one reference without consuming a handle (fan-out compensation)
    pub(crate) fn remove_reference(&self) {
        let prev = self
            .header()
            .reference_count_atomic()
            .fetch_sub(1, Ordering::AcqRel);
        if prev <= 1 {
            fatal(
                FatalKind::Corruption,
                "fan-out compensation dropped the last chunk reference",
            );
        }
    }

    /// Consume the handle, transferring its reference into a queue slot
    pub(crate) fn into_token(self) -> ChunkToken {
        let token = self.header().token();
        std::mem::forget(self);
        token
    }

    /// The shared header of this chunk
    pub fn header(&self) -> &ChunkHeader {
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn header_mut(&mut self) -> &mut ChunkHeader {
        unsafe { self.header.as_mut() }
    }

    /// Token addressing this chunk from any process
    pub fn token(&self) -> ChunkToken {
        self.header().token()
    }

    /// The payload bytes of this chunk
    pub fn payload(&self) -> &[u8] {
        let header = self.header();
        unsafe {
            std::slice::from_raw_parts(header.payload_ptr(), header.user_payload_size() as usize)
        }
    }

    /// The payload bytes of this chunk, writable
    ///
    /// Only meaningful while the chunk is exclusively loaned; after publish
    /// the payload is immutable.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header = self.header();
        unsafe {
            std::slice::from_raw_parts_mut(
                header.payload_ptr(),
                header.user_payload_size() as usize,
            )
        }
    }
}

impl Drop for SharedChunk {
    fn drop(&mut self) {
        let header = unsafe { self.header.as_ref() };
        let prev = header.reference_count_atomic().fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            fatal(FatalKind::Corruption, "chunk reference count underflow");
        }
        if prev == 1 {
            // Last reference anywhere: all prior payload accesses must be
            // visible before the block re-enters the free list.
            fence(Ordering::Acquire);
            header.owner_bitmap_atomic().store(0, Ordering::Relaxed);
            self.pools
                .release_block(header.pool_id(), header.chunk_index());
        } else if let Some(bit) = self.owner_bit {
            header.owner_bitmap_atomic().fetch_and(!bit, Ordering::AcqRel);
        }
    }
}
