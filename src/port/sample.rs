//! RAII payload views over loaned and received chunks

use crate::mempool::{ChunkHeader, SharedChunk};

/// Writable sample held between `loan` and `publish`
///
/// Dropping an unpublished sample releases its chunk back to the pool.
#[derive(Debug)]
pub struct SampleMut {
    chunk: SharedChunk,
}

impl SampleMut {
    pub(crate) fn new(chunk: SharedChunk) -> Self {
        Self { chunk }
    }

    /// The chunk header backing this sample
    pub fn header(&self) -> &ChunkHeader {
        self.chunk.header()
    }

    /// The payload bytes, read-only
    pub fn payload(&self) -> &[u8] {
        self.chunk.payload()
    }

    /// The payload bytes, writable
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.chunk.payload_mut()
    }

    /// Copy `data` into the payload
    ///
    /// `data` must not exceed the loaned payload size.
    pub fn write_payload(&mut self, data: &[u8]) {
        let payload = self.chunk.payload_mut();
        crate::enforce!(
            data.len() <= payload.len(),
            "payload write exceeds the loaned size"
        );
        payload[..data.len()].copy_from_slice(data);
    }

    pub(crate) fn into_chunk(self) -> SharedChunk {
        self.chunk
    }
}

/// Read-only sample obtained from `try_take`
///
/// The sample stays valid until released (dropped); releasing the last
/// reference returns the block to its pool.
#[derive(Debug)]
pub struct Sample {
    chunk: SharedChunk,
}

impl Sample {
    pub(crate) fn new(chunk: SharedChunk) -> Self {
        Self { chunk }
    }

    /// The chunk header backing this sample
    pub fn header(&self) -> &ChunkHeader {
        self.chunk.header()
    }

    /// The payload bytes
    pub fn payload(&self) -> &[u8] {
        self.chunk.payload()
    }

    /// Publish sequence number stamped by the producing port
    pub fn sequence_number(&self) -> u64 {
        self.chunk.header().sequence_number()
    }

    /// Identity of the producing port
    pub fn origin_id(&self) -> u64 {
        self.chunk.header().origin_id()
    }
}
