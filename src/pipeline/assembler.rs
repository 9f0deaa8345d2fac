//! Groups transformed records into fixed-size chunks.

use crate::record::{Chunk, DomainRecord, Rejection};

/// Accumulates records in input order and emits a [`Chunk`] every `chunk_size`
/// records. Rejections are kept aside and never enter a chunk.
#[derive(Debug)]
pub struct ChunkAssembler {
    chunk_size: usize,
    next_index: u64,
    pending: Vec<DomainRecord>,
    rejections: Vec<Rejection>,
}

impl ChunkAssembler {
    /// Create an assembler. A zero size is treated as 1.
    pub fn new(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            next_index: 0,
            pending: Vec::with_capacity(chunk_size),
            rejections: Vec::new(),
        }
    }

    /// Add a successfully transformed record, returning a chunk once it is full.
    pub fn push(&mut self, record: DomainRecord) -> Option<Chunk> {
        self.pending.push(record);
        if self.pending.len() >= self.chunk_size {
            Some(self.seal())
        } else {
            None
        }
    }

    /// Set a rejected record aside.
    pub fn reject(&mut self, rejection: Rejection) {
        self.rejections.push(rejection);
    }

    /// Feed one transformer outcome.
    pub fn accept(&mut self, outcome: Result<DomainRecord, Rejection>) -> Option<Chunk> {
        match outcome {
            Ok(record) => self.push(record),
            Err(rejection) => {
                self.reject(rejection);
                None
            }
        }
    }

    /// Records waiting for the next chunk.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Chunks emitted so far.
    pub fn chunks_emitted(&self) -> u64 {
        self.next_index
    }

    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Flush the final, possibly short chunk and hand back the rejections.
    pub fn finish(mut self) -> (Option<Chunk>, Vec<Rejection>) {
        let last = if self.pending.is_empty() {
            None
        } else {
            Some(self.seal())
        };
        (last, self.rejections)
    }

    fn seal(&mut self) -> Chunk {
        let records = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_size));
        let chunk = Chunk::new(self.next_index, records);
        self.next_index += 1;
        chunk
    }
}
