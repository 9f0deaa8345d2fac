//! Chunk sink abstraction.

use crate::error::SinkError;
use crate::record::{Chunk, DomainRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

/// Persists a chunk as one atomic unit.
///
/// Implementations are shared by all concurrent writers and must be thread-safe.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Store every record of `chunk` or none of them.
    ///
    /// Returns the assigned identifiers in record order.
    async fn write_chunk(&self, chunk: &Chunk) -> Result<Vec<i32>, SinkError>;
}

/// Sink that keeps records in memory.
///
/// Used for dry runs, where `retain` is false and only ids are handed out.
pub struct MemorySink {
    next_id: AtomicI32,
    retain: bool,
    records: Mutex<Vec<DomainRecord>>,
}

impl MemorySink {
    /// Sink that stores every record it receives.
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
            retain: true,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Sink that accepts records without storing them.
    pub fn discarding() -> Self {
        Self {
            retain: false,
            ..Self::new()
        }
    }

    /// Stored records, in write-acknowledgement order.
    pub fn records(&self) -> Vec<DomainRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkSink for MemorySink {
    async fn write_chunk(&self, chunk: &Chunk) -> Result<Vec<i32>, SinkError> {
        if let Some(record) = chunk.records().iter().find(|r| r.id.is_some()) {
            return Err(SinkError::ConstraintViolation(format!(
                "record {} {} already carries an id",
                record.first_name, record.last_name
            )));
        }

        let count = i32::try_from(chunk.len())
            .map_err(|_| SinkError::Storage(format!("chunk {} too large", chunk.index())))?;
        let first = self.next_id.fetch_add(count, Ordering::Relaxed);
        let end = first
            .checked_add(count)
            .filter(|_| first > 0)
            .ok_or_else(|| SinkError::Storage("id space exhausted".to_string()))?;
        let ids: Vec<i32> = (first..end).collect();

        if self.retain {
            let mut records = self
                .records
                .lock()
                .map_err(|_| SinkError::Storage("memory sink poisoned".to_string()))?;
            records.extend(chunk.records().iter().zip(&ids).map(|(record, id)| DomainRecord {
                id: Some(*id),
                ..record.clone()
            }));
        }

        Ok(ids)
    }
}
