//! Per-chunk write with bounded retry.

use crate::config::RetryConfig;
use crate::error::SinkError;
use crate::io::ChunkSink;
use crate::pipeline::Metrics;
use crate::record::Chunk;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Writes individual chunks to the sink.
pub struct ChunkProcessor {
    /// Destination for chunks
    sink: Arc<dyn ChunkSink>,

    /// Metrics collector
    metrics: Arc<Metrics>,

    /// Retry policy for transient sink failures
    retry: RetryConfig,
}

impl ChunkProcessor {
    /// Create a new chunk processor.
    pub fn new(sink: Arc<dyn ChunkSink>, metrics: Arc<Metrics>, retry: RetryConfig) -> Self {
        Self {
            sink,
            metrics,
            retry,
        }
    }

    /// Write a chunk once.
    pub async fn process_chunk(&self, chunk: &Chunk) -> Result<ChunkResult, SinkError> {
        let start = Instant::now();
        self.metrics.begin_write();
        let result = self.sink.write_chunk(chunk).await;
        self.metrics.end_write();
        self.metrics.add_write_time(start.elapsed());

        let ids = result?;
        Ok(ChunkResult {
            index: chunk.index(),
            records: ids.len(),
            first_id: ids.first().copied(),
            last_id: ids.last().copied(),
        })
    }

    /// Write a chunk, retrying retryable failures with exponential backoff.
    ///
    /// The chunk is consumed; it is dropped once the sink acknowledges or the
    /// final attempt fails.
    pub async fn process_chunk_with_retry(&self, chunk: Chunk) -> Result<ChunkResult, ChunkFailure> {
        let max_retries = self.retry.max_retries;
        let mut backoff = self.retry.initial_backoff_ms;
        let mut attempt: usize = 0;

        loop {
            attempt += 1;
            match self.process_chunk(&chunk).await {
                Ok(result) => {
                    self.metrics.add_chunk_written(result.records as u64);
                    tracing::debug!(
                        "Chunk {} committed ({} records, attempt {})",
                        chunk.index(),
                        result.records,
                        attempt
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() && attempt <= max_retries => {
                    self.metrics.add_write_retry();
                    tracing::warn!(
                        "Chunk {} attempt {} failed: {}, retrying in {}ms",
                        chunk.index(),
                        attempt,
                        e,
                        backoff
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = next_backoff(backoff, self.retry.max_backoff_ms);
                }
                Err(e) => {
                    self.metrics.add_chunk_failed();
                    tracing::error!(
                        "Chunk {} failed after {} attempt(s): {}",
                        chunk.index(),
                        attempt,
                        e
                    );
                    return Err(ChunkFailure {
                        index: chunk.index(),
                        records: chunk.len(),
                        attempts: attempt,
                        error: e,
                    });
                }
            }
        }
    }
}

/// Double the backoff, capped at `max_ms`.
fn next_backoff(current_ms: u64, max_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(max_ms)
}

/// A committed chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResult {
    /// Chunk sequence index
    pub index: u64,
    /// Records persisted
    pub records: usize,
    /// First identifier assigned by the store
    pub first_id: Option<i32>,
    /// Last identifier assigned by the store
    pub last_id: Option<i32>,
}

/// A chunk that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFailure {
    /// Chunk sequence index
    pub index: u64,
    /// Records lost with the chunk
    pub records: usize,
    /// Attempts made, including the first
    pub attempts: usize,
    /// Error from the last attempt
    pub error: SinkError,
}

impl std::fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chunk {} ({} records) failed after {} attempt(s): {}",
            self.index, self.records, self.attempts, self.error
        )
    }
}
