//! Work distribution and scheduling for chunk writes.
//!
//! The scheduler pulls assembled chunks from a bounded channel and writes them
//! on async tasks, never running more than `concurrency` writes at once. When
//! every permit is taken, dispatch waits, the channel fills, and the reader
//! blocks. The first failed chunk halts dispatch; writes already in flight are
//! drained before the run returns.

use crate::pipeline::{ChunkFailure, ChunkProcessor, ChunkResult, Metrics, MetricsReporter};
use crate::record::Chunk;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum chunk writes in flight
    pub concurrency: usize,

    /// Enable progress reporting
    pub enable_metrics: bool,

    /// Metrics reporting interval in seconds
    pub metrics_interval_secs: u64,

    /// Optional path to save metrics JSON after run completes
    pub metrics_output_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            enable_metrics: true,
            metrics_interval_secs: 10,
            metrics_output_path: None,
        }
    }
}

/// Why dispatch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchEnd {
    Exhausted,
    Halted,
}

/// Scheduler for distributing chunk writes across async tasks.
pub struct Scheduler {
    /// Chunk processor
    processor: Arc<ChunkProcessor>,

    /// Metrics
    metrics: Arc<Metrics>,

    /// Configuration
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(processor: Arc<ChunkProcessor>, metrics: Arc<Metrics>, config: SchedulerConfig) -> Self {
        Self {
            processor,
            metrics,
            config,
        }
    }

    /// Write every chunk received on `chunks` until the channel closes or
    /// `halt` is cancelled.
    ///
    /// A failed chunk cancels `halt` itself, so other holders of the token
    /// (the reader) stop as well.
    pub async fn run(&self, mut chunks: mpsc::Receiver<Chunk>, halt: CancellationToken) -> SchedulerStats {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!("Dispatching chunks ({} concurrent)", concurrency);

        // Start metrics reporter if enabled
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let reporter_handle = if self.config.enable_metrics {
            let reporter = MetricsReporter::new(self.metrics.clone(), self.config.metrics_interval_secs);
            Some(tokio::spawn(reporter.run(shutdown_rx)))
        } else {
            drop(shutdown_rx);
            None
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks: JoinSet<Result<ChunkResult, ChunkFailure>> = JoinSet::new();
        let mut stats = SchedulerStats::default();

        let end = 'dispatch: loop {
            tokio::select! {
                biased;
                _ = halt.cancelled() => break 'dispatch DispatchEnd::Halted,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    stats.record(joined, &halt);
                }
                next = chunks.recv() => {
                    let Some(chunk) = next else {
                        break 'dispatch DispatchEnd::Exhausted;
                    };

                    let permit = tokio::select! {
                        biased;
                        _ = halt.cancelled() => {
                            stats.chunks_undispatched += 1;
                            break 'dispatch DispatchEnd::Halted;
                        }
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => {
                                stats.chunks_undispatched += 1;
                                break 'dispatch DispatchEnd::Halted;
                            }
                        },
                    };

                    tracing::debug!("Dispatching chunk {} ({} records)", chunk.index(), chunk.len());
                    self.metrics.add_chunk_dispatched();
                    stats.chunks_dispatched += 1;

                    let processor = self.processor.clone();
                    let halt = halt.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let result = processor.process_chunk_with_retry(chunk).await;
                        if result.is_err() {
                            halt.cancel();
                        }
                        result
                    });
                }
            }
        };

        // Closing the receiver unblocks a reader waiting on a full channel
        chunks.close();
        stats.halted = end == DispatchEnd::Halted;
        if stats.halted {
            while chunks.try_recv().is_ok() {
                stats.chunks_undispatched += 1;
            }
            tracing::warn!(
                "Dispatch halted, draining {} in-flight chunk write(s)",
                tasks.len()
            );
        }

        while let Some(joined) = tasks.join_next().await {
            stats.record(joined, &halt);
        }
        stats.failures.sort_by_key(|failure| failure.index);

        // Shutdown metrics reporter
        let _ = shutdown_tx.send(()).await;
        if let Some(handle) = reporter_handle {
            let _ = handle.await;
        }

        // Print final summary and optionally save to file
        if self.config.enable_metrics {
            let reporter = MetricsReporter::new(self.metrics.clone(), self.config.metrics_interval_secs);
            reporter.print_summary();

            if let Some(ref path) = self.config.metrics_output_path {
                let snapshot = self.metrics.snapshot();
                if let Err(e) = snapshot.save_to_file(path) {
                    tracing::warn!("Failed to save metrics to {}: {}", path, e);
                }
            }
        }

        tracing::info!("Dispatch finished: {}", stats);
        stats
    }
}

/// Statistics from a scheduler run.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Chunks handed to a writer
    pub chunks_dispatched: usize,

    /// Chunks committed
    pub chunks_written: usize,

    /// Records committed
    pub records_written: u64,

    /// Chunks received but never dispatched
    pub chunks_undispatched: usize,

    /// Failed chunks, ordered by chunk index
    pub failures: Vec<ChunkFailure>,

    /// Writer tasks that panicked
    pub panicked: usize,

    /// Dispatch stopped before the channel was exhausted
    pub halted: bool,
}

impl SchedulerStats {
    /// True when every dispatched chunk was committed.
    pub fn all_written(&self) -> bool {
        self.failures.is_empty() && self.panicked == 0
    }

    fn record(&mut self, joined: Result<Result<ChunkResult, ChunkFailure>, JoinError>, halt: &CancellationToken) {
        match joined {
            Ok(Ok(result)) => {
                self.chunks_written += 1;
                self.records_written += result.records as u64;
            }
            Ok(Err(failure)) => self.failures.push(failure),
            Err(e) => {
                tracing::error!("Chunk writer task failed: {}", e);
                self.panicked += 1;
                halt.cancel();
            }
        }
    }
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dispatched: {}, Written: {} ({} records), Failed: {}, Undispatched: {}",
            self.chunks_dispatched,
            self.chunks_written,
            self.records_written,
            self.failures.len() + self.panicked,
            self.chunks_undispatched
        )
    }
}
