//! Throughput monitoring and metrics collection.

use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::interval;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Metrics for an import run.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Data lines read from the source
    pub records_read: AtomicU64,

    /// Records rejected by the reader or transformer
    pub records_rejected: AtomicU64,

    /// Records persisted
    pub records_written: AtomicU64,

    /// Chunks handed to a writer
    pub chunks_dispatched: AtomicU64,

    /// Chunks committed
    pub chunks_written: AtomicU64,

    /// Chunks that failed permanently
    pub chunks_failed: AtomicU64,

    /// Chunk write attempts that were retried
    pub write_retries: AtomicU64,

    /// Chunk writes currently executing
    pub writes_in_flight: AtomicU64,

    /// Highest value `writes_in_flight` reached
    pub peak_writes_in_flight: AtomicU64,

    /// Time spent in chunk writes (microseconds, summed across tasks)
    pub write_us: AtomicU64,

    /// Start time
    start_time: Option<Instant>,
}

impl Metrics {
    /// Create new metrics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        })
    }

    /// Record a line read from the source.
    pub fn add_record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected line.
    pub fn add_rejection(&self) {
        self.records_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a chunk leaving the dispatcher.
    pub fn add_chunk_dispatched(&self) {
        self.chunks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed chunk of `records` records.
    pub fn add_chunk_written(&self, records: u64) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.records_written.fetch_add(records, Ordering::Relaxed);
    }

    /// Record a permanently failed chunk.
    pub fn add_chunk_failed(&self) {
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retried write attempt.
    pub fn add_write_retry(&self) {
        self.write_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record time spent writing a chunk.
    pub fn add_write_time(&self, duration: Duration) {
        self.write_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Mark a chunk write as started.
    pub fn begin_write(&self) {
        let current = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_writes_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    /// Mark a chunk write as finished.
    pub fn end_write(&self) {
        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    /// Get records written per second.
    pub fn records_per_second(&self) -> f64 {
        let records = self.records_written.load(Ordering::Relaxed);
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            records as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            write_retries: self.write_retries.load(Ordering::Relaxed),
            peak_writes_in_flight: self.peak_writes_in_flight.load(Ordering::SeqCst),
            elapsed: self.elapsed(),
            records_per_second: self.records_per_second(),
            write_secs: self.write_us.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub records_read: u64,
    pub records_rejected: u64,
    pub records_written: u64,
    pub chunks_dispatched: u64,
    pub chunks_written: u64,
    pub chunks_failed: u64,
    pub write_retries: u64,
    pub peak_writes_in_flight: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub records_per_second: f64,
    /// Total time spent in chunk writes (seconds, summed across tasks)
    pub write_secs: f64,
}

impl MetricsSnapshot {
    /// Save metrics to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Metrics saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Records: {} read, {} rejected, {} written | \
             Chunks: {} dispatched, {} written, {} failed | \
             Retries: {} | Peak in flight: {} | Rate: {:.1} records/s | Elapsed: {:.1}s",
            self.records_read,
            self.records_rejected,
            self.records_written,
            self.chunks_dispatched,
            self.chunks_written,
            self.chunks_failed,
            self.write_retries,
            self.peak_writes_in_flight,
            self.records_per_second,
            self.elapsed.as_secs_f64(),
        )
    }
}

/// Periodic metrics reporter.
pub struct MetricsReporter {
    metrics: Arc<Metrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    /// Create a new metrics reporter.
    pub fn new(metrics: Arc<Metrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporter.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(Duration::from_secs(self.interval_secs.max(1)));
        // the first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tracing::info!("{}", self.metrics.snapshot());
                }
                _ = shutdown.recv() => {
                    tracing::info!("Final: {}", self.metrics.snapshot());
                    break;
                }
            }
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.metrics.snapshot();

        println!("\n=== Import Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Records read: {}", snapshot.records_read);
        println!("Records rejected: {}", snapshot.records_rejected);
        println!("Records written: {}", snapshot.records_written);
        println!("Chunks written: {}", snapshot.chunks_written);
        println!("Chunks failed: {}", snapshot.chunks_failed);
        println!("Write retries: {}", snapshot.write_retries);
        println!("Peak concurrent writes: {}", snapshot.peak_writes_in_flight);
        println!("Write rate: {:.1} records/s", snapshot.records_per_second);
        if snapshot.chunks_written > 0 {
            println!(
                "Avg chunk write: {:.3}s",
                snapshot.write_secs / snapshot.chunks_written as f64
            );
        }
        println!("======================\n");
    }
}
