//! Job controller: runs reader, transformer, assembler and writers end to end.

use crate::config::{Config, RetryConfig};
use crate::error::SourceError;
use crate::io::{ChunkSink, CsvSource, SourceOptions};
use crate::pipeline::{
    ChunkAssembler, ChunkFailure, ChunkProcessor, Metrics, MetricsSnapshot, Scheduler, SchedulerConfig,
    SchedulerStats,
};
use crate::record::{Chunk, Rejection};
use crate::transform::{transform, Stamper};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Assembled chunks waiting for a free writer.
const CHUNK_BUFFER: usize = 1;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Created,
            1 => JobState::Running,
            2 => JobState::Succeeded,
            _ => JobState::Failed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            JobState::Created => 0,
            JobState::Running => 1,
            JobState::Succeeded => 2,
            JobState::Failed => 3,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Settings for a single job.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Reader settings
    pub source: SourceOptions,

    /// Records per chunk
    pub chunk_size: usize,

    /// Writer concurrency and reporting
    pub scheduler: SchedulerConfig,

    /// Retry policy for chunk writes
    pub retry: RetryConfig,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            source: SourceOptions::default(),
            chunk_size: 1000,
            scheduler: SchedulerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        let processing = &config.processing;
        Self {
            source: SourceOptions::from(&config.input),
            chunk_size: processing.chunk_size,
            scheduler: SchedulerConfig {
                concurrency: processing.concurrency,
                enable_metrics: processing.enable_metrics,
                metrics_interval_secs: processing.metrics_interval_secs,
                metrics_output_path: processing.metrics_output_path.clone(),
            },
            retry: processing.retry.clone(),
        }
    }
}

/// Terminal outcome of a job.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// `Succeeded` or `Failed`
    pub status: JobState,

    /// Data lines read
    pub records_read: u64,

    /// Records persisted
    pub written: u64,

    /// Chunks committed
    pub chunks_written: usize,

    /// Records skipped by the reader or transformer, in input order
    pub rejections: Vec<Rejection>,

    /// Chunks that failed, ordered by chunk index
    pub failed_chunks: Vec<ChunkFailure>,

    /// The job was cancelled before it completed
    pub cancelled: bool,

    /// Why the job failed
    pub failure: Option<String>,

    pub elapsed: Duration,

    /// Counters at the end of the run
    pub metrics: MetricsSnapshot,
}

impl JobResult {
    fn failed(reason: String, elapsed: Duration) -> Self {
        Self {
            status: JobState::Failed,
            records_read: 0,
            written: 0,
            chunks_written: 0,
            rejections: Vec::new(),
            failed_chunks: Vec::new(),
            cancelled: false,
            failure: Some(reason),
            elapsed,
            metrics: MetricsSnapshot::default(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobState::Succeeded
    }
}

impl std::fmt::Display for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Job {}: {} read, {} written in {} chunk(s), {} rejected, {} chunk(s) failed ({:.1}s)",
            self.status,
            self.records_read,
            self.written,
            self.chunks_written,
            self.rejections.len(),
            self.failed_chunks.len(),
            self.elapsed.as_secs_f64()
        )?;
        if let Some(ref reason) = self.failure {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// What the reader thread saw.
#[derive(Debug, Default)]
struct ReadReport {
    records_read: u64,
    rejections: Vec<Rejection>,
    error: Option<SourceError>,
    reached_end: bool,
}

/// Orchestrates one import from a source file into a sink.
pub struct JobController {
    source_path: PathBuf,
    sink: Arc<dyn ChunkSink>,
    settings: JobSettings,
    cancel: CancellationToken,
    state: AtomicU8,
}

impl JobController {
    /// Create a job in the `Created` state.
    pub fn new(source_path: impl Into<PathBuf>, sink: Arc<dyn ChunkSink>, settings: JobSettings) -> Self {
        Self {
            source_path: source_path.into(),
            sink,
            settings,
            cancel: CancellationToken::new(),
            state: AtomicU8::new(JobState::Created.as_u8()),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation. In-flight chunk writes still finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run the job to completion. A job runs at most once.
    pub async fn run(&self) -> JobResult {
        let start = Instant::now();

        if self
            .state
            .compare_exchange(
                JobState::Created.as_u8(),
                JobState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::warn!("Job for {} already started", self.source_path.display());
            return JobResult::failed("job already started".to_string(), start.elapsed());
        }

        tracing::info!(
            "Importing {} (chunk size {}, {} writers)",
            self.source_path.display(),
            self.settings.chunk_size,
            self.settings.scheduler.concurrency
        );

        let metrics = Metrics::new();

        let source = match CsvSource::open(&self.source_path, self.settings.source.clone()) {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("{}", e);
                return self.finish(JobResult::failed(e.to_string(), start.elapsed()));
            }
        };

        let halt = self.cancel.child_token();
        let (tx, rx) = mpsc::channel::<Chunk>(CHUNK_BUFFER);

        let reader = {
            let metrics = metrics.clone();
            let halt = halt.clone();
            let chunk_size = self.settings.chunk_size;
            tokio::task::spawn_blocking(move || read_chunks(source, chunk_size, tx, &metrics, &halt))
        };

        let processor = Arc::new(ChunkProcessor::new(
            self.sink.clone(),
            metrics.clone(),
            self.settings.retry.clone(),
        ));
        let scheduler = Scheduler::new(processor, metrics.clone(), self.settings.scheduler.clone());
        let stats = scheduler.run(rx, halt).await;

        let report = match reader.await {
            Ok(report) => report,
            Err(e) => ReadReport {
                error: Some(SourceError::Io(format!("reader task failed: {}", e))),
                ..Default::default()
            },
        };

        let result = self.conclude(report, stats, metrics.snapshot(), start.elapsed());
        self.finish(result)
    }

    fn conclude(
        &self,
        report: ReadReport,
        stats: SchedulerStats,
        metrics: MetricsSnapshot,
        elapsed: Duration,
    ) -> JobResult {
        let cancelled = self.cancel.is_cancelled() && (stats.halted || !report.reached_end);

        let failure = if let Some(ref e) = report.error {
            Some(e.to_string())
        } else if let Some(first) = stats.failures.first() {
            Some(first.to_string())
        } else if stats.panicked > 0 {
            Some(format!("{} chunk writer task(s) panicked", stats.panicked))
        } else if cancelled {
            Some("cancelled".to_string())
        } else if !report.reached_end {
            Some("input was not read to the end".to_string())
        } else {
            None
        };

        JobResult {
            status: if failure.is_none() {
                JobState::Succeeded
            } else {
                JobState::Failed
            },
            records_read: report.records_read,
            written: stats.records_written,
            chunks_written: stats.chunks_written,
            rejections: report.rejections,
            failed_chunks: stats.failures,
            cancelled,
            failure,
            elapsed,
            metrics,
        }
    }

    fn finish(&self, result: JobResult) -> JobResult {
        self.state.store(result.status.as_u8(), Ordering::SeqCst);
        if result.is_success() {
            tracing::info!("{}", result);
        } else {
            tracing::error!("{}", result);
        }
        result
    }
}

/// Read, transform and assemble on the calling (blocking) thread.
///
/// Stops early when `halt` is cancelled or the receiver goes away. A source
/// error cancels `halt` so that dispatch stops too.
fn read_chunks(
    source: CsvSource,
    chunk_size: usize,
    tx: mpsc::Sender<Chunk>,
    metrics: &Metrics,
    halt: &CancellationToken,
) -> ReadReport {
    let strict = source.is_strict();
    let mut assembler = ChunkAssembler::new(chunk_size);
    let mut report = ReadReport::default();
    let mut stamper = Stamper::new();
    let mut stopped = false;

    for item in source {
        if halt.is_cancelled() {
            stopped = true;
            break;
        }

        let raw = match item {
            Ok(raw) => raw,
            Err(SourceError::Malformed { line, reason }) if !strict => {
                tracing::warn!("Skipping line {}: {}", line, reason);
                report.records_read += 1;
                metrics.add_record_read();
                metrics.add_rejection();
                assembler.reject(Rejection { line, reason });
                continue;
            }
            Err(e) => {
                tracing::error!("Aborting read: {}", e);
                report.error = Some(e);
                halt.cancel();
                break;
            }
        };

        report.records_read += 1;
        metrics.add_record_read();

        let outcome = transform(&raw, stamper.now()).map_err(|e| {
            tracing::warn!("Rejecting line {}: {}", raw.line, e);
            metrics.add_rejection();
            Rejection {
                line: raw.line,
                reason: e.to_string(),
            }
        });

        if let Some(chunk) = assembler.accept(outcome) {
            if tx.blocking_send(chunk).is_err() {
                stopped = true;
                break;
            }
        }
    }

    let (last, rejections) = assembler.finish();
    report.rejections = rejections;

    if report.error.is_none() && !stopped {
        report.reached_end = match last {
            Some(chunk) => tx.blocking_send(chunk).is_ok(),
            None => true,
        };
    }

    tracing::debug!(
        "Reader done: {} lines, {} rejected, end reached: {}",
        report.records_read,
        report.rejections.len(),
        report.reached_end
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputConfig;
    use crate::error::SinkError;
    use crate::io::{store, MemorySink, StudentRepository};
    use crate::record::DomainRecord;
    use crate::transform::TIMESTAMP_FORMAT;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::io::Write;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    /// Keeps every chunk it receives and fails the chunks listed in `fail`.
    #[derive(Default)]
    struct RecordingSink {
        fail: Vec<u64>,
        chunks: Mutex<Vec<Chunk>>,
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn write_chunk(&self, chunk: &Chunk) -> Result<Vec<i32>, SinkError> {
            if self.fail.contains(&chunk.index()) {
                return Err(SinkError::Storage("disk full".to_string()));
            }
            self.chunks.lock().unwrap().push(chunk.clone());
            Ok((0..chunk.len() as i32).collect())
        }
    }

    impl RecordingSink {
        fn records_in_order(&self) -> Vec<DomainRecord> {
            let mut chunks = self.chunks.lock().unwrap().clone();
            chunks.sort_by_key(Chunk::index);
            chunks.iter().flat_map(|c| c.records().to_vec()).collect()
        }

        fn chunk_sizes(&self) -> Vec<usize> {
            let mut chunks = self.chunks.lock().unwrap().clone();
            chunks.sort_by_key(Chunk::index);
            chunks.iter().map(Chunk::len).collect()
        }
    }

    fn students_csv(rows: usize, extra: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Id,firstName,lastName,age").unwrap();
        for n in 0..rows {
            writeln!(file, "{},First{},Last{},{}", n + 1, n, n, 18 + n % 40).unwrap();
        }
        for line in extra {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn settings(chunk_size: usize, concurrency: usize) -> JobSettings {
        JobSettings {
            chunk_size,
            scheduler: SchedulerConfig {
                concurrency,
                enable_metrics: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_2500_records_succeed_in_three_chunks() {
        let file = students_csv(2500, &[]);
        let sink = Arc::new(RecordingSink::default());
        let job = JobController::new(file.path(), sink.clone(), settings(1000, 10));

        let result = job.run().await;

        assert_eq!(result.status, JobState::Succeeded);
        assert_eq!(job.state(), JobState::Succeeded);
        assert_eq!(result.records_read, 2500);
        assert_eq!(result.written, 2500);
        assert_eq!(result.chunks_written, 3);
        assert_eq!(sink.chunk_sizes(), vec![1000, 1000, 500]);
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_records_reach_sink_without_id_and_stamped() {
        let file = students_csv(300, &[]);
        let sink = Arc::new(RecordingSink::default());
        let job = JobController::new(file.path(), sink.clone(), settings(64, 4));

        job.run().await;

        let records = sink.records_in_order();
        assert_eq!(records.len(), 300);
        assert!(records.iter().all(|r| r.id.is_none()));

        let stamps: Vec<NaiveDateTime> = records
            .iter()
            .map(|r| NaiveDateTime::parse_from_str(&r.insertion_timestamp, TIMESTAMP_FORMAT).unwrap())
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));

        assert_eq!(records[0].first_name, "First0");
        assert_eq!(records[299].last_name, "Last299");
    }

    #[tokio::test]
    async fn test_invalid_age_is_rejected_and_job_succeeds() {
        let file = students_csv(5, &["6,Bad,Age,abc", "7,Short"]);
        let sink = Arc::new(RecordingSink::default());
        let job = JobController::new(file.path(), sink.clone(), settings(2, 2));

        let result = job.run().await;

        assert!(result.is_success());
        assert_eq!(result.records_read, 7);
        assert_eq!(result.rejections.len(), 2);
        assert_eq!(result.rejections[0].line, 7);
        assert!(result.rejections[0].reason.contains("abc"));
        // lines read = written + rejected
        assert_eq!(result.written + result.rejections.len() as u64, result.records_read);
        assert!(sink.records_in_order().iter().all(|r| r.first_name != "Bad"));
    }

    #[tokio::test]
    async fn test_sink_failure_fails_job_with_partial_count() {
        let file = students_csv(50, &[]);
        let sink = Arc::new(RecordingSink {
            fail: vec![1],
            ..Default::default()
        });
        let job = JobController::new(file.path(), sink.clone(), settings(10, 1));

        let result = job.run().await;

        assert_eq!(result.status, JobState::Failed);
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(result.failed_chunks.len(), 1);
        assert_eq!(result.failed_chunks[0].index, 1);
        assert_eq!(result.written, 10);
        assert_eq!(result.chunks_written, 1);
        assert!(!result.cancelled);
        assert!(result.failure.unwrap().contains("disk full"));
    }

    #[tokio::test]
    async fn test_missing_source_fails_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let job = JobController::new(dir.path().join("absent.csv"), sink.clone(), settings(10, 2));

        let result = job.run().await;

        assert_eq!(result.status, JobState::Failed);
        assert_eq!(result.written, 0);
        assert!(result.failure.unwrap().contains("source unavailable"));
        assert!(sink.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_strict_mode_aborts_on_field_count() {
        let file = students_csv(3, &["4,Only,Three"]);
        let sink = Arc::new(RecordingSink::default());
        let mut settings = settings(100, 2);
        settings.source.strict = true;
        let job = JobController::new(file.path(), sink.clone(), settings);

        let result = job.run().await;

        assert_eq!(result.status, JobState::Failed);
        assert!(result.failure.unwrap().contains("malformed"));
        assert_eq!(result.written, 0);
    }

    #[tokio::test]
    async fn test_cancelled_job_fails() {
        let file = students_csv(100, &[]);
        let sink = Arc::new(MemorySink::new());
        let job = JobController::new(file.path(), sink.clone(), settings(10, 2));
        job.cancel();

        let result = job.run().await;

        assert_eq!(result.status, JobState::Failed);
        assert!(result.cancelled);
        assert!(result.written < 100);
    }

    /// Counts writes started and finished, each taking `delay`.
    struct SlowSink {
        delay: Duration,
        started: AtomicUsize,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl ChunkSink for SlowSink {
        async fn write_chunk(&self, chunk: &Chunk) -> Result<Vec<i32>, SinkError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok((0..chunk.len() as i32).collect())
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_run_drains_in_flight_chunks() {
        let file = students_csv(200, &[]);
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(100),
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let job = JobController::new(file.path(), sink.clone(), settings(10, 3))
            .with_cancellation(cancel.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        });
        let result = job.run().await;

        let started = sink.started.load(Ordering::SeqCst);
        let completed = sink.completed.load(Ordering::SeqCst);
        assert_eq!(result.status, JobState::Failed);
        assert!(result.cancelled);
        assert!(completed > 0);
        assert_eq!(started, completed);
        assert_eq!(result.chunks_written, completed);
        assert_eq!(result.written, completed as u64 * 10);
        assert!(result.written < 200);
    }

    #[tokio::test]
    async fn test_metrics_clock_starts_with_run() {
        let file = students_csv(3, &[]);
        let job = JobController::new(file.path(), Arc::new(MemorySink::new()), settings(10, 1));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let result = job.run().await;

        assert_eq!(result.metrics.records_read, 3);
        assert_eq!(result.metrics.records_written, 3);
        assert!(result.metrics.elapsed < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_job_runs_once() {
        let file = students_csv(3, &[]);
        let job = JobController::new(file.path(), Arc::new(MemorySink::new()), settings(10, 1));
        assert_eq!(job.state(), JobState::Created);

        assert!(job.run().await.is_success());
        let again = job.run().await;

        assert_eq!(again.status, JobState::Failed);
        assert_eq!(job.state(), JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_headerless_input() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1,Ada,Lovelace,36").unwrap();
        file.flush().unwrap();
        let mut settings = settings(10, 1);
        settings.source.skip_lines = 0;
        let job = JobController::new(file.path(), Arc::new(MemorySink::new()), settings);

        assert_eq!(job.run().await.written, 1);
    }

    #[tokio::test]
    async fn test_import_into_sqlite() {
        let file = students_csv(120, &["121,Bad,Age,x"]);
        let db = store::connect(&OutputConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: None,
            create_schema: true,
        })
        .await
        .unwrap();
        let repository = StudentRepository::new(db);
        let job = JobController::new(file.path(), Arc::new(repository.clone()), settings(50, 4));

        let result = job.run().await;

        assert!(result.is_success());
        assert_eq!(result.written, 120);
        assert_eq!(repository.count().await.unwrap(), 120);

        let stored = repository.find_all().await.unwrap();
        let ids: Vec<i32> = stored.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=120).collect::<Vec<i32>>());
        assert!(stored.iter().all(|s| s.insertion_date.len() == 19));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = Config::default();
        config.processing.chunk_size = 250;
        config.processing.concurrency = 3;
        config.input.delimiter = ';';

        let settings = JobSettings::from(&config);

        assert_eq!(settings.chunk_size, 250);
        assert_eq!(settings.scheduler.concurrency, 3);
        assert_eq!(settings.source.delimiter, b';');
    }
}
