//! Student Import Pipeline
//!
//! Chunked CSV to relational import of student records with bounded writer
//! concurrency.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **I/O**: CSV reading, the `student` sea-orm entity and a transactional repository
//! - **Transform**: raw line to student mapping with insertion timestamps
//! - **Pipeline**: chunk assembly, bounded concurrent writes, metrics and job control
//!
//! # Usage
//!
//! ```no_run
//! use student_import::{run_import, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let result = run_import(config, CancellationToken::new()).await?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod record;
pub mod transform;

pub use config::Config;
pub use error::{SinkError, SourceError, TransformError};
pub use io::{ChunkSink, CsvSource, MemorySink, StudentRepository};
pub use pipeline::{JobController, JobResult, JobSettings, JobState, Metrics};
pub use record::{Chunk, DomainRecord, RawRecord, Rejection};

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a full import into the configured database.
///
/// Configuration and connection errors are returned as `Err`; everything that
/// happens once the job starts is reported in the [`JobResult`].
pub async fn run_import(config: Config, cancel: CancellationToken) -> Result<JobResult> {
    config.validate()?;

    tracing::info!("Starting student import");

    let db = io::store::connect(&config.output).await?;
    let repository = Arc::new(StudentRepository::new(db));

    let job = JobController::new(config.input.path.clone(), repository, JobSettings::from(&config))
        .with_cancellation(cancel);

    Ok(job.run().await)
}

/// Read, transform and chunk the input without touching the database.
pub async fn analyze(config: Config, cancel: CancellationToken) -> Result<JobResult> {
    config.validate()?;

    tracing::info!("Dry run: analyzing {}", config.input.path.display());

    let mut settings = JobSettings::from(&config);
    settings.scheduler.metrics_output_path = None;

    let job = JobController::new(
        config.input.path.clone(),
        Arc::new(MemorySink::discarding()),
        settings,
    )
    .with_cancellation(cancel);

    Ok(job.run().await)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
