//! Pipeline orchestration: chunk assembly, bounded concurrent writes, job lifecycle.

mod assembler;
mod chunk_processor;
mod job;
mod metrics;
mod scheduler;

pub use assembler::ChunkAssembler;
pub use chunk_processor::{ChunkFailure, ChunkProcessor, ChunkResult};
pub use job::{JobController, JobResult, JobSettings, JobState};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
