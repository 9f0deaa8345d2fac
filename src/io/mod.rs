//! I/O: CSV reading and relational writing.

mod csv_source;
mod repository;
mod sink;
pub mod store;
pub mod student;

pub use csv_source::{CsvSource, SourceOptions};
pub use repository::{classify_db_error, StudentRepository};
pub use sink::{ChunkSink, MemorySink};
