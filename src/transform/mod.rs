//! Record transformation: id clearing and timestamp stamping.

mod student;

pub use student::{format_timestamp, transform, transform_now, Stamper, TIMESTAMP_FORMAT};
