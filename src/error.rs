//! Error taxonomy for the import pipeline.
//!
//! Per-record errors ([`SourceError::Malformed`], [`TransformError`]) become
//! rejections under the lenient policy. Everything else is fatal to a chunk or to
//! the whole job.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading the input file.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The input could not be opened at all.
    #[error("source unavailable: {}: {reason}", path.display())]
    Unavailable { path: PathBuf, reason: String },

    /// A line could not be tokenized into the expected fields.
    #[error("malformed record at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    /// The input failed after it was opened.
    #[error("read error: {0}")]
    Io(String),
}

/// Errors raised while mapping a raw record to a domain record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    /// The age column is not a base-10 integer.
    #[error("invalid age {value:?} at line {line}")]
    InvalidAge { line: u64, value: String },
}

/// Errors raised by a chunk sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The store could not be reached. Retryable.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The store refused the data. Never retried.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Any other store failure. Never retried.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SinkError {
    /// Whether a write that failed with this error may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(SinkError::Unavailable("pool timeout".into()).is_retryable());
        assert!(!SinkError::ConstraintViolation("unique".into()).is_retryable());
        assert!(!SinkError::Storage("no such table".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = TransformError::InvalidAge {
            line: 4,
            value: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "invalid age \"abc\" at line 4");

        let err = SourceError::Malformed {
            line: 7,
            reason: "expected 4 fields, found 2".to_string(),
        };
        assert!(err.to_string().contains("line 7"));
    }
}
