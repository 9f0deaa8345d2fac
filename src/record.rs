//! Records flowing through the pipeline.

use serde::Serialize;

/// Number of columns in an input line: id, first name, last name, age.
pub const FIELD_COUNT: usize = 4;

/// One tokenized input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// 1-based line number in the source file
    pub line: u64,

    /// Fields in column order
    pub fields: Vec<String>,
}

impl RawRecord {
    /// Create a raw record.
    pub fn new(line: u64, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    /// Field at `index`, or an empty string when the line was short.
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map(String::as_str).unwrap_or("")
    }
}

/// A student ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainRecord {
    /// Identifier assigned by the store; `None` until written
    pub id: Option<i32>,
    pub first_name: String,
    pub last_name: String,
    pub age: i32,
    /// `dd/MM/yyyy HH:mm:ss`
    pub insertion_timestamp: String,
}

/// A record skipped during reading or transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// 1-based line number in the source file
    pub line: u64,
    pub reason: String,
}

/// An immutable batch of records, written in a single transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    index: u64,
    records: Vec<DomainRecord>,
}

impl Chunk {
    /// Create a chunk with the given sequence index.
    pub fn new(index: u64, records: Vec<DomainRecord>) -> Self {
        Self { index, records }
    }

    /// Zero-based position of this chunk in assembly order.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn records(&self) -> &[DomainRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
