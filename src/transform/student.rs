//! Raw line → student mapping.

use crate::error::TransformError;
use crate::record::{DomainRecord, RawRecord};
use chrono::{Local, NaiveDateTime};

/// `dd/MM/yyyy HH:mm:ss`, 24-hour, zero padded.
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

const FIRST_NAME: usize = 1;
const LAST_NAME: usize = 2;
const AGE: usize = 3;

/// Format a timestamp the way it is stored in `insertion_date`.
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Map a raw record to a student stamped with `stamped_at`.
///
/// The identifier column is always discarded.
pub fn transform(raw: &RawRecord, stamped_at: NaiveDateTime) -> Result<DomainRecord, TransformError> {
    let age_field = raw.field(AGE);
    let age = age_field
        .parse::<i32>()
        .map_err(|_| TransformError::InvalidAge {
            line: raw.line,
            value: age_field.to_string(),
        })?;

    Ok(DomainRecord {
        id: None,
        first_name: raw.field(FIRST_NAME).to_string(),
        last_name: raw.field(LAST_NAME).to_string(),
        age,
        insertion_timestamp: format_timestamp(stamped_at),
    })
}

/// Map a raw record, stamping it with the local wall clock.
pub fn transform_now(raw: &RawRecord) -> Result<DomainRecord, TransformError> {
    transform(raw, Local::now().naive_local())
}

/// Hands out insertion timestamps that never go backwards.
///
/// Local wall time can step back (DST fall-back, clock corrections); the last
/// stamp is repeated until the clock catches up.
#[derive(Debug, Default)]
pub struct Stamper {
    last: Option<NaiveDateTime>,
}

impl Stamper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp from the local wall clock.
    pub fn now(&mut self) -> NaiveDateTime {
        self.stamp(Local::now().naive_local())
    }

    /// Stamp from a supplied clock reading.
    pub fn stamp(&mut self, clock: NaiveDateTime) -> NaiveDateTime {
        let at = match self.last {
            Some(last) if last > clock => last,
            _ => clock,
        };
        self.last = Some(at);
        at
    }
}
