//! Delimited-file reader producing [`RawRecord`]s.
//!
//! Tokenization is lenient by default: a line with fewer than four fields is padded
//! with empty strings and a line with more is truncated, so a short line surfaces
//! later as a transform rejection rather than a read failure. Strict mode reports
//! any field-count mismatch as [`SourceError::Malformed`]. Blank lines are ignored
//! in both modes.

use crate::config::InputConfig;
use crate::error::SourceError;
use crate::record::{RawRecord, FIELD_COUNT};
use csv::{Position, ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Reader settings.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Field delimiter byte
    pub delimiter: u8,

    /// Leading records to skip
    pub skip_lines: usize,

    /// Reject lines without exactly four fields
    pub strict: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            skip_lines: 1,
            strict: false,
        }
    }
}

impl From<&InputConfig> for SourceOptions {
    fn from(input: &InputConfig) -> Self {
        Self {
            // validated as ASCII by Config::validate
            delimiter: input.delimiter as u8,
            skip_lines: input.skip_lines,
            strict: input.strict,
        }
    }
}

/// Sequential, restartable reader over a delimited file.
pub struct CsvSource {
    path: PathBuf,
    reader: csv::Reader<File>,
    options: SourceOptions,
    header_skipped: bool,
}

impl CsvSource {
    /// Open `path` for reading.
    pub fn open(path: impl AsRef<Path>, options: SourceOptions) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| SourceError::Unavailable {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        let reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);

        tracing::debug!("Opened source {}", path.display());

        Ok(Self {
            path,
            reader,
            options,
            header_skipped: false,
        })
    }

    /// Path this source reads from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether field-count mismatches are errors.
    pub fn is_strict(&self) -> bool {
        self.options.strict
    }

    /// Rewind to the beginning of the file. The header is skipped again.
    pub fn restart(&mut self) -> Result<(), SourceError> {
        self.reader
            .seek(Position::new())
            .map_err(|e| SourceError::Io(e.to_string()))?;
        self.header_skipped = false;
        Ok(())
    }

    fn skip_header(&mut self) -> Result<(), SourceError> {
        if self.header_skipped {
            return Ok(());
        }
        self.header_skipped = true;

        let mut record = StringRecord::new();
        for _ in 0..self.options.skip_lines {
            match self.reader.read_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break,
                // An undecodable header is still a header.
                Err(e) if !e.is_io_error() => {}
                Err(e) => return Err(SourceError::Io(e.to_string())),
            }
        }
        Ok(())
    }

    fn to_raw(&self, record: &StringRecord) -> Result<RawRecord, SourceError> {
        let line = record.position().map_or(0, |p| p.line());
        let mut fields: Vec<String> = record.iter().map(str::to_string).collect();

        if fields.len() != FIELD_COUNT {
            if self.options.strict {
                return Err(SourceError::Malformed {
                    line,
                    reason: format!("expected {} fields, found {}", FIELD_COUNT, fields.len()),
                });
            }
            tracing::debug!(
                "Line {} has {} fields, adjusting to {}",
                line,
                fields.len(),
                FIELD_COUNT
            );
            fields.resize(FIELD_COUNT, String::new());
        }

        Ok(RawRecord::new(line, fields))
    }
}

impl Iterator for CsvSource {
    type Item = Result<RawRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Err(e) = self.skip_header() {
            return Some(Err(e));
        }

        let mut record = StringRecord::new();
        match self.reader.read_record(&mut record) {
            Ok(false) => None,
            Ok(true) => Some(self.to_raw(&record)),
            Err(e) => Some(Err(classify_error(e))),
        }
    }
}

fn classify_error(err: csv::Error) -> SourceError {
    if err.is_io_error() {
        return SourceError::Io(err.to_string());
    }
    let line = err.position().map_or(0, |p| p.line());
    SourceError::Malformed {
        line,
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_source(contents: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    fn collect(source: CsvSource) -> Vec<Result<RawRecord, SourceError>> {
        source.collect()
    }

    #[test]
    fn test_skips_header_and_reads_fields() {
        let file = write_source(b"Id,firstName,lastName,age\n1,Ada,Lovelace,36\n2,Alan,Turing,41\n");
        let records: Vec<RawRecord> = collect(CsvSource::open(file.path(), SourceOptions::default()).unwrap())
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields, vec!["1", "Ada", "Lovelace", "36"]);
        assert_eq!(records[0].line, 2);
        assert_eq!(records[1].field(1), "Alan");
        assert_eq!(records[1].line, 3);
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let result = CsvSource::open("/nonexistent/students.csv", SourceOptions::default());
        assert!(matches!(result, Err(SourceError::Unavailable { .. })));
    }

    #[test]
    fn test_lenient_pads_and_truncates() {
        let file = write_source(b"header\n1,Ada\n2,Alan,Turing,41,extra\n\n\n");
        let records: Vec<RawRecord> = collect(CsvSource::open(file.path(), SourceOptions::default()).unwrap())
            .into_iter()
            .map(Result::unwrap)
            .collect();

        // trailing blank lines produce nothing
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields, vec!["1", "Ada", "", ""]);
        assert_eq!(records[1].fields, vec!["2", "Alan", "Turing", "41"]);
    }

    #[test]
    fn test_strict_rejects_field_count_mismatch() {
        let file = write_source(b"header\n1,Ada\n2,Alan,Turing,41\n");
        let options = SourceOptions {
            strict: true,
            ..SourceOptions::default()
        };
        let results = collect(CsvSource::open(file.path(), options).unwrap());

        assert!(matches!(results[0], Err(SourceError::Malformed { line: 2, .. })));
        assert!(results[1].is_ok());
    }

    #[test]
    fn test_invalid_utf8_is_malformed_and_reading_continues() {
        let file = write_source(b"header\n1,\xff\xfe,Lovelace,36\n2,Alan,Turing,41\n");
        let results = collect(CsvSource::open(file.path(), SourceOptions::default()).unwrap());

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(SourceError::Malformed { .. })));
        assert_eq!(results[1].as_ref().unwrap().field(2), "Turing");
    }

    #[test]
    fn test_custom_delimiter_and_trimming() {
        let file = write_source(b"id;first;last;age\n7; Grace ;Hopper; 85\n");
        let options = SourceOptions {
            delimiter: b';',
            ..SourceOptions::default()
        };
        let records: Vec<RawRecord> = collect(CsvSource::open(file.path(), options).unwrap())
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(records[0].fields, vec!["7", "Grace", "Hopper", "85"]);
    }

    #[test]
    fn test_headerless_input() {
        let file = write_source(b"1,Ada,Lovelace,36\n");
        let options = SourceOptions {
            skip_lines: 0,
            ..SourceOptions::default()
        };
        let records = collect(CsvSource::open(file.path(), options).unwrap());
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_restart_rereads_from_start() {
        let file = write_source(b"header\n1,Ada,Lovelace,36\n2,Alan,Turing,41\n");
        let mut source = CsvSource::open(file.path(), SourceOptions::default()).unwrap();

        let first: Vec<_> = source.by_ref().map(Result::unwrap).collect();
        assert_eq!(first.len(), 2);
        assert!(source.next().is_none());

        source.restart().unwrap();
        let second: Vec<_> = source.by_ref().map(Result::unwrap).collect();
        assert_eq!(first, second);
    }
}
