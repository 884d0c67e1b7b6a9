//! 📑 The tabular parser: bytes in, rows out, header first.
//!
//! 🎬 *[a CSV file opens its eyes. its first line says `"Full Name" , AGE`.]*
//! *[somewhere, a quote was never closed. the parser does not care. the parser endures.]*
//!
//! The first record is the header. Every record after it becomes a [`RowRecord`]
//! keyed by the normalized header names. The contract, in the order it bites:
//!
//! - 💀 No header (empty input) is a job-level [`ParseError`]. Nothing is produced.
//! - ⚠️ A data record whose column count differs from the header's is a row-level
//!   [`RowError`]. The iterator yields it, bumps [`RowReader::rows_rejected`], and
//!   keeps going with the next line.
//! - 🧹 Every field loses its `"` characters and surrounding whitespace. Header names
//!   are also lower-cased. Values keep their case.
//! - 🤷 Quoting is permissive. A stray or unterminated quote never aborts the parse.
//!
//! The reader is lazy, finite and single-pass. It does not know about jobs: stamping
//! `jobId` onto rows is the caller's business.

use std::io::Read;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter};
use thiserror::Error;

use crate::common::RowRecord;

/// 💀 The whole file is unusable. Raised only while reading the header.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing header: input is empty")]
    MissingHeader,

    #[error("failed to read header: {0}")]
    Header(#[source] csv::Error),
}

/// ⚠️ One data line is unusable. The rest of the file is fine, probably.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("line {line:?}: malformed record: {message}")]
    Malformed { line: Option<u64>, message: String },
}

/// 🧹 Strip every quote character, then trim. The original upload is never touched,
/// only what we hand downstream.
pub(crate) fn normalize_value(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

/// 🧹 Same as [`normalize_value`], plus lower-casing. Header names only.
pub(crate) fn normalize_header(raw: &str) -> String {
    normalize_value(raw.trim_start_matches('\u{feff}')).to_lowercase()
}

fn builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    // -- 🔧 headers are read by hand, lengths are checked by hand. csv just splits.
    builder
        .has_headers(false)
        .flexible(true)
        .quoting(true)
        .double_quote(true);
    builder
}

fn read_header_record<R: Read>(
    records: &mut StringRecordsIntoIter<R>,
) -> Result<Vec<String>, ParseError> {
    match records.next() {
        None => Err(ParseError::MissingHeader),
        Some(Err(err)) => Err(ParseError::Header(err)),
        Some(Ok(record)) => Ok(record.iter().map(normalize_header).collect()),
    }
}

/// 🔍 Read just the header line and stop. The producer's structural pre-check.
///
/// Returns the normalized header names. Nothing past the first record is looked at,
/// so a 2GB upload with a good header passes in microseconds.
pub fn read_header<R: Read>(reader: R) -> Result<Vec<String>, ParseError> {
    let mut records = builder().from_reader(reader).into_records();
    read_header_record(&mut records)
}

/// 🚰 A lazy, single-pass iterator of rows under the header's schema.
///
/// Yields `Ok(RowRecord)` for every good data line and `Err(RowError)` for every bad
/// one, in input order. Blank lines are skipped silently.
pub struct RowReader<R: Read> {
    header: Vec<String>,
    records: StringRecordsIntoIter<R>,
    rows_read: u64,
    rows_rejected: u64,
    // -- 💀 set after an I/O error; the underlying reader is not trustworthy after that
    exhausted: bool,
}

impl<R: Read> std::fmt::Debug for RowReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowReader")
            .field("header", &self.header)
            .field("rows_read", &self.rows_read)
            .field("rows_rejected", &self.rows_rejected)
            .finish()
    }
}

impl<R: Read> RowReader<R> {
    /// 🚀 Read the header and get ready to stream rows.
    ///
    /// Fails with a job-level [`ParseError`] when the header cannot be read.
    pub fn new(reader: R) -> Result<Self, ParseError> {
        let mut records = builder().from_reader(reader).into_records();
        let header = read_header_record(&mut records)?;
        Ok(Self {
            header,
            records,
            rows_read: 0,
            rows_rejected: 0,
            exhausted: false,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// ✅ Rows handed out successfully so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// ⚠️ Rows skipped so far because of a [`RowError`].
    pub fn rows_rejected(&self) -> u64 {
        self.rows_rejected
    }

    fn to_row(&self, record: &StringRecord) -> Result<RowRecord, RowError> {
        if record.len() != self.header.len() {
            return Err(RowError::ColumnCount {
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                expected: self.header.len(),
                found: record.len(),
            });
        }
        let mut row = RowRecord::with_capacity(self.header.len() + 1);
        for (name, value) in self.header.iter().zip(record.iter()) {
            row.insert(name.as_str(), normalize_value(value));
        }
        Ok(row)
    }
}

// -- 🕳️ a line of nothing but spaces is still nothing
fn is_blank(record: &StringRecord) -> bool {
    record.len() == 1 && record.get(0).is_some_and(|f| f.trim().is_empty())
}

impl<R: Read> Iterator for RowReader<R> {
    type Item = Result<RowRecord, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        loop {
            let outcome = match self.records.next()? {
                Ok(record) if is_blank(&record) => continue,
                Ok(record) => self.to_row(&record),
                Err(err) => {
                    if err.is_io_error() {
                        self.exhausted = true;
                    }
                    Err(RowError::Malformed {
                        line: err.position().map(|p| p.line()),
                        message: err.to_string(),
                    })
                }
            };
            match outcome {
                Ok(_) => self.rows_read += 1,
                Err(_) => self.rows_rejected += 1,
            }
            return Some(outcome);
        }
    }
}
