//! Synchronous CSV reader with iterator interface
//!
//! Provides a streaming iterator over the records of one of the input files.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Design
//!
//! `SyncReader<R>` deserializes rows into the record type `R` one at a time and
//! converts each through [`CsvInput::convert`]. The same reader serves the
//! accounts file (`SyncReader<AccountCsvRecord>`) and the transfers file
//! (`SyncReader<TransferCsvRecord>`).
//!
//! ```no_run
//! use bank_ledger::io::{SyncReader, TransferCsvRecord};
//! use std::path::Path;
//!
//! let reader = SyncReader::<TransferCsvRecord>::new(Path::new("transfers.csv")).unwrap();
//! for result in reader {
//!     match result {
//!         Ok((line, row)) => println!("line {}: {:?}", line, row),
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! - Fatal errors (file not found) are returned from `new()`
//! - Individual record errors are yielded as `Err` items and iteration continues
//! - Line numbers (the header is line 1) are included in every record error

use std::fs::File;
use std::path::Path;

use csv::{DeserializeRecordsIntoIter, ReaderBuilder, Trim};

use crate::io::csv_format::CsvInput;

/// Synchronous CSV reader
///
/// Yields `(line, value)` pairs so callers can report problems by line.
pub struct SyncReader<R: CsvInput> {
    records: DeserializeRecordsIntoIter<File, R>,
    line_num: usize,
}

impl<R: CsvInput> SyncReader<R> {
    /// Create a new SyncReader from a file path
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow flexible field counts (for the optional trailing column)
    /// - Use an 8KB buffer
    ///
    /// # Returns
    ///
    /// * `Ok(SyncReader)` if file opened successfully
    /// * `Err(String)` if file could not be opened
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(file);

        Ok(Self {
            records: reader.into_deserialize(),
            line_num: 1,
        })
    }
}

impl<R: CsvInput> Iterator for SyncReader<R> {
    type Item = Result<(usize, R::Output), String>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        self.line_num += 1;
        let line = self.line_num;

        Some(match record {
            Ok(record) => record
                .convert()
                .map(|value| (line, value))
                .map_err(|e| format!("Line {}: {}", line, e)),
            Err(e) => Err(format!("Line {}: CSV parse error: {}", line, e)),
        })
    }
}
