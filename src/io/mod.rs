//! I/O module
//!
//! Handles CSV parsing and output.
//!
//! # Components
//!
//! - `csv_format` - CSV format handling (record conversion, output serialization)
//! - `sync_reader` - Synchronous CSV reader with iterator interface

pub mod csv_format;
pub mod sync_reader;

pub use csv_format::{
    convert_account_record, convert_transfer_record, write_accounts_csv, AccountCsvRecord,
    AccountRef, AccountSeed, CsvInput, TransferCsvRecord, TransferRow,
};
pub use sync_reader::SyncReader;
