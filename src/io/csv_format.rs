//! CSV format handling for account seeds, transfer requests and account output
//!
//! This module centralizes all CSV format concerns, providing:
//! - Record structures for deserialization of both input files
//! - Conversion from CSV records to ledger values (currency codes, minor units)
//! - Account output serialization
//!
//! All functions are pure (no I/O) for easy testing.
//!
//! # Formats
//!
//! ```text
//! accounts.csv   ref,owner,currency,balance
//! transfers.csv  from,to,amount,currency
//! output         ref,id,owner,currency,balance
//! ```
//!
//! `ref` is a label chosen by the caller. Transfers name their accounts by
//! `ref`, and the output lists every seeded account by `ref` with its store id.
//! Money columns are decimal major units (`10.50`).

use std::io::Write;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::types::{to_major_units, to_minor_units, Account, Currency};

/// Caller-chosen account label used in the CSV files
pub type AccountRef = u32;

/// A CSV record type that converts into a ledger value
pub trait CsvInput: DeserializeOwned {
    type Output;

    fn convert(self) -> Result<Self::Output, String>;
}

/// Row of the accounts file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountCsvRecord {
    #[serde(rename = "ref")]
    pub reference: AccountRef,
    pub owner: String,
    pub currency: String,
    pub balance: String,
}

/// Account to create, as read from the accounts file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSeed {
    pub reference: AccountRef,
    pub owner: String,
    pub currency: Currency,

    /// Initial balance in minor units
    pub balance: i64,
}

/// Row of the transfers file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransferCsvRecord {
    pub from: AccountRef,
    pub to: AccountRef,
    pub amount: String,
    pub currency: Option<String>,
}

/// Transfer to execute, as read from the transfers file
///
/// The amount stays in major units until the accounts are resolved, since the
/// minor unit depends on the account currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRow {
    pub from: AccountRef,
    pub to: AccountRef,
    pub amount: Decimal,
    pub currency: Option<Currency>,
}

fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, String> {
    Decimal::from_str(raw.trim()).map_err(|_| format!("Invalid {} '{}'", field, raw))
}

/// Convert an AccountCsvRecord to an AccountSeed
///
/// # Returns
///
/// * `Ok(AccountSeed)` - currency is supported and the balance fits the
///   currency's minor units
/// * `Err(String)` - message describing the conversion failure
pub fn convert_account_record(record: AccountCsvRecord) -> Result<AccountSeed, String> {
    let currency = Currency::from_str(record.currency.trim())
        .map_err(|e| format!("Account {}: {}", record.reference, e))?;
    let balance = parse_decimal(&record.balance, "balance")?;
    let balance = to_minor_units(balance, currency)
        .map_err(|e| format!("Account {}: {}", record.reference, e))?;

    Ok(AccountSeed {
        reference: record.reference,
        owner: record.owner,
        currency,
        balance,
    })
}

/// Convert a TransferCsvRecord to a TransferRow
///
/// An empty currency column means no currency pre-check.
pub fn convert_transfer_record(record: TransferCsvRecord) -> Result<TransferRow, String> {
    let amount = parse_decimal(&record.amount, "amount")?;
    let currency = match record.currency {
        Some(code) if !code.trim().is_empty() => Some(
            Currency::from_str(code.trim())
                .map_err(|e| format!("Transfer {} -> {}: {}", record.from, record.to, e))?,
        ),
        _ => None,
    };

    Ok(TransferRow {
        from: record.from,
        to: record.to,
        amount,
        currency,
    })
}

impl CsvInput for AccountCsvRecord {
    type Output = AccountSeed;

    fn convert(self) -> Result<AccountSeed, String> {
        convert_account_record(self)
    }
}

impl CsvInput for TransferCsvRecord {
    type Output = TransferRow;

    fn convert(self) -> Result<TransferRow, String> {
        convert_transfer_record(self)
    }
}

/// Write account states to CSV format
///
/// Writes one row per `(ref, account)` pair with columns: ref, id, owner,
/// currency, balance. Rows are sorted by ref for deterministic output and
/// balances are written in major units with two decimals.
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_accounts_csv(
    accounts: &[(AccountRef, Account)],
    output: &mut dyn Write,
) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["ref", "id", "owner", "currency", "balance"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted: Vec<&(AccountRef, Account)> = accounts.iter().collect();
    sorted.sort_by_key(|(reference, _)| *reference);

    for (reference, account) in sorted {
        writer
            .write_record(&[
                reference.to_string(),
                account.id.to_string(),
                account.owner.clone(),
                account.currency.to_string(),
                format!("{:.2}", to_major_units(account.balance, account.currency)),
            ])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
