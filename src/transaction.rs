//! Transaction models for decoded terminal log lines and their CSV views.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error code that marks a duplicate upload; such records are never settled.
pub const AUTO_SKIP_CODE: &str = "02";

/// The two input log kinds produced by terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Plain hex lines, no error annotation.
    Raw,

    /// Hex lines followed by an error-code token.
    Nok,
}

impl DataKind {
    /// Three-letter label used in settlement headers.
    pub fn label(&self) -> &'static str {
        match self {
            DataKind::Raw => "RAW",
            DataKind::Nok => "NOK",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Raw => write!(f, "raw"),
            DataKind::Nok => write!(f, "nok"),
        }
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "raw" => Ok(DataKind::Raw),
            "nok" => Ok(DataKind::Nok),
            other => Err(format!("unknown data kind {:?} (expected raw or nok)", other)),
        }
    }
}

/// Transaction timestamp as the terminal wrote it.
///
/// Components are kept as the two- and four-digit strings found in the log;
/// terminals are not trusted to emit calendar-valid dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDate {
    pub day: String,
    pub month: String,
    pub year: String,
    pub hour: String,
    pub minute: String,
    pub second: String,
}

impl TransactionDate {
    /// `DD-MM-YYYY`
    pub fn date(&self) -> String {
        format!("{}-{}-{}", self.day, self.month, self.year)
    }

    /// `DD-MM-YYYY HH:MM:SS`
    pub fn date_time(&self) -> String {
        format!(
            "{} {}:{}:{}",
            self.date(),
            self.hour,
            self.minute,
            self.second
        )
    }
}

/// One decoded terminal transaction.
///
/// The decode buffer (prefix included) is kept verbatim; settlement output
/// re-emits it without the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// 16 hex chars
    pub merchant_id: String,

    /// 8 hex chars, settlement grouping key
    pub terminal_id: String,

    /// 2 hex chars
    pub bank_code: String,

    /// 16 hex chars
    pub card_number: String,

    pub fare: u32,
    pub balance: u32,
    pub counter: u32,

    pub transaction_date: TransactionDate,

    /// Upload this record came from
    pub source_file: String,

    /// Empty for RAW sources
    pub error_code: String,

    pub data_kind: DataKind,

    raw_payload: String,
    prefix_len: usize,
}

impl TransactionRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        merchant_id: String,
        terminal_id: String,
        bank_code: String,
        card_number: String,
        fare: u32,
        balance: u32,
        counter: u32,
        transaction_date: TransactionDate,
        raw_payload: String,
        prefix_len: usize,
    ) -> Self {
        TransactionRecord {
            merchant_id,
            terminal_id,
            bank_code,
            card_number,
            fare,
            balance,
            counter,
            transaction_date,
            source_file: String::new(),
            error_code: String::new(),
            data_kind: DataKind::Raw,
            raw_payload,
            prefix_len,
        }
    }

    /// Full decode buffer, synthetic prefix included.
    pub fn raw_payload(&self) -> &str {
        &self.raw_payload
    }

    /// The payload as it appeared on the wire (decode prefix removed).
    pub fn wire_payload(&self) -> &str {
        &self.raw_payload[self.prefix_len..]
    }

    /// Returns `false` for auto-skip records, which never enter a batch.
    pub fn is_settleable(&self) -> bool {
        self.error_code != AUTO_SKIP_CODE
    }

    /// Flattened view for CSV listings.
    pub fn to_row(&self) -> TransactionRow<'_> {
        TransactionRow {
            source_file: &self.source_file,
            data_kind: self.data_kind,
            error_code: &self.error_code,
            merchant_id: &self.merchant_id,
            terminal_id: &self.terminal_id,
            bank_code: &self.bank_code,
            card_number: &self.card_number,
            fare: self.fare,
            balance: self.balance,
            counter: self.counter,
            transaction_date: self.transaction_date.date_time(),
        }
    }
}

/// Row of the persisted transaction store.
///
/// Only provenance and the wire payload are stored; everything else is
/// re-derived by decoding the payload on load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredRow {
    pub source_file: String,
    pub data_kind: DataKind,
    #[serde(default)]
    pub error_code: String,
    pub payload: String,
}

impl From<&TransactionRecord> for StoredRow {
    fn from(record: &TransactionRecord) -> Self {
        StoredRow {
            source_file: record.source_file.clone(),
            data_kind: record.data_kind,
            error_code: record.error_code.clone(),
            payload: record.wire_payload().to_string(),
        }
    }
}

/// Decoded transaction as listed to users.
#[derive(Debug, Serialize)]
pub struct TransactionRow<'a> {
    pub source_file: &'a str,
    pub data_kind: DataKind,
    pub error_code: &'a str,
    pub merchant_id: &'a str,
    pub terminal_id: &'a str,
    pub bank_code: &'a str,
    pub card_number: &'a str,
    pub fare: u32,
    pub balance: u32,
    pub counter: u32,
    pub transaction_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_date() -> TransactionDate {
        TransactionDate {
            day: "17".to_string(),
            month: "10".to_string(),
            year: "2026".to_string(),
            hour: "08".to_string(),
            minute: "30".to_string(),
            second: "05".to_string(),
        }
    }

    fn sample_record() -> TransactionRecord {
        TransactionRecord::new(
            "0000000000000001".to_string(),
            "A1B2C3D4".to_string(),
            "01".to_string(),
            "6032984000000001".to_string(),
            200,
            5000,
            7,
            sample_date(),
            "0200a900000000WIRE".to_string(),
            14,
        )
    }

    #[test]
    fn test_date_accessors() {
        let date = sample_date();
        assert_eq!(date.date(), "17-10-2026");
        assert_eq!(date.date_time(), "17-10-2026 08:30:05");
    }

    #[test]
    fn test_wire_payload_strips_prefix() {
        let record = sample_record();
        assert_eq!(record.raw_payload(), "0200a900000000WIRE");
        assert_eq!(record.wire_payload(), "WIRE");
    }

    #[test]
    fn test_auto_skip_code_is_not_settleable() {
        let mut record = sample_record();
        assert!(record.is_settleable());

        record.error_code = "03".to_string();
        assert!(record.is_settleable());

        record.error_code = AUTO_SKIP_CODE.to_string();
        assert!(!record.is_settleable());
    }

    #[test]
    fn test_parse_data_kind() {
        assert_eq!("raw".parse::<DataKind>().unwrap(), DataKind::Raw);
        assert_eq!(" NOK ".parse::<DataKind>().unwrap(), DataKind::Nok);
        assert!("csv".parse::<DataKind>().is_err());
        assert_eq!(DataKind::Nok.label(), "NOK");
    }

    #[test]
    fn test_stored_row_keeps_provenance() {
        let mut record = sample_record();
        record.source_file = "gate1.txt".to_string();
        record.error_code = "03".to_string();
        record.data_kind = DataKind::Nok;

        let row = StoredRow::from(&record);
        assert_eq!(row.source_file, "gate1.txt");
        assert_eq!(row.data_kind, DataKind::Nok);
        assert_eq!(row.error_code, "03");
        assert_eq!(row.payload, "WIRE");
    }
}
