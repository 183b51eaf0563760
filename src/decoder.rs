//! Fixed-offset decoder for terminal log lines.
//!
//! A terminal line is a hex payload that, once a fixed prefix is prepended,
//! forms a buffer with every field at a known offset. NOK lines additionally
//! carry an error-code token and sometimes the code glued to the payload.

use crate::transaction::{DataKind, TransactionDate, TransactionRecord};
use log::debug;
use std::ops::Range;
use thiserror::Error;

/// Prefix the terminals strip before logging; restored for decoding.
pub const DEFAULT_PREFIX: &str = "0200a900000000";

/// Shortest payload (before prefixing) that is decoded at all.
pub const MIN_PAYLOAD_LEN: usize = 94;

/// Reasons a single line produces no record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Empty after trimming; not a malformed line.
    #[error("blank line")]
    Blank,

    #[error("payload contains non-ASCII characters")]
    NonAscii,

    #[error("payload has {len} characters, at least {min} required")]
    TooShort { len: usize, min: usize },

    #[error("field {field} is not a hex number: {value:?}")]
    InvalidHex { field: &'static str, value: String },
}

/// A fixed-width slice of the decode buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: usize,
    pub width: usize,
}

impl Field {
    pub const fn new(offset: usize, width: usize) -> Self {
        Field { offset, width }
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.width
    }
}

/// Offsets of every field within the prefixed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    pub bank_code: Field,
    pub merchant_id: Field,
    pub terminal_id: Field,
    pub day: Field,
    pub month: Field,
    pub year: Field,
    pub hour: Field,
    pub minute: Field,
    pub second: Field,
    pub card_number: Field,
    pub fare: Field,
    pub balance: Field,
    pub counter: Field,
}

impl FieldLayout {
    /// Layout of the e-money terminal transaction log.
    pub const STANDARD: FieldLayout = FieldLayout {
        bank_code: Field::new(14, 2),
        merchant_id: Field::new(16, 16),
        terminal_id: Field::new(32, 8),
        day: Field::new(40, 2),
        month: Field::new(42, 2),
        year: Field::new(44, 4),
        hour: Field::new(48, 2),
        minute: Field::new(50, 2),
        second: Field::new(52, 2),
        card_number: Field::new(54, 16),
        fare: Field::new(70, 8),
        balance: Field::new(78, 8),
        counter: Field::new(86, 8),
    };

    fn fields(&self) -> [Field; 13] {
        [
            self.bank_code,
            self.merchant_id,
            self.terminal_id,
            self.day,
            self.month,
            self.year,
            self.hour,
            self.minute,
            self.second,
            self.card_number,
            self.fare,
            self.balance,
            self.counter,
        ]
    }

    /// One past the last byte any field reads.
    pub fn end(&self) -> usize {
        self.fields()
            .iter()
            .map(|f| f.offset + f.width)
            .max()
            .unwrap_or(0)
    }
}

impl Default for FieldLayout {
    fn default() -> Self {
        FieldLayout::STANDARD
    }
}

/// Everything that varies between decoder deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub prefix: String,
    pub min_payload_len: usize,
    pub layout: FieldLayout,

    /// Strip a registered error code glued to the end of a NOK payload.
    ///
    /// Applies even when the line carries a trailing code token, so a
    /// payload whose last hex digits happen to spell a registered code
    /// loses them and may then be rejected as too short.
    pub strip_nok_suffix: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        DecoderConfig {
            prefix: DEFAULT_PREFIX.to_string(),
            min_payload_len: MIN_PAYLOAD_LEN,
            layout: FieldLayout::STANDARD,
            strip_nok_suffix: true,
        }
    }
}

/// Turns log lines into [`TransactionRecord`]s.
///
/// Decoding is pure: the only outside input is the snapshot of registered
/// error codes passed to [`RecordDecoder::decode`].
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    config: DecoderConfig,
    min_len: usize,
}

impl RecordDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        // A misconfigured minimum must never let a field read past the buffer.
        let layout_min = config.layout.end().saturating_sub(config.prefix.len());
        let min_len = config.min_payload_len.max(layout_min);
        RecordDecoder { config, min_len }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes one line of the given kind.
    ///
    /// The returned record is not yet tagged with its source file.
    pub fn decode(
        &self,
        line: &str,
        kind: DataKind,
        registered_codes: &[&str],
    ) -> Result<TransactionRecord, DecodeError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(DecodeError::Blank);
        }

        let (payload, error_code) = match kind {
            DataKind::Raw => (line, String::new()),
            DataKind::Nok => self.split_nok(line, registered_codes),
        };

        let mut record = self.decode_payload(payload)?;
        record.error_code = error_code;
        record.data_kind = kind;
        Ok(record)
    }

    /// Decodes a bare wire payload (no error-code handling).
    pub fn decode_payload(&self, payload: &str) -> Result<TransactionRecord, DecodeError> {
        if !payload.is_ascii() {
            return Err(DecodeError::NonAscii);
        }
        if payload.len() < self.min_len {
            return Err(DecodeError::TooShort {
                len: payload.len(),
                min: self.min_len,
            });
        }

        let buffer = format!("{}{}", self.config.prefix, payload);
        let layout = &self.config.layout;
        let text = |field: Field| buffer[field.range()].to_string();

        let fare = parse_hex("fare", &buffer[layout.fare.range()])?;
        let balance = parse_hex("balance", &buffer[layout.balance.range()])?;
        let counter = parse_hex("counter", &buffer[layout.counter.range()])?;

        let transaction_date = TransactionDate {
            day: text(layout.day),
            month: text(layout.month),
            year: text(layout.year),
            hour: text(layout.hour),
            minute: text(layout.minute),
            second: text(layout.second),
        };

        let merchant_id = text(layout.merchant_id);
        let terminal_id = text(layout.terminal_id);
        let bank_code = text(layout.bank_code);
        let card_number = text(layout.card_number);

        Ok(TransactionRecord::new(
            merchant_id,
            terminal_id,
            bank_code,
            card_number,
            fare,
            balance,
            counter,
            transaction_date,
            buffer,
            self.config.prefix.len(),
        ))
    }

    /// Separates a NOK line into hex payload and error code.
    ///
    /// The code is the last space-separated token; without one, a registered
    /// code stripped from the payload end stands in for it.
    fn split_nok<'a>(&self, line: &'a str, registered_codes: &[&str]) -> (&'a str, String) {
        let mut tokens = line.split(' ').filter(|t| !t.is_empty());
        let payload = tokens.next().unwrap_or_default();
        let trailing = tokens
            .last()
            .map(|t| t.trim_end_matches(|c: char| c == '"' || c == '\'').to_string());

        let (payload, suffix) = if self.config.strip_nok_suffix {
            strip_longest_suffix(payload, registered_codes)
        } else {
            (payload, None)
        };

        if let Some(code) = suffix {
            debug!("Stripped error code suffix {:?} from payload", code);
        }

        let error_code = trailing
            .or_else(|| suffix.map(str::to_string))
            .unwrap_or_default();
        (payload, error_code)
    }
}

impl Default for RecordDecoder {
    fn default() -> Self {
        RecordDecoder::new(DecoderConfig::default())
    }
}

/// Removes the longest registered code that ends `payload`.
///
/// Longest match keeps a short code such as `"3"` from claiming the tail of
/// `"03"`.
pub fn strip_longest_suffix<'a, 'c>(
    payload: &'a str,
    codes: &[&'c str],
) -> (&'a str, Option<&'c str>) {
    let matched = codes
        .iter()
        .copied()
        .filter(|code| !code.is_empty() && payload.ends_with(code))
        .max_by_key(|code| code.len());

    match matched {
        Some(code) => (&payload[..payload.len() - code.len()], Some(code)),
        None => (payload, None),
    }
}

fn parse_hex(field: &'static str, value: &str) -> Result<u32, DecodeError> {
    let invalid = || DecodeError::InvalidHex {
        field,
        value: value.to_string(),
    };

    // from_str_radix tolerates a leading '+', the wire format does not.
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    u32::from_str_radix(value, 16).map_err(|_| invalid())
}
