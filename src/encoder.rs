//! Settlement file format.
//!
//! ```text
//! <count:3><amount:10>[label:3][details]\n
//! <wire payload>\n
//! ...
//! ```

use crate::atomic::write_atomic;
use crate::batcher::SettlementBatch;
use crate::error::{Result, SettlementError};
use crate::store::format_tally;
use log::info;
use std::path::{Path, PathBuf};

/// Largest amount the 10-digit header field holds.
pub const MAX_HEADER_AMOUNT: u64 = 9_999_999_999;

/// Optional header extensions after count and amount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderOptions {
    /// Append the `RAW`/`NOK` label.
    pub label: bool,

    /// Append the `code:count|...` error tally.
    pub details: bool,
}

/// Serializes a batch to the settlement text format.
pub fn encode(batch: &SettlementBatch<'_>, options: HeaderOptions) -> Result<Vec<u8>> {
    if batch.total_amount > MAX_HEADER_AMOUNT {
        return Err(SettlementError::HeaderOverflow {
            terminal_id: batch.terminal_id.clone(),
            batch: batch.batch_sequence,
            amount: batch.total_amount,
        });
    }

    let mut out = format!("{:03}{:010}", batch.total_count, batch.total_amount);
    if options.label {
        out.push_str(batch.label());
    }
    if options.details {
        out.push_str(&format_tally(batch.error_tally()));
    }
    out.push('\n');

    for record in &batch.records {
        out.push_str(record.wire_payload());
        out.push('\n');
    }

    Ok(out.into_bytes())
}

/// Writes a batch into `dir` under its output filename.
///
/// The file appears complete or not at all.
pub fn write_batch(
    batch: &SettlementBatch<'_>,
    dir: &Path,
    options: HeaderOptions,
) -> Result<PathBuf> {
    let bytes = encode(batch, options)?;
    write_encoded(batch, &bytes, dir)
}

/// Writes bytes produced by [`encode`] into `dir` under the batch's filename.
pub fn write_encoded(batch: &SettlementBatch<'_>, bytes: &[u8], dir: &Path) -> Result<PathBuf> {
    let path = dir.join(&batch.output_filename);
    write_atomic(&path, bytes)?;

    info!(
        "Wrote {} ({} records, amount {})",
        path.display(),
        batch.total_count,
        batch.total_amount
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::build_settlement;
    use crate::decoder::RecordDecoder;
    use crate::transaction::{DataKind, TransactionRecord};
    use chrono::NaiveDate;
    use std::fs;

    fn payload(fare: u32) -> String {
        format!(
            "01{}{}17102026083005{}{:08X}{:08X}{:08X}00000000000000",
            "0000000000000123", "A1B2C3D4", "6032984000000001", fare, 0, 0
        )
    }

    fn records(fares: &[u32]) -> Vec<TransactionRecord> {
        let decoder = RecordDecoder::default();
        fares
            .iter()
            .map(|&fare| decoder.decode_payload(&payload(fare)).unwrap())
            .collect()
    }

    fn settle(records: &[TransactionRecord]) -> Vec<SettlementBatch<'_>> {
        let at = NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap();
        let selected: Vec<&TransactionRecord> = records.iter().collect();
        build_settlement(&selected, &at)
    }

    #[test]
    fn test_minimal_format() {
        let group = records(&[200, 300]);
        let batches = settle(&group);

        let bytes = encode(&batches[0], HeaderOptions::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let expected = format!("0020000000500\n{}\n{}\n", payload(200), payload(300));
        assert_eq!(text, expected);
    }

    #[test]
    fn test_label_and_details_extensions() {
        let mut group = records(&[200, 300, 400]);
        for record in group.iter_mut() {
            record.data_kind = DataKind::Nok;
        }
        group[0].error_code = "03".to_string();
        group[1].error_code = "05".to_string();
        group[2].error_code = "03".to_string();
        let batches = settle(&group);

        let options = HeaderOptions {
            label: true,
            details: true,
        };
        let text = String::from_utf8(encode(&batches[0], options).unwrap()).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(header, "0030000000900NOK03:2|05:1");
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_amount_overflow_is_rejected() {
        let group = records(&[u32::MAX, u32::MAX, u32::MAX]);
        let batches = settle(&group);

        let result = encode(&batches[0], HeaderOptions::default());
        assert!(matches!(
            result,
            Err(SettlementError::HeaderOverflow { batch: 1, .. })
        ));
    }

    #[test]
    fn test_write_batch_uses_output_filename() {
        let dir = tempfile::tempdir().unwrap();
        let group = records(&[200]);
        let batches = settle(&group);

        let path = write_batch(&batches[0], dir.path(), HeaderOptions::default()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "202610170905010000000000000123A1B2C3D401001.txt"
        );
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("0010000000200\n"));
    }

    #[test]
    fn test_overflow_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let group = records(&[u32::MAX, u32::MAX, u32::MAX]);
        let batches = settle(&group);

        assert!(write_batch(&batches[0], dir.path(), HeaderOptions::default()).is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
