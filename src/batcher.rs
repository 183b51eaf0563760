//! Groups selected transactions by terminal and splits them into batches.

use crate::transaction::{DataKind, TransactionRecord};
use chrono::NaiveDateTime;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;

/// Most records one settlement file may carry.
pub const BATCH_CAPACITY: usize = 999;

/// Fixed format version embedded in every settlement filename.
pub const VERSION_TAG: &str = "01";

/// Timestamp format of settlement filenames.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Up to [`BATCH_CAPACITY`] records of one terminal, emitted as one file.
#[derive(Debug, Clone)]
pub struct SettlementBatch<'a> {
    pub merchant_id: String,
    pub terminal_id: String,

    /// 1-based within the terminal
    pub batch_sequence: usize,

    pub records: Vec<&'a TransactionRecord>,
    pub total_count: usize,
    pub total_amount: u64,
    pub output_filename: String,
}

impl SettlementBatch<'_> {
    /// `RAW` when every record came from a raw log, `NOK` otherwise.
    pub fn label(&self) -> &'static str {
        if self.records.iter().all(|r| r.data_kind == DataKind::Raw) {
            DataKind::Raw.label()
        } else {
            DataKind::Nok.label()
        }
    }

    /// Non-empty error codes with their counts, in first-seen order.
    pub fn error_tally(&self) -> Vec<(&str, usize)> {
        let mut tally: Vec<(&str, usize)> = Vec::new();
        for record in &self.records {
            if record.error_code.is_empty() {
                continue;
            }
            match tally.iter_mut().find(|(code, _)| *code == record.error_code) {
                Some((_, count)) => *count += 1,
                None => tally.push((record.error_code.as_str(), 1)),
            }
        }
        tally
    }

    pub fn descriptor(&self) -> BatchDescriptor {
        BatchDescriptor {
            terminal_id: self.terminal_id.clone(),
            merchant_id: self.merchant_id.clone(),
            batch: format!("{:03}", self.batch_sequence),
            count: self.total_count,
            amount: self.total_amount,
            file: self.output_filename.clone(),
        }
    }
}

/// What a settlement call reports per written file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDescriptor {
    pub terminal_id: String,
    pub merchant_id: String,
    pub batch: String,
    pub count: usize,
    pub amount: u64,
    pub file: String,
}

/// `{timestamp}{merchant}{terminal}{version}{sequence:03}.txt`
pub fn output_filename(
    generated_at: &NaiveDateTime,
    merchant_id: &str,
    terminal_id: &str,
    batch_sequence: usize,
) -> String {
    format!(
        "{}{}{}{}{:03}.txt",
        generated_at.format(TIMESTAMP_FORMAT),
        merchant_id,
        terminal_id,
        VERSION_TAG,
        batch_sequence
    )
}

/// Splits `selected` into per-terminal batches.
///
/// Terminals appear in order of first occurrence and each keeps its records
/// in input order. Auto-skip records are dropped. All batches share the
/// `generated_at` timestamp in their filenames.
pub fn build_settlement<'a>(
    selected: &[&'a TransactionRecord],
    generated_at: &NaiveDateTime,
) -> Vec<SettlementBatch<'a>> {
    let mut groups: Vec<(&str, Vec<&'a TransactionRecord>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for &record in selected {
        if !record.is_settleable() {
            debug!(
                "Skipping record with error code {} on terminal {}",
                record.error_code, record.terminal_id
            );
            continue;
        }
        let idx = *index.entry(record.terminal_id.as_str()).or_insert_with(|| {
            groups.push((record.terminal_id.as_str(), Vec::new()));
            groups.len() - 1
        });
        groups[idx].1.push(record);
    }

    let mut batches = Vec::new();
    for (terminal_id, records) in groups {
        let merchant_id = records[0].merchant_id.as_str();
        if records.iter().any(|r| r.merchant_id != merchant_id) {
            warn!(
                "Terminal {} carries more than one merchant id, settling under {}",
                terminal_id, merchant_id
            );
        }

        let batch_count = records.len().div_ceil(BATCH_CAPACITY);
        debug!(
            "Terminal {}: {} records in {} batches",
            terminal_id,
            records.len(),
            batch_count
        );

        for (chunk_idx, chunk) in records.chunks(BATCH_CAPACITY).enumerate() {
            let batch_sequence = chunk_idx + 1;
            batches.push(SettlementBatch {
                merchant_id: merchant_id.to_string(),
                terminal_id: terminal_id.to_string(),
                batch_sequence,
                records: chunk.to_vec(),
                total_count: chunk.len(),
                total_amount: chunk.iter().map(|r| u64::from(r.fare)).sum(),
                output_filename: output_filename(
                    generated_at,
                    merchant_id,
                    terminal_id,
                    batch_sequence,
                ),
            });
        }
    }

    batches
}
