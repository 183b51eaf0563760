//! Persistent set of decoded transactions, keyed by upload source.
//!
//! The backing file is a CSV of provenance plus wire payload; records are
//! re-decoded on open so the file never disagrees with the decoder.

use crate::atomic::write_atomic;
use crate::decoder::{DecodeError, RecordDecoder};
use crate::error::{Result, SettlementError};
use crate::transaction::{DataKind, StoredRow, TransactionRecord};
use csv::ReaderBuilder;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Outcome of ingesting one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub source_file: String,
    pub data_kind: DataKind,

    /// Records stored, auto-skip records included.
    pub accepted: usize,

    /// Malformed lines skipped. Blank lines are not counted.
    pub rejected: usize,

    /// Occurrences of each non-empty error code.
    pub error_counts: BTreeMap<String, usize>,
}

/// Aggregate view of one ingested source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source_file: String,
    pub data_kind: DataKind,

    /// Settleable records only.
    pub total_count: usize,

    /// Sum of fares over settleable records.
    pub total_amount: u64,

    /// Over every stored record of the source.
    pub error_counts: BTreeMap<String, usize>,
}

impl SourceSummary {
    pub fn to_row(&self) -> SourceRow<'_> {
        SourceRow {
            source_file: &self.source_file,
            data_kind: self.data_kind,
            total_count: self.total_count,
            total_amount: self.total_amount,
            errors: format_tally(self.error_counts.iter().map(|(c, n)| (c.as_str(), *n))),
        }
    }
}

/// CSV shape of a [`SourceSummary`].
#[derive(Debug, Serialize)]
pub struct SourceRow<'a> {
    pub source_file: &'a str,
    pub data_kind: DataKind,
    pub total_count: usize,
    pub total_amount: u64,
    pub errors: String,
}

/// Joins `code:count` pairs with `|`.
pub fn format_tally<'a>(tally: impl IntoIterator<Item = (&'a str, usize)>) -> String {
    tally
        .into_iter()
        .map(|(code, count)| format!("{}:{}", code, count))
        .collect::<Vec<_>>()
        .join("|")
}

/// All ingested transactions, in ingestion order.
#[derive(Debug)]
pub struct TransactionStore {
    path: PathBuf,
    records: Vec<TransactionRecord>,
}

impl TransactionStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>, decoder: &RecordDecoder) -> Result<Self> {
        let path = path.into();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No transaction store at {}, starting empty", path.display());
                return Ok(TransactionStore {
                    path,
                    records: Vec::new(),
                });
            }
            Err(e) => return Err(SettlementError::storage(&path, e)),
        };

        let mut reader = ReaderBuilder::new().from_reader(file);
        let mut records = Vec::new();

        for (row_idx, result) in reader.deserialize::<StoredRow>().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warn!("Store row {}: {}", row_num, e);
                    continue;
                }
            };

            match decoder.decode_payload(&row.payload) {
                Ok(mut record) => {
                    record.source_file = row.source_file;
                    record.error_code = row.error_code;
                    record.data_kind = row.data_kind;
                    records.push(record);
                }
                Err(e) => warn!("Store row {}: dropping undecodable payload: {}", row_num, e),
            }
        }

        debug!(
            "Loaded {} records from {}",
            records.len(),
            path.display()
        );
        Ok(TransactionStore { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Decodes every line of a source and stores the results.
    ///
    /// Records previously ingested under the same source name are replaced.
    /// Bad lines are logged and skipped. If persisting fails, the store is
    /// left exactly as it was.
    pub fn ingest<I>(
        &mut self,
        source_file: &str,
        lines: I,
        data_kind: DataKind,
        decoder: &RecordDecoder,
        registered_codes: &[&str],
    ) -> Result<IngestionReport>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut report = IngestionReport {
            source_file: source_file.to_string(),
            data_kind,
            accepted: 0,
            rejected: 0,
            error_counts: BTreeMap::new(),
        };
        let mut decoded = Vec::new();

        for (idx, line) in lines.into_iter().enumerate() {
            let line_num = idx + 1;

            match decoder.decode(line.as_ref(), data_kind, registered_codes) {
                Ok(mut record) => {
                    record.source_file = source_file.to_string();
                    if !record.error_code.is_empty() {
                        *report
                            .error_counts
                            .entry(record.error_code.clone())
                            .or_insert(0) += 1;
                    }
                    if !record.is_settleable() {
                        debug!(
                            "{} line {}: error code {} excludes record from settlement",
                            source_file, line_num, record.error_code
                        );
                    }
                    decoded.push(record);
                }
                Err(DecodeError::Blank) => {
                    debug!("{} line {}: blank, skipped", source_file, line_num);
                }
                Err(e) => {
                    report.rejected += 1;
                    warn!("{} line {}: {}", source_file, line_num, e);
                }
            }
        }
        report.accepted = decoded.len();

        let mut next: Vec<TransactionRecord> = self
            .records
            .iter()
            .filter(|r| r.source_file != source_file)
            .cloned()
            .collect();
        let replaced = self.records.len() - next.len();
        if replaced > 0 {
            info!(
                "Replacing {} records previously ingested from {}",
                replaced, source_file
            );
        }
        next.extend(decoded);

        save(&self.path, &next)?;
        self.records = next;

        info!(
            "Ingested {} ({}): {} accepted, {} rejected",
            source_file, data_kind, report.accepted, report.rejected
        );
        Ok(report)
    }

    /// One summary per source, in order of first ingestion.
    pub fn list_sources(&self) -> Vec<SourceSummary> {
        let mut summaries: Vec<SourceSummary> = Vec::new();

        for record in &self.records {
            let idx = match summaries
                .iter()
                .position(|s| s.source_file == record.source_file)
            {
                Some(idx) => idx,
                None => {
                    summaries.push(SourceSummary {
                        source_file: record.source_file.clone(),
                        data_kind: record.data_kind,
                        total_count: 0,
                        total_amount: 0,
                        error_counts: BTreeMap::new(),
                    });
                    summaries.len() - 1
                }
            };

            let summary = &mut summaries[idx];
            if !record.error_code.is_empty() {
                *summary
                    .error_counts
                    .entry(record.error_code.clone())
                    .or_insert(0) += 1;
            }
            if record.is_settleable() {
                summary.total_count += 1;
                summary.total_amount += u64::from(record.fare);
            }
        }

        summaries
    }

    /// Settleable records of the named sources, in ingestion order.
    ///
    /// Unknown names contribute nothing. Content duplicates are kept.
    pub fn select_by_sources<S: AsRef<str>>(&self, names: &[S]) -> Vec<&TransactionRecord> {
        let wanted: HashSet<&str> = names.iter().map(|n| n.as_ref()).collect();

        for name in &wanted {
            if !self.records.iter().any(|r| r.source_file == *name) {
                warn!("Source {} has no ingested records", name);
            }
        }

        self.records
            .iter()
            .filter(|r| wanted.contains(r.source_file.as_str()))
            .filter(|r| r.is_settleable())
            .collect()
    }

    /// Removes every record and the backing file.
    pub fn clear(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SettlementError::storage(&self.path, e)),
        }
        self.records.clear();
        Ok(())
    }
}

fn save(path: &Path, records: &[TransactionRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for record in records {
        writer.serialize(StoredRow::from(record))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| SettlementError::storage(path, e.into_error()))?;
    write_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tid: &str, fare: u32) -> String {
        format!(
            "01{}{}17102026083005{}{:08X}{:08X}{:08X}00000000000000",
            "0000000000000123", tid, "6032984000000001", fare, 5000, 1
        )
    }

    fn open_store(dir: &tempfile::TempDir) -> TransactionStore {
        TransactionStore::open(dir.path().join("transactions.csv"), &RecordDecoder::default())
            .unwrap()
    }

    #[test]
    fn test_ingest_raw_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let decoder = RecordDecoder::default();

        let lines = vec![
            payload("AAAA0001", 200),
            String::new(),
            "too short".to_string(),
            payload("AAAA0001", 300),
        ];
        let report = store
            .ingest("gate1.txt", &lines, DataKind::Raw, &decoder, &[])
            .unwrap();

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected, 1);
        assert!(report.error_counts.is_empty());
        assert_eq!(store.len(), 2);
        assert!(store.records().iter().all(|r| r.source_file == "gate1.txt"));
    }

    #[test]
    fn test_nok_histogram_counts_auto_skip_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let decoder = RecordDecoder::default();

        let lines = vec![
            format!("{}03 02", payload("AAAA0001", 200)),
            format!("{} 03", payload("AAAA0001", 300)),
            format!("{} 03", payload("AAAA0001", 400)),
        ];
        let report = store
            .ingest("nok.txt", &lines, DataKind::Nok, &decoder, &["02", "03"])
            .unwrap();

        assert_eq!(report.accepted, 3);
        assert_eq!(report.error_counts.get("02"), Some(&1));
        assert_eq!(report.error_counts.get("03"), Some(&2));

        let selected = store.select_by_sources(&["nok.txt"]);
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|r| r.error_code == "03"));

        let sources = store.list_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].total_count, 2);
        assert_eq!(sources[0].total_amount, 700);
        assert_eq!(sources[0].to_row().errors, "02:1|03:2");
    }

    #[test]
    fn test_reingest_replaces_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let decoder = RecordDecoder::default();

        store
            .ingest("a.txt", [payload("AAAA0001", 1)], DataKind::Raw, &decoder, &[])
            .unwrap();
        store
            .ingest("b.txt", [payload("BBBB0001", 2)], DataKind::Raw, &decoder, &[])
            .unwrap();
        store
            .ingest(
                "a.txt",
                [payload("AAAA0001", 5), payload("AAAA0001", 6)],
                DataKind::Raw,
                &decoder,
                &[],
            )
            .unwrap();

        let sources = store.list_sources();
        let names: Vec<&str> = sources.iter().map(|s| s.source_file.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
        assert_eq!(sources[1].total_amount, 11);
    }

    #[test]
    fn test_select_keeps_order_and_ignores_unknown_sources() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let decoder = RecordDecoder::default();

        store
            .ingest("a.txt", [payload("AAAA0001", 1)], DataKind::Raw, &decoder, &[])
            .unwrap();
        store
            .ingest(
                "b.txt",
                [payload("BBBB0001", 2), payload("BBBB0001", 2)],
                DataKind::Raw,
                &decoder,
                &[],
            )
            .unwrap();

        let selected = store.select_by_sources(&["b.txt", "missing.txt", "a.txt"]);
        let fares: Vec<u32> = selected.iter().map(|r| r.fare).collect();
        assert_eq!(fares, vec![1, 2, 2]);

        assert!(store.select_by_sources(&["missing.txt"]).is_empty());
        assert!(store.select_by_sources::<&str>(&[]).is_empty());
    }

    #[test]
    fn test_reopen_restores_records() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = RecordDecoder::default();
        {
            let mut store = open_store(&dir);
            store
                .ingest(
                    "nok.txt",
                    [format!("{} 03", payload("AAAA0001", 200))],
                    DataKind::Nok,
                    &decoder,
                    &["03"],
                )
                .unwrap();
        }

        let store = open_store(&dir);
        assert_eq!(store.len(), 1);
        let record = &store.records()[0];
        assert_eq!(record.source_file, "nok.txt");
        assert_eq!(record.error_code, "03");
        assert_eq!(record.data_kind, DataKind::Nok);
        assert_eq!(record.fare, 200);
        assert_eq!(record.wire_payload(), payload("AAAA0001", 200));
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = open_store(&dir);
        let decoder = RecordDecoder::default();
        store
            .ingest("a.txt", [payload("AAAA0001", 1)], DataKind::Raw, &decoder, &[])
            .unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(store.list_sources().is_empty());
        assert!(!store.path().exists());
        assert!(open_store(&dir).is_empty());
    }
}
