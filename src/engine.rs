//! Settlement pipeline over a data directory.
//!
//! Ties the decoder, error-code registry, transaction store, batcher and
//! encoder together. One engine owns the state of one data directory; it is
//! not meant to be shared between threads or processes without an outer lock.

use crate::batcher::{build_settlement, BatchDescriptor};
use crate::config::Config;
use crate::decoder::RecordDecoder;
use crate::encoder::{encode, write_encoded, HeaderOptions};
use crate::error::{Result, SettlementError};
use crate::registry::ErrorCodeRegistry;
use crate::store::{format_tally, IngestionReport, SourceSummary, TransactionStore};
use crate::transaction::DataKind;
use chrono::{Local, NaiveDateTime};
use log::{debug, info};
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// The settlement engine.
///
/// Records are ingested per source and stay in the store until
/// [`clear_all`](SettlementEngine::clear_all). Settlement reads a selection
/// of sources and writes one file per terminal batch to the outbox.
pub struct SettlementEngine {
    config: Config,
    decoder: RecordDecoder,
    registry: ErrorCodeRegistry,
    store: TransactionStore,
}

/// CSV shape of an [`IngestionReport`].
#[derive(Debug, Serialize)]
struct ReportRow<'a> {
    source_file: &'a str,
    data_kind: DataKind,
    accepted: usize,
    rejected: usize,
    errors: String,
}

impl SettlementEngine {
    /// Opens the engine over `config.data_dir` with the standard decoder.
    pub fn open(config: Config) -> Result<Self> {
        Self::with_decoder(config, RecordDecoder::default())
    }

    pub fn with_decoder(config: Config, decoder: RecordDecoder) -> Result<Self> {
        let registry = ErrorCodeRegistry::load(config.registry_path())?;
        let store = TransactionStore::open(config.store_path(), &decoder)?;
        debug!(
            "Opened {} with {} stored records",
            config.data_dir().display(),
            store.len()
        );

        Ok(SettlementEngine {
            config,
            decoder,
            registry,
            store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ErrorCodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ErrorCodeRegistry {
        &mut self.registry
    }

    pub fn store(&self) -> &TransactionStore {
        &self.store
    }

    /// Ingests lines already in memory under the given source name.
    pub fn ingest_lines<I>(
        &mut self,
        source_file: &str,
        lines: I,
        data_kind: DataKind,
    ) -> Result<IngestionReport>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let codes = self.registry.codes();
        self.store
            .ingest(source_file, lines, data_kind, &self.decoder, &codes)
    }

    /// Ingests a file; its file name becomes the source name.
    ///
    /// Bytes that are not UTF-8 are replaced, which makes the affected
    /// lines fail to decode rather than failing the whole file.
    pub fn ingest_file(&mut self, path: &Path, data_kind: DataKind) -> Result<IngestionReport> {
        let bytes = fs::read(path).map_err(|e| SettlementError::storage(path, e))?;
        let content = String::from_utf8_lossy(&bytes);
        let source_file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.ingest_lines(&source_file, content.lines(), data_kind)
    }

    pub fn sources(&self) -> Vec<SourceSummary> {
        self.store.list_sources()
    }

    /// Settles the named sources, timestamped with the local wall clock.
    pub fn settle<S: AsRef<str>>(
        &self,
        sources: &[S],
        options: HeaderOptions,
    ) -> Result<Vec<BatchDescriptor>> {
        self.settle_at(sources, options, Local::now().naive_local())
    }

    /// Settles the named sources and writes one file per batch.
    ///
    /// An empty or fully excluded selection writes nothing and returns an
    /// empty list. Every batch is encoded before the first file is written,
    /// so a header overflow in any batch leaves the outbox untouched. A
    /// storage failure part way through can still leave earlier files.
    pub fn settle_at<S: AsRef<str>>(
        &self,
        sources: &[S],
        options: HeaderOptions,
        generated_at: NaiveDateTime,
    ) -> Result<Vec<BatchDescriptor>> {
        let selected = self.store.select_by_sources(sources);
        let batches = build_settlement(&selected, &generated_at);
        if batches.is_empty() {
            info!("Nothing to settle for {} selected sources", sources.len());
            return Ok(Vec::new());
        }

        // Encode everything first so a header overflow writes no file at all.
        let encoded = batches
            .iter()
            .map(|batch| encode(batch, options).map(|bytes| (batch, bytes)))
            .collect::<Result<Vec<_>>>()?;

        let outbox = self.config.outbox_dir();
        let mut descriptors = Vec::with_capacity(encoded.len());
        for (batch, bytes) in &encoded {
            write_encoded(batch, bytes, &outbox)?;
            descriptors.push(batch.descriptor());
        }

        info!(
            "Settled {} records into {} files",
            selected.len(),
            descriptors.len()
        );
        Ok(descriptors)
    }

    /// Settlement files currently in the outbox, sorted by name.
    pub fn settlement_files(&self) -> Result<Vec<PathBuf>> {
        let outbox = self.config.outbox_dir();
        let entries = match fs::read_dir(&outbox) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SettlementError::storage(&outbox, e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SettlementError::storage(&outbox, e))?;
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Wipes ingested records, registry overrides and settlement files.
    pub fn clear_all(&mut self) -> Result<()> {
        self.store.clear()?;
        self.registry.reset()?;

        let files = self.settlement_files()?;
        for path in &files {
            fs::remove_file(path).map_err(|e| SettlementError::storage(path, e))?;
        }

        info!(
            "Cleared all state in {} ({} settlement files removed)",
            self.config.data_dir().display(),
            files.len()
        );
        Ok(())
    }

    /// Writes source summaries as CSV, in ingestion order.
    pub fn write_sources<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = headerless_writer(writer);

        csv_writer.write_record([
            "source_file",
            "data_kind",
            "total_count",
            "total_amount",
            "errors",
        ])?;
        for summary in self.sources() {
            csv_writer.serialize(summary.to_row())?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Writes decoded transactions as CSV, optionally for one source only.
    pub fn write_transactions<W: Write>(&self, writer: W, source: Option<&str>) -> Result<()> {
        let mut csv_writer = headerless_writer(writer);

        csv_writer.write_record([
            "source_file",
            "data_kind",
            "error_code",
            "merchant_id",
            "terminal_id",
            "bank_code",
            "card_number",
            "fare",
            "balance",
            "counter",
            "transaction_date",
        ])?;
        let records = self
            .store
            .records()
            .iter()
            .filter(|r| source.map_or(true, |name| r.source_file == name));
        for record in records {
            csv_writer.serialize(record.to_row())?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Writes registry entries as `code=description` lines.
    pub fn write_codes<W: Write>(&self, mut writer: W) -> Result<()> {
        for (code, description) in self.registry.list_all() {
            writeln!(writer, "{}={}", code, description)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Writes ingestion reports as CSV.
    pub fn write_reports<W: Write>(reports: &[IngestionReport], writer: W) -> Result<()> {
        let mut csv_writer = headerless_writer(writer);

        csv_writer.write_record([
            "source_file",
            "data_kind",
            "accepted",
            "rejected",
            "errors",
        ])?;
        for report in reports {
            csv_writer.serialize(ReportRow {
                source_file: &report.source_file,
                data_kind: report.data_kind,
                accepted: report.accepted,
                rejected: report.rejected,
                errors: format_tally(report.error_counts.iter().map(|(c, n)| (c.as_str(), *n))),
            })?;
        }

        csv_writer.flush()?;
        Ok(())
    }

    /// Writes settlement descriptors as CSV.
    pub fn write_batches<W: Write>(batches: &[BatchDescriptor], writer: W) -> Result<()> {
        let mut csv_writer = headerless_writer(writer);

        csv_writer.write_record([
            "terminal_id",
            "merchant_id",
            "batch",
            "count",
            "amount",
            "file",
        ])?;
        for batch in batches {
            csv_writer.serialize(batch)?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}

/// Header rows are written explicitly so empty listings still carry one.
fn headerless_writer<W: Write>(writer: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer)
}
