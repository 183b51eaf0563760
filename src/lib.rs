//! # E-money Settlement
//!
//! Decodes hex transaction logs from e-money card terminals and emits
//! batched settlement files for the downstream settlement processor.
//!
//! ## Pipeline
//!
//! - **Decode**: each log line becomes a [`TransactionRecord`] by reading
//!   fixed offsets out of a prefixed hex buffer
//! - **Ingest**: records are tagged with their source and kind and kept in a
//!   persistent [`TransactionStore`]
//! - **Batch**: a selection of sources is grouped by terminal and split into
//!   batches of at most 999 records
//! - **Encode**: every batch is written as one settlement file
//!
//! Records carrying error code `02` (duplicate data) are stored and counted
//! but never settled.
//!
//! ## Example
//!
//! ```no_run
//! use emoney_settlement::{Config, DataKind, HeaderOptions, SettlementEngine};
//!
//! let mut engine = SettlementEngine::open(Config::new("settlement-data")).unwrap();
//! engine
//!     .ingest_file("gate1.txt".as_ref(), DataKind::Raw)
//!     .unwrap();
//! let batches = engine.settle(&["gate1.txt"], HeaderOptions::default()).unwrap();
//! SettlementEngine::write_batches(&batches, std::io::stdout()).unwrap();
//! ```

pub mod atomic;
pub mod batcher;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod registry;
pub mod store;
pub mod transaction;

pub use batcher::{build_settlement, BatchDescriptor, SettlementBatch, BATCH_CAPACITY};
pub use config::Config;
pub use decoder::{DecodeError, DecoderConfig, FieldLayout, RecordDecoder};
pub use encoder::{encode, write_batch, write_encoded, HeaderOptions};
pub use engine::SettlementEngine;
pub use error::{Result, SettlementError};
pub use registry::ErrorCodeRegistry;
pub use store::{IngestionReport, SourceSummary, TransactionStore};
pub use transaction::{DataKind, TransactionDate, TransactionRecord, AUTO_SKIP_CODE};
