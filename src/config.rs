//! Data directory layout.

use std::path::{Path, PathBuf};

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "EMONEY_SETTLEMENT_DATA_DIR";

/// Data directory used when none is configured.
pub const DEFAULT_DATA_DIR: &str = "settlement-data";

/// Where the pipeline keeps its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Decoded transactions.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("transactions.csv")
    }

    /// `code=description` lines.
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("error_codes.txt")
    }

    /// Generated settlement files.
    pub fn outbox_dir(&self) -> PathBuf {
        self.data_dir.join("outbox")
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_DATA_DIR)
    }
}
