//! Crash-safe file replacement.

use crate::error::{Result, SettlementError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Replaces `path` with `bytes` via a temp file in the same directory.
///
/// Readers see either the old content or the new one. If anything fails the
/// temp file is removed when it drops and `path` is untouched.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| SettlementError::storage(&dir, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(&dir).map_err(|e| SettlementError::storage(&dir, e))?;
    if let Err(e) = tmp.write_all(bytes).and_then(|_| tmp.as_file().sync_all()) {
        return Err(SettlementError::storage(tmp.path(), e));
    }
    tmp.persist(path)
        .map_err(|e| SettlementError::storage(path, e.error))?;
    Ok(())
}
