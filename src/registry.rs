//! Registry of NOK error codes and their descriptions.
//!
//! Persisted as plain `code=description` lines. The auto-skip code is never
//! stored; it is merged into every view and cannot be changed.

use crate::atomic::write_atomic;
use crate::error::{Result, SettlementError};
use crate::transaction::AUTO_SKIP_CODE;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Description shown for the auto-skip code.
pub const AUTO_SKIP_DESCRIPTION: &str = "Duplicate Data (Auto-Skip)";

/// Entries a fresh or unreadable registry starts from.
const DEFAULT_CODES: &[(&str, &str)] = &[("03", "Count Mismatch")];

/// File-backed mapping from error code to description.
#[derive(Debug)]
pub struct ErrorCodeRegistry {
    path: PathBuf,
    codes: BTreeMap<String, String>,
}

impl ErrorCodeRegistry {
    /// Loads the registry from `path`.
    ///
    /// A missing file, or one that is not UTF-8 or holds only malformed
    /// lines, yields the defaults. An empty file is an empty registry. Only
    /// an unexpected I/O failure is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let codes = match fs::read(&path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(content) => {
                    let codes = parse_entries(&content);
                    let has_lines = content.lines().any(|line| !line.trim().is_empty());
                    if codes.is_empty() && has_lines {
                        warn!(
                            "Error code registry {} has no valid entries, using defaults",
                            path.display()
                        );
                        default_codes()
                    } else {
                        codes
                    }
                }
                Err(_) => {
                    warn!(
                        "Error code registry {} is not valid UTF-8, using defaults",
                        path.display()
                    );
                    default_codes()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No error code registry at {}, using defaults", path.display());
                default_codes()
            }
            Err(e) => return Err(SettlementError::storage(&path, e)),
        };

        Ok(ErrorCodeRegistry { path, codes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Adds or replaces an entry and persists the registry.
    pub fn add(&mut self, code: &str, description: &str) -> Result<()> {
        let code = code.trim();
        let description = description.trim();
        validate(code, description)?;

        let previous = self
            .codes
            .insert(code.to_string(), description.to_string());
        if let Err(e) = self.save() {
            match previous {
                Some(old) => self.codes.insert(code.to_string(), old),
                None => self.codes.remove(code),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Removes an entry; returns `false` if it was not registered.
    pub fn remove(&mut self, code: &str) -> Result<bool> {
        let code = code.trim();
        if code == AUTO_SKIP_CODE {
            return Err(SettlementError::ProtectedCode(code.to_string()));
        }

        let Some(description) = self.codes.remove(code) else {
            return Ok(false);
        };
        if let Err(e) = self.save() {
            self.codes.insert(code.to_string(), description);
            return Err(e);
        }
        Ok(true)
    }

    /// All entries ordered by code, auto-skip entry included.
    pub fn list_all(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .codes
            .iter()
            .map(|(code, description)| (code.as_str(), description.as_str()))
            .collect();
        entries.push((AUTO_SKIP_CODE, AUTO_SKIP_DESCRIPTION));
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Registered codes, the snapshot the decoder matches suffixes against.
    pub fn codes(&self) -> Vec<&str> {
        self.list_all().into_iter().map(|(code, _)| code).collect()
    }

    pub fn description(&self, code: &str) -> Option<&str> {
        if code == AUTO_SKIP_CODE {
            return Some(AUTO_SKIP_DESCRIPTION);
        }
        self.codes.get(code).map(String::as_str)
    }

    /// Drops every override and deletes the backing file.
    pub fn reset(&mut self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(SettlementError::storage(&self.path, e)),
        }
        self.codes = default_codes();
        Ok(())
    }

    /// Writes all stored entries, replacing the file atomically.
    fn save(&self) -> Result<()> {
        let mut content = String::new();
        for (code, description) in &self.codes {
            content.push_str(code);
            content.push('=');
            content.push_str(description);
            content.push('\n');
        }
        write_atomic(&self.path, content.as_bytes())
    }
}

fn validate(code: &str, description: &str) -> Result<()> {
    let invalid = |reason| SettlementError::InvalidCode {
        code: code.to_string(),
        reason,
    };

    if code == AUTO_SKIP_CODE {
        return Err(SettlementError::ProtectedCode(code.to_string()));
    }
    if code.is_empty() {
        return Err(invalid("code must not be empty"));
    }
    if code.contains('=') || code.chars().any(char::is_whitespace) {
        return Err(invalid("code must not contain '=' or whitespace"));
    }
    if description.contains(|c: char| c == '\n' || c == '\r') {
        return Err(invalid("description must be a single line"));
    }
    Ok(())
}

/// Parses `code=description` lines; the first `=` separates.
fn parse_entries(content: &str) -> BTreeMap<String, String> {
    let mut codes = BTreeMap::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.split_once('=') {
            Some((code, description)) if !code.trim().is_empty() => {
                let code = code.trim();
                if code == AUTO_SKIP_CODE {
                    debug!("Registry line {}: ignoring stored auto-skip entry", idx + 1);
                    continue;
                }
                codes.insert(code.to_string(), description.trim().to_string());
            }
            _ => warn!("Registry line {}: not a code=description entry", idx + 1),
        }
    }
    codes
}

fn default_codes() -> BTreeMap<String, String> {
    DEFAULT_CODES
        .iter()
        .map(|(code, description)| (code.to_string(), description.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_in(dir: &tempfile::TempDir) -> ErrorCodeRegistry {
        ErrorCodeRegistry::load(dir.path().join("error_codes.txt")).unwrap()
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_in(&dir);

        assert_eq!(
            registry.list_all(),
            vec![("02", AUTO_SKIP_DESCRIPTION), ("03", "Count Mismatch")]
        );
    }

    #[test]
    fn test_add_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        registry.add("05", "Card Blacklisted").unwrap();

        let content = fs::read_to_string(registry.path()).unwrap();
        assert_eq!(content, "03=Count Mismatch\n05=Card Blacklisted\n");

        let reloaded = registry_in(&dir);
        assert_eq!(reloaded.description("05"), Some("Card Blacklisted"));
        assert_eq!(reloaded.codes(), vec!["02", "03", "05"]);
    }

    #[test]
    fn test_first_equals_sign_separates() {
        let codes = parse_entries("07=a=b\n\ngarbage\n02=stored\n");
        assert_eq!(codes.get("07").map(String::as_str), Some("a=b"));
        assert!(!codes.contains_key("02"));
        assert_eq!(codes.len(), 1);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("error_codes.txt");

        fs::write(&path, "no separators here\n").unwrap();
        let registry = ErrorCodeRegistry::load(&path).unwrap();
        assert_eq!(registry.description("03"), Some("Count Mismatch"));

        fs::write(&path, [0xff, 0xfe, 0x3d]).unwrap();
        let registry = ErrorCodeRegistry::load(&path).unwrap();
        assert_eq!(registry.description("03"), Some("Count Mismatch"));
    }

    #[test]
    fn test_removing_last_code_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);

        assert!(registry.remove("03").unwrap());
        assert_eq!(registry.codes(), vec!["02"]);
        assert_eq!(fs::read_to_string(registry.path()).unwrap(), "");

        let reloaded = registry_in(&dir);
        assert_eq!(reloaded.codes(), vec!["02"]);
        assert_eq!(reloaded.description("03"), None);
    }

    #[test]
    fn test_auto_skip_code_is_protected() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        let snapshot = |r: &ErrorCodeRegistry| {
            r.list_all()
                .into_iter()
                .map(|(c, d)| (c.to_string(), d.to_string()))
                .collect::<Vec<_>>()
        };
        let before = snapshot(&registry);

        assert!(matches!(
            registry.add("02", "overwritten"),
            Err(SettlementError::ProtectedCode(_))
        ));
        assert!(matches!(
            registry.remove("02"),
            Err(SettlementError::ProtectedCode(_))
        ));

        let after = snapshot(&registry);
        assert_eq!(before, after);
        assert_eq!(registry.description("02"), Some(AUTO_SKIP_DESCRIPTION));
    }

    #[test]
    fn test_remove_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);
        registry.add("09", "Timeout").unwrap();

        assert!(registry.remove("03").unwrap());
        assert!(!registry.remove("03").unwrap());
        assert_eq!(registry.codes(), vec!["02", "09"]);

        registry.reset().unwrap();
        assert!(!registry.path().exists());
        assert_eq!(registry.codes(), vec!["02", "03"]);
    }

    #[test]
    fn test_rejects_unpersistable_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = registry_in(&dir);

        assert!(matches!(
            registry.add("", "empty"),
            Err(SettlementError::InvalidCode { .. })
        ));
        assert!(matches!(
            registry.add("0=4", "split"),
            Err(SettlementError::InvalidCode { .. })
        ));
        assert!(matches!(
            registry.add("04", "two\nlines"),
            Err(SettlementError::InvalidCode { .. })
        ));
        assert_eq!(registry.codes(), vec!["02", "03"]);
    }
}
