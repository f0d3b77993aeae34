//! Durable JSON file storage with atomic replace and corruption recovery.
//!
//! Both persisted stores (history and config) go through [`JsonFileStore`], which owns
//! the write and read discipline:
//!
//! # Write path
//!
//! The value is serialized into a complete in-memory buffer first. Then, in order, each
//! strategy is attempted only after the previous one failed:
//!
//! 1. **Atomic replace**: write `<file>.temp` next to the target and rename it over the target
//! 2. **Direct overwrite** of the target file
//! 3. **Backup directory**: write `<data root>/backup/<name>` and copy it into place
//! 4. **Temp directory**: write `<temp>/QuickOCR_<name>` and redirect every later read and
//!    write of this store to that location for the rest of the process
//!
//! # Read path
//!
//! - Missing file: initialized with the empty document
//! - Unparsable file: copied to `<file>.backup.<unix ms>`, then reset to the empty document
//! - Wrong shape: callers detect it and call [`JsonFileStore::quarantine`], which behaves
//!   exactly like the unparsable case

pub mod history;

pub use history::HistoryStore;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors raised by the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {name}: {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("All write strategies failed for {name}: {last}")]
    Exhausted { name: String, last: String },
}

impl StoreError {
    fn io(path: &Utf8Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which write strategy ended up persisting the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    AtomicReplace,
    DirectOverwrite,
    BackupCopy,
    TempRedirect,
}

/// Result of reading a store
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The file did not exist (or was blank) and has been initialized empty
    Initialized,
    /// The file could not be parsed; it was backed up (when possible) and reset
    Recovered { backup: Option<Utf8PathBuf> },
    /// The file parsed as JSON
    Loaded(Value),
}

/// A single JSON document on disk with crash-safe writes.
pub struct JsonFileStore {
    /// File name, e.g. `ocr_history.json`
    name: String,

    /// Application data root; the backup directory lives beneath it
    data_root: Utf8PathBuf,

    /// Current location of the document. Redirected by the temp-directory fallback.
    path: RwLock<Utf8PathBuf>,

    /// Platform temp directory used as the last-resort location
    temp_root: Utf8PathBuf,

    /// Serialized form of the empty document (`[]` or `{}`)
    empty: Value,

    /// Probe directory writability before writing, skipping straight to the backup
    /// strategy when the probe fails
    write_probe: bool,
}

impl JsonFileStore {
    /// Create a store for `<data_root>/<name>` whose empty document is `empty`.
    pub fn new(data_root: impl AsRef<Utf8Path>, name: &str, empty: Value) -> Self {
        let data_root = data_root.as_ref().to_path_buf();
        let temp_root = Utf8PathBuf::from_path_buf(std::env::temp_dir())
            .unwrap_or_else(|_| data_root.join("tmp"));

        Self {
            name: name.to_string(),
            path: RwLock::new(data_root.join(name)),
            data_root,
            temp_root,
            empty,
            write_probe: false,
        }
    }

    /// Override the last-resort temp directory.
    pub fn with_temp_root(mut self, temp_root: impl AsRef<Utf8Path>) -> Self {
        self.temp_root = temp_root.as_ref().to_path_buf();
        self
    }

    /// Enable the `.write_test` writability probe before each write.
    pub fn with_write_probe(mut self, enabled: bool) -> Self {
        self.write_probe = enabled;
        self
    }

    /// Current path of the document (may have been redirected).
    pub fn path(&self) -> Utf8PathBuf {
        self.path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the backup-copy strategy's files.
    pub fn backup_dir(&self) -> Utf8PathBuf {
        self.data_root.join("backup")
    }

    fn redirect(&self, new_path: Utf8PathBuf) {
        let mut path = self.path.write().unwrap_or_else(PoisonError::into_inner);
        tracing::warn!("Redirecting {} store from {} to {}", self.name, path, new_path);
        *path = new_path;
    }

    /// Serialize `value` and persist it through the write strategy chain.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<WriteStrategy, StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serialize {
            name: self.name.clone(),
            source,
        })?;
        self.write_bytes(&bytes)
    }

    /// Persist a complete buffer through the write strategy chain.
    pub fn write_bytes(&self, bytes: &[u8]) -> Result<WriteStrategy, StoreError> {
        let target = self.path();

        if let Some(parent) = target.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!("Failed to create directory {}: {}", parent, e);
            }
        }

        let skip_primary = self.write_probe && !probe_writable(target.parent());
        if skip_primary {
            tracing::warn!(
                "Directory for {} is not writable, skipping direct write strategies",
                target
            );
        } else {
            match self.stage(bytes).and_then(|staged| self.commit(&staged)) {
                Ok(()) => {
                    tracing::debug!("Wrote {} via atomic replace", target);
                    return Ok(WriteStrategy::AtomicReplace);
                }
                Err(e) => tracing::warn!("Atomic replace of {} failed: {}", target, e),
            }

            match fs::write(&target, bytes) {
                Ok(()) => {
                    tracing::info!("Wrote {} via direct overwrite", target);
                    return Ok(WriteStrategy::DirectOverwrite);
                }
                Err(e) => tracing::warn!("Direct overwrite of {} failed: {}", target, e),
            }
        }

        match self.write_via_backup(&target, bytes) {
            Ok(()) => {
                tracing::info!("Wrote {} via backup directory copy", target);
                return Ok(WriteStrategy::BackupCopy);
            }
            Err(e) => tracing::warn!("Backup directory write for {} failed: {}", target, e),
        }

        let temp_path = self.temp_root.join(format!("QuickOCR_{}", self.name));
        let last = match fs::create_dir_all(&self.temp_root)
            .and_then(|()| fs::write(&temp_path, bytes))
        {
            Ok(()) => {
                self.redirect(temp_path);
                return Ok(WriteStrategy::TempRedirect);
            }
            Err(e) => e.to_string(),
        };

        tracing::error!("Exhausted all write strategies for {}: {}", self.name, last);
        Err(StoreError::Exhausted {
            name: self.name.clone(),
            last,
        })
    }

    /// First half of an atomic replace: write the complete buffer to the temp sibling.
    ///
    /// Until [`commit`](Self::commit) runs, readers keep seeing the previous document.
    pub fn stage(&self, bytes: &[u8]) -> Result<Utf8PathBuf, StoreError> {
        let target = self.path();
        let staged = Utf8PathBuf::from(format!("{}.temp", target));

        let mut file = fs::File::create(&staged).map_err(|e| StoreError::io(&staged, e))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| StoreError::io(&staged, e))?;

        Ok(staged)
    }

    /// Second half of an atomic replace: rename the staged file over the target.
    pub fn commit(&self, staged: &Utf8Path) -> Result<(), StoreError> {
        let target = self.path();
        fs::rename(staged, &target).map_err(|e| {
            // Leave no stray temp sibling behind
            let _ = fs::remove_file(staged);
            StoreError::io(&target, e)
        })
    }

    fn write_via_backup(&self, target: &Utf8Path, bytes: &[u8]) -> Result<(), StoreError> {
        let backup_dir = self.backup_dir();
        fs::create_dir_all(&backup_dir).map_err(|e| StoreError::io(&backup_dir, e))?;

        let backup_path = backup_dir.join(&self.name);
        fs::write(&backup_path, bytes).map_err(|e| StoreError::io(&backup_path, e))?;
        fs::copy(&backup_path, target).map_err(|e| StoreError::io(target, e))?;
        Ok(())
    }

    /// Read and parse the document, initializing or recovering it as needed.
    pub fn read_json(&self) -> Result<ReadOutcome, StoreError> {
        let path = self.path();

        if !path.exists() {
            tracing::info!("{} not found at {}, initializing", self.name, path);
            self.reset()?;
            return Ok(ReadOutcome::Initialized);
        }

        // Undecodable bytes count as corruption, not as an I/O failure
        let content = fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        if content.trim_ascii().is_empty() {
            tracing::info!("{} is blank, initializing", path);
            self.reset()?;
            return Ok(ReadOutcome::Initialized);
        }

        match serde_json::from_slice::<Value>(&content) {
            Ok(value) => Ok(ReadOutcome::Loaded(value)),
            Err(e) => {
                tracing::warn!("Failed to parse {}: {}", path, e);
                let backup = self.quarantine()?;
                Ok(ReadOutcome::Recovered { backup })
            }
        }
    }

    /// Back up the current file to `<file>.backup.<unix ms>` and reset it to empty.
    ///
    /// Returns the backup path, or `None` if the copy failed (the reset still happens).
    pub fn quarantine(&self) -> Result<Option<Utf8PathBuf>, StoreError> {
        let path = self.path();
        let backup = Utf8PathBuf::from(format!(
            "{}.backup.{}",
            path,
            Utc::now().timestamp_millis()
        ));

        let backup = match fs::copy(&path, &backup) {
            Ok(_) => {
                tracing::warn!("Backed up corrupt {} to {}", self.name, backup);
                Some(backup)
            }
            Err(e) => {
                tracing::error!("Failed to back up corrupt {}: {}", path, e);
                None
            }
        };

        self.reset()?;
        Ok(backup)
    }

    /// Overwrite the document with the empty value.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.write_json(&self.empty).map(|_| ())
    }
}

/// Check that `dir` accepts new files by creating and removing `.write_test`.
fn probe_writable(dir: Option<&Utf8Path>) -> bool {
    let Some(dir) = dir else {
        return false;
    };
    let probe = dir.join(".write_test");
    match fs::write(&probe, b"test") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(e) => {
            tracing::debug!("Write probe in {} failed: {}", dir, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (JsonFileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let store = JsonFileStore::new(&root, "doc.json", json!([]))
            .with_temp_root(root.join("platform-tmp"));
        (store, temp_dir)
    }

    #[test]
    fn test_write_uses_atomic_replace() {
        let (store, _temp_dir) = create_test_store();

        let strategy = store.write_json(&json!([1, 2])).unwrap();

        assert_eq!(strategy, WriteStrategy::AtomicReplace);
        assert!(!Utf8PathBuf::from(format!("{}.temp", store.path())).exists());
        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&content).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_read_missing_initializes() {
        let (store, _temp_dir) = create_test_store();

        assert_eq!(store.read_json().unwrap(), ReadOutcome::Initialized);
        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(content.trim(), "[]");
    }

    #[test]
    fn test_read_corrupt_backs_up_and_resets() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.path(), "{not json").unwrap();

        let outcome = store.read_json().unwrap();

        let ReadOutcome::Recovered { backup: Some(backup) } = outcome else {
            panic!("expected recovery with backup, got {:?}", outcome);
        };
        assert_eq!(fs::read_to_string(&backup).unwrap(), "{not json");
        assert_eq!(fs::read_to_string(store.path()).unwrap().trim(), "[]");
    }

    #[test]
    fn test_staged_write_invisible_until_commit() {
        let (store, _temp_dir) = create_test_store();
        store.write_json(&json!(["old"])).unwrap();

        let staged = store.stage(br#"["new"]"#).unwrap();
        let ReadOutcome::Loaded(value) = store.read_json().unwrap() else {
            panic!("expected loaded document");
        };
        assert_eq!(value, json!(["old"]));

        store.commit(&staged).unwrap();
        let ReadOutcome::Loaded(value) = store.read_json().unwrap() else {
            panic!("expected loaded document");
        };
        assert_eq!(value, json!(["new"]));
    }

    #[test]
    fn test_falls_back_to_temp_redirect() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();

        // A regular file where the data root should be makes every data-root write fail
        let blocked_root = root.join("blocked");
        fs::write(&blocked_root, "not a directory").unwrap();

        let store = JsonFileStore::new(&blocked_root, "doc.json", json!([]))
            .with_temp_root(root.join("platform-tmp"));

        let strategy = store.write_json(&json!(["kept"])).unwrap();

        assert_eq!(strategy, WriteStrategy::TempRedirect);
        assert_eq!(store.path(), root.join("platform-tmp").join("QuickOCR_doc.json"));

        // Later reads follow the redirect
        let ReadOutcome::Loaded(value) = store.read_json().unwrap() else {
            panic!("expected loaded document");
        };
        assert_eq!(value, json!(["kept"]));
    }

    #[test]
    fn test_read_undecodable_backs_up_and_resets() {
        let (store, _temp_dir) = create_test_store();
        fs::write(store.path(), [0xff, 0xfe, b'[', 0x80]).unwrap();

        let outcome = store.read_json().unwrap();

        let ReadOutcome::Recovered { backup: Some(backup) } = outcome else {
            panic!("expected recovery with backup, got {:?}", outcome);
        };
        assert_eq!(fs::read(&backup).unwrap(), [0xff, 0xfe, b'[', 0x80]);
        assert_eq!(fs::read_to_string(store.path()).unwrap().trim(), "[]");
    }

    #[test]
    fn test_falls_back_to_direct_overwrite() {
        let (store, _temp_dir) = create_test_store();
        // A directory in place of the temp sibling makes staging fail
        fs::create_dir_all(format!("{}.temp", store.path())).unwrap();

        let strategy = store.write_json(&json!(["direct"])).unwrap();

        assert_eq!(strategy, WriteStrategy::DirectOverwrite);
        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&content).unwrap(), json!(["direct"]));
    }

    #[test]
    fn test_failed_probe_skips_to_backup_copy() {
        let (store, _temp_dir) = create_test_store();
        let store = store.with_write_probe(true);
        let root = store.path().parent().unwrap().to_path_buf();
        // The probe file cannot be created over a directory
        fs::create_dir_all(root.join(".write_test")).unwrap();

        let strategy = store.write_json(&json!(["via backup"])).unwrap();

        assert_eq!(strategy, WriteStrategy::BackupCopy);
        assert!(store.backup_dir().join("doc.json").exists());
        assert!(!Utf8PathBuf::from(format!("{}.temp", store.path())).exists());
        let content = fs::read_to_string(store.path()).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&content).unwrap(), json!(["via backup"]));
    }

    #[test]
    fn test_passing_probe_keeps_atomic_replace() {
        let (store, _temp_dir) = create_test_store();
        let store = store.with_write_probe(true);

        assert_eq!(store.write_json(&json!([])).unwrap(), WriteStrategy::AtomicReplace);
        assert!(!store.backup_dir().exists());
    }

    #[test]
    fn test_all_strategies_failing_is_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let blocked = root.join("blocked");
        fs::write(&blocked, "not a directory").unwrap();

        let store = JsonFileStore::new(&blocked, "doc.json", json!([]))
            .with_temp_root(blocked.join("tmp"));

        let result = store.write_json(&json!(["lost"]));

        assert!(matches!(result, Err(StoreError::Exhausted { .. })));
        assert_eq!(store.path(), blocked.join("doc.json"));
    }

    #[test]
    fn test_probe_writable() {
        let temp_dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        assert!(probe_writable(Some(&root)));
        assert!(!root.join(".write_test").exists());
        assert!(!probe_writable(Some(&root.join("missing"))));
    }
}
