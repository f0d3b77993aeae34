use super::{JsonFileStore, ReadOutcome, StoreError};
use crate::models::HistoryEntry;
use crate::models::history::push_entry;
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};

/// File name of the history log under the data directory.
pub const HISTORY_FILE: &str = "ocr_history.json";

/// Bounded, newest-first log of recognized texts backed by `ocr_history.json`.
///
/// There is no in-memory cache: every call reads the file, so the file is always the
/// source of truth.
pub struct HistoryStore {
    store: JsonFileStore,
}

impl HistoryStore {
    /// Open the history log under `data_dir`.
    pub fn new(data_dir: impl AsRef<Utf8Path>) -> Self {
        Self {
            store: JsonFileStore::new(data_dir, HISTORY_FILE, json!([])),
        }
    }

    /// Wrap an already-configured store (used to point the temp fallback elsewhere).
    pub fn with_store(store: JsonFileStore) -> Self {
        Self { store }
    }

    /// Current path of the history file.
    pub fn path(&self) -> Utf8PathBuf {
        self.store.path()
    }

    /// Read the full log.
    ///
    /// Missing, blank, unparsable, and non-array files all yield an empty log (corrupt
    /// content is backed up first). Entries without a string `text` are dropped and the
    /// filtered log is written back.
    pub fn read(&self) -> Vec<HistoryEntry> {
        match self.try_read() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("Failed to read history: {}", e);
                Vec::new()
            }
        }
    }

    fn try_read(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let value = match self.store.read_json()? {
            ReadOutcome::Loaded(value) => value,
            ReadOutcome::Initialized | ReadOutcome::Recovered { .. } => return Ok(Vec::new()),
        };

        let Value::Array(raw) = value else {
            tracing::warn!("History file is not an array, resetting");
            self.store.quarantine()?;
            return Ok(Vec::new());
        };

        let entries: Vec<HistoryEntry> = raw.iter().filter_map(HistoryEntry::from_value).collect();

        if entries.len() != raw.len() {
            tracing::warn!(
                "Dropped {} invalid history entries, rewriting",
                raw.len() - entries.len()
            );
            self.store.write_json(&entries)?;
        }

        Ok(entries)
    }

    /// Record a recognized text and return the updated log.
    ///
    /// A text identical to the newest entry refreshes that entry instead of adding one.
    pub fn append(&self, text: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries = self.try_read()?;
        push_entry(&mut entries, HistoryEntry::now(text));
        self.store.write_json(&entries)?;
        tracing::debug!("History now holds {} entries", entries.len());
        Ok(entries)
    }

    /// Replace the whole log, e.g. after the user edits or clears it.
    ///
    /// # Returns
    ///
    /// `true` if the write succeeded through any strategy.
    pub fn overwrite(&self, entries: &[HistoryEntry]) -> bool {
        match self.store.write_json(entries) {
            Ok(strategy) => {
                tracing::info!("Overwrote history with {} entries ({:?})", entries.len(), strategy);
                true
            }
            Err(e) => {
                tracing::error!("Failed to overwrite history: {}", e);
                false
            }
        }
    }

    /// Clear the log.
    pub fn clear(&self) -> bool {
        self.overwrite(&[])
    }
}
