use crate::models::{Config, PartialConfig};
use crate::storage::{HistoryStore, JsonFileStore, ReadOutcome};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use std::fs;
use std::time::SystemTime;

/// File name of the configuration document under the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Directory name used under the platform data directory.
pub const DATA_DIR_NAME: &str = "quick-ocr";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "QUICK_OCR_DATA_DIR";

/// Configuration manager for loading and saving `config.json`.
///
/// Owns the application data directory. The config document is persisted through a
/// [`JsonFileStore`], so saves use atomic replace with the fallback chain, and a corrupt
/// file is backed up and replaced by defaults on load.
pub struct ConfigManager {
    data_dir: Utf8PathBuf,
    store: JsonFileStore,
}

impl ConfigManager {
    /// Create a new ConfigManager rooted at `data_dir`.
    ///
    /// # Arguments
    /// * `data_dir` - Application data directory (created if missing)
    ///
    /// # Returns
    /// A new ConfigManager instance
    pub fn new<P: AsRef<Utf8Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();

        // Create data directory if it doesn't exist
        if !data_dir.exists() {
            fs::create_dir_all(&data_dir)
                .with_context(|| format!("Failed to create data directory: {}", data_dir))?;
        }

        Ok(Self {
            store: JsonFileStore::new(&data_dir, CONFIG_FILE, json!({})).with_write_probe(true),
            data_dir,
        })
    }

    /// Resolve the data directory: explicit override, then `QUICK_OCR_DATA_DIR`, then
    /// the platform data directory.
    pub fn default_data_dir(override_dir: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
        if let Some(dir) = override_dir {
            return Ok(dir.to_path_buf());
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Ok(Utf8PathBuf::from(dir));
            }
        }

        let base = dirs::data_dir().context("Could not determine the platform data directory")?;
        let base = Utf8PathBuf::try_from(base).context("Platform data directory is not UTF-8")?;
        Ok(base.join(DATA_DIR_NAME))
    }

    /// Load the configuration.
    ///
    /// Missing fields are backfilled from defaults. A missing, corrupt, or wrongly typed
    /// file yields the defaults (corrupt content is backed up first) and the defaults are
    /// written back.
    pub fn load(&self) -> Result<Config> {
        let outcome = self
            .store
            .read_json()
            .with_context(|| format!("Failed to read config: {}", self.config_path()))?;

        let config = match outcome {
            ReadOutcome::Loaded(value) => match Config::from_value(value) {
                Some(config) => {
                    tracing::info!("Loaded config from {}", self.config_path());
                    config
                }
                None => {
                    tracing::warn!("Config has an unexpected shape, resetting to defaults");
                    self.store
                        .quarantine()
                        .context("Failed to back up malformed config")?;
                    Config::default()
                }
            },
            ReadOutcome::Initialized => {
                tracing::warn!(
                    "Config file not found at {}, using defaults",
                    self.config_path()
                );
                Config::default()
            }
            ReadOutcome::Recovered { backup } => {
                tracing::warn!("Config was corrupt (backup: {:?}), using defaults", backup);
                Config::default()
            }
        };

        // Persist backfilled fields so the file always carries the full schema
        self.save(&config)?;
        Ok(config)
    }

    /// Save a full configuration.
    ///
    /// # Arguments
    /// * `config` - The Config to save (normalized before writing)
    pub fn save(&self, config: &Config) -> Result<()> {
        let mut config = config.clone();
        config.normalize();

        let strategy = self
            .store
            .write_json(&config)
            .with_context(|| format!("Failed to write config: {}", self.config_path()))?;

        tracing::info!("Saved config to {} ({:?})", self.config_path(), strategy);
        Ok(())
    }

    /// Merge a partial update onto the stored config and persist it.
    ///
    /// # Returns
    /// The merged config on success
    pub fn save_partial(&self, partial: PartialConfig) -> Result<Config> {
        let mut config = self.load()?;
        config.merge(partial);
        self.save(&config)?;
        Ok(config)
    }

    /// Open the history log stored alongside the config.
    pub fn history_store(&self) -> HistoryStore {
        HistoryStore::new(&self.data_dir)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    /// Current path of the config file (may have been redirected by the write fallback).
    pub fn config_path(&self) -> Utf8PathBuf {
        self.store.path()
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> Utf8PathBuf {
        self.data_dir.join("logs")
    }
}

/// Detects edits to the config file between polls.
///
/// Each check re-reads the manager's current config path, so a store redirected by the
/// write fallback is followed.
pub struct ConfigWatch {
    last_seen: (Utf8PathBuf, Option<SystemTime>),
}

impl ConfigWatch {
    pub fn new(manager: &ConfigManager) -> Self {
        Self {
            last_seen: Self::stamp(manager),
        }
    }

    fn stamp(manager: &ConfigManager) -> (Utf8PathBuf, Option<SystemTime>) {
        let path = manager.config_path();
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        (path, modified)
    }

    /// Whether the file moved or was modified since the last [`mark`](Self::mark).
    pub fn changed(&self, manager: &ConfigManager) -> bool {
        Self::stamp(manager) != self.last_seen
    }

    /// Record the file's current location and modification time as seen.
    pub fn mark(&mut self, manager: &ConfigManager) {
        self.last_seen = Self::stamp(manager);
    }
}
