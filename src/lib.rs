// Quick OCR - hotkey-driven screen region OCR
//
// This is the library crate containing the capture pipeline, persistence, and state.
// The binary crate (main.rs) provides the CLI and the Slint event loop.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod ui;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use models::{AppState, Config, HistoryEntry, PartialConfig};
pub use state::{StateChange, StateManager};
pub use storage::HistoryStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
