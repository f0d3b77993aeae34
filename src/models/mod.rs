//! Data models for the Quick OCR application.
//!
//! This module contains the core data structures used throughout the application:
//! - [`AppState`]: Process-wide pipeline state (session phase, single-flight guard, counters)
//! - [`Config`]: User options persisted to `config.json`, plus [`PartialConfig`] for settings updates
//! - [`HistoryEntry`]: One recognized text in the bounded `ocr_history.json` log
//! - [`Region`]: A user-selected screen rectangle
//! - [`CaptureSession`] / [`SessionState`]: The per-invocation record and its state machine
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Serializable**: Persisted structs derive `Serialize`/`Deserialize` for JSON storage
//! - **Cloneable**: AppState is wrapped in `Arc<RwLock<>>` by [`StateManager`](crate::state::StateManager) for thread-safe access
//! - **Validated**: Session transitions are checked by [`SessionState::can_transition_to`]

pub mod app_state;
pub mod config;
pub mod history;
pub mod region;
pub mod session;

pub use app_state::AppState;
pub use config::{Config, PartialConfig};
pub use history::{HistoryEntry, MAX_HISTORY};
pub use region::{MIN_SELECTION_SIZE, Region};
pub use session::{CancelReason, CaptureSession, SessionOutcome, SessionState};
