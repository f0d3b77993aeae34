use super::session::{SessionOutcome, SessionState};
use chrono::{DateTime, Utc};

/// Process-wide runtime state for the capture pipeline.
///
/// # Thread Safety
///
/// `AppState` is wrapped in `Arc<RwLock<AppState>>` by [`crate::state::StateManager`].
/// Never mutate it directly; use the manager's methods so that transitions are validated
/// and [`crate::state::StateChange`] events are emitted.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Current phase of the active session (or `Idle`)
    pub session_state: SessionState,

    /// Single-flight guard. Set before the first await of a session, cleared on every exit path.
    pub is_processing: bool,

    /// Identifier of the session holding the guard
    pub active_session: Option<u64>,

    /// When the active session started
    pub session_started_at: Option<DateTime<Utc>>,

    /// Outcome of the most recently finished session
    pub last_outcome: Option<SessionOutcome>,

    // Counters
    pub sessions_started: u64,
    pub busy_rejections: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            session_state: SessionState::Idle,
            is_processing: false,
            active_session: None,
            session_started_at: None,
            last_outcome: None,
            sessions_started: 0,
            busy_rejections: 0,
        }
    }
}

impl AppState {
    /// True when a session holds the guard.
    pub fn is_busy(&self) -> bool {
        self.is_processing || self.session_state != SessionState::Idle
    }

    /// Release the guard and return to idle, keeping counters and the last outcome.
    pub fn reset_session(&mut self) {
        self.session_state = SessionState::Idle;
        self.is_processing = false;
        self.active_session = None;
        self.session_started_at = None;
    }
}
