// State management module
//
// This module provides the StateManager which wraps AppState with thread-safe access
// using Arc<RwLock<T>>, owns the single-flight capture guard, and emits change events.

use crate::models::{AppState, SessionOutcome, SessionState};
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::broadcast;

/// Change events emitted when state is modified
///
/// These events let the trigger surfaces and the CLI follow the pipeline without polling.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// A session acquired the guard
    SessionStarted { id: u64 },

    /// The active session moved to a new phase
    PhaseChanged { id: u64, state: SessionState },

    /// The active session ended and the guard was released
    SessionFinished { id: u64, outcome: SessionOutcome },

    /// A capture request was dropped because a session was already active
    BusyRejected { active: Option<u64> },

    /// State has been reset
    StateReset,
}

/// Rejected phase change
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Session {requested} is not the active session ({active:?})")]
    NotActive { requested: u64, active: Option<u64> },

    #[error("Illegal transition from {from} to {to}")]
    Illegal { from: SessionState, to: SessionState },
}

/// Thread-safe state manager with event emission
///
/// This is the central state management component that:
/// - Provides thread-safe access to [`AppState`] via `Arc<RwLock<T>>`
/// - Owns the single-flight guard ([`try_begin_session`](Self::try_begin_session) /
///   [`finish_session`](Self::finish_session))
/// - Validates session transitions
/// - Supports subscribing to state changes via tokio broadcast channels
///
/// # Related Types
///
/// - [`crate::models::AppState`]: The underlying state structure
/// - [`StateChange`]: Event types emitted on state mutations
/// - [`crate::services::orchestrator::CaptureOrchestrator`]: The only writer of session state
pub struct StateManager {
    /// The application state protected by RwLock for thread-safe access
    state: Arc<RwLock<AppState>>,

    /// Broadcast channel for emitting state change events
    state_tx: broadcast::Sender<StateChange>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    /// Create a new StateManager with default state
    ///
    /// # Returns
    /// A new StateManager with a broadcast channel buffer of 100 events
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            state: Arc::new(RwLock::new(AppState::default())),
            state_tx,
        }
    }

    // A poisoned lock still holds consistent data here: every mutation is a plain
    // field assignment, and the guard must stay releasable.
    fn read_lock(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a read-only snapshot of the current state
    pub fn snapshot(&self) -> AppState {
        self.read_lock().clone()
    }

    /// Execute a function with read access to the state
    ///
    /// # Example
    /// ```ignore
    /// let busy = state_manager.read(|state| state.is_busy());
    /// ```
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AppState) -> R,
    {
        let state = self.read_lock();
        f(&state)
    }

    /// Update the state and emit change events
    ///
    /// # Arguments
    /// * `update_fn` - A function that mutates the state
    ///
    /// # Returns
    /// A vector of StateChange events that were emitted
    pub fn update<F>(&self, update_fn: F) -> Vec<StateChange>
    where
        F: FnOnce(&mut AppState),
    {
        let mut state = self.write_lock();
        let old_state = state.clone();

        update_fn(&mut state);

        let changes = self.detect_changes(&old_state, &state);
        drop(state);

        self.emit(&changes);
        changes
    }

    /// Subscribe to state change events
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }

    fn emit(&self, changes: &[StateChange]) {
        for change in changes {
            // Ignore send errors - it's OK if no one is listening
            let _ = self.state_tx.send(change.clone());
        }
    }

    /// Detect what changed between two states and generate events
    fn detect_changes(&self, old: &AppState, new: &AppState) -> Vec<StateChange> {
        let mut changes = Vec::new();

        if old.active_session != new.active_session {
            if let Some(id) = new.active_session {
                changes.push(StateChange::SessionStarted { id });
            }
        }

        if old.session_state != new.session_state && new.session_state != SessionState::Idle {
            if let Some(id) = new.active_session {
                changes.push(StateChange::PhaseChanged {
                    id,
                    state: new.session_state,
                });
            }
        }

        if let (Some(id), None) = (old.active_session, new.active_session) {
            if let Some(outcome) = &new.last_outcome {
                changes.push(StateChange::SessionFinished {
                    id,
                    outcome: outcome.clone(),
                });
            }
        }

        if new.busy_rejections > old.busy_rejections {
            changes.push(StateChange::BusyRejected {
                active: new.active_session,
            });
        }

        changes
    }

    /// Check and set the single-flight guard in one step.
    ///
    /// # Returns
    /// The new session id, or `None` when a session is already active (the rejection is
    /// counted and a [`StateChange::BusyRejected`] event is emitted).
    pub fn try_begin_session(&self) -> Option<u64> {
        let mut started = None;
        self.update(|state| {
            if state.is_busy() {
                state.busy_rejections += 1;
                return;
            }

            state.sessions_started += 1;
            let id = state.sessions_started;
            state.is_processing = true;
            state.active_session = Some(id);
            state.session_started_at = Some(Utc::now());
            state.session_state = SessionState::CapturingFullFrame;
            started = Some(id);
        });

        match started {
            Some(id) => tracing::info!("Capture session {} started", id),
            None => tracing::info!("Capture already in progress, request dropped"),
        }
        started
    }

    /// Move the active session to `next`, validating the transition.
    pub fn transition(&self, id: u64, next: SessionState) -> Result<(), TransitionError> {
        let mut result = Ok(());
        self.update(|state| {
            if state.active_session != Some(id) {
                result = Err(TransitionError::NotActive {
                    requested: id,
                    active: state.active_session,
                });
                return;
            }
            if !state.session_state.can_transition_to(next) {
                result = Err(TransitionError::Illegal {
                    from: state.session_state,
                    to: next,
                });
                return;
            }
            state.session_state = next;
        });

        if result.is_ok() {
            tracing::debug!("Session {} -> {}", id, next);
        }
        result
    }

    /// Record the outcome of session `id` and release the guard.
    ///
    /// Safe to call from any phase: the guard is always released for the active session.
    /// A stale id (not the active session) is ignored.
    pub fn finish_session(&self, id: u64, outcome: SessionOutcome) -> Vec<StateChange> {
        let mut finished = false;
        let changes = self.update(|state| {
            if state.active_session != Some(id) {
                return;
            }
            state.last_outcome = Some(outcome.clone());
            state.reset_session();
            finished = true;
        });

        if finished {
            tracing::info!("Capture session {} finished: {:?}", id, outcome);
        } else {
            tracing::warn!("Ignoring finish for inactive session {}", id);
        }
        changes
    }

    /// Current phase of the active session.
    pub fn session_state(&self) -> SessionState {
        self.read(|state| state.session_state)
    }

    /// True while a session holds the guard.
    pub fn is_busy(&self) -> bool {
        self.read(|state| state.is_busy())
    }

    /// Reset all state, including counters
    pub fn reset(&self) {
        *self.write_lock() = AppState::default();
        self.emit(&[StateChange::StateReset]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CancelReason;

    #[test]
    fn test_new_state_manager() {
        let manager = StateManager::new();
        let state = manager.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.session_state, SessionState::Idle);
    }

    #[test]
    fn test_begin_session_sets_guard() {
        let manager = StateManager::new();
        let id = manager.try_begin_session().unwrap();

        let state = manager.snapshot();
        assert!(state.is_processing);
        assert_eq!(state.active_session, Some(id));
        assert_eq!(state.session_state, SessionState::CapturingFullFrame);
    }

    #[test]
    fn test_second_begin_is_rejected() {
        let manager = StateManager::new();
        let id = manager.try_begin_session().unwrap();

        assert_eq!(manager.try_begin_session(), None);
        let state = manager.snapshot();
        assert_eq!(state.active_session, Some(id));
        assert_eq!(state.busy_rejections, 1);
        assert_eq!(state.sessions_started, 1);
    }

    #[test]
    fn test_transition_validation() {
        let manager = StateManager::new();
        let id = manager.try_begin_session().unwrap();

        assert!(manager.transition(id, SessionState::AwaitingSelection).is_ok());
        assert_eq!(
            manager.transition(id, SessionState::Delivering),
            Err(TransitionError::Illegal {
                from: SessionState::AwaitingSelection,
                to: SessionState::Delivering,
            })
        );
        assert!(matches!(
            manager.transition(id + 1, SessionState::Cropping),
            Err(TransitionError::NotActive { .. })
        ));
    }

    #[test]
    fn test_finish_releases_guard() {
        let manager = StateManager::new();
        let id = manager.try_begin_session().unwrap();
        manager.transition(id, SessionState::Cancelled).unwrap();

        manager.finish_session(id, SessionOutcome::Cancelled(CancelReason::UserCancelled));

        let state = manager.snapshot();
        assert!(!state.is_busy());
        assert_eq!(
            state.last_outcome,
            Some(SessionOutcome::Cancelled(CancelReason::UserCancelled))
        );
        assert!(manager.try_begin_session().is_some());
    }

    #[test]
    fn test_finish_from_mid_pipeline() {
        let manager = StateManager::new();
        let id = manager.try_begin_session().unwrap();
        manager.transition(id, SessionState::AwaitingSelection).unwrap();

        manager.finish_session(
            id,
            SessionOutcome::Failed {
                message: "boom".to_string(),
            },
        );
        assert!(!manager.is_busy());
    }

    #[test]
    fn test_stale_finish_is_ignored() {
        let manager = StateManager::new();
        let id = manager.try_begin_session().unwrap();

        let changes = manager.finish_session(id + 7, SessionOutcome::Cancelled(CancelReason::EmptyResult));
        assert!(changes.is_empty());
        assert!(manager.is_busy());
    }

    #[test]
    fn test_subscribe_to_changes() {
        let manager = StateManager::new();
        let mut rx = manager.subscribe();

        let id = manager.try_begin_session().unwrap();

        let change = rx.try_recv().unwrap();
        assert_eq!(change, StateChange::SessionStarted { id });
        let change = rx.try_recv().unwrap();
        assert_eq!(
            change,
            StateChange::PhaseChanged {
                id,
                state: SessionState::CapturingFullFrame
            }
        );
    }

    #[test]
    fn test_reset() {
        let manager = StateManager::new();
        manager.try_begin_session();
        manager.reset();
        assert_eq!(manager.snapshot().sessions_started, 0);
        assert!(!manager.is_busy());
    }
}
