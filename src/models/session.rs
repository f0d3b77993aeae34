use super::region::Region;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use std::fmt;

/// Phase of the capture-to-result pipeline.
///
/// The happy path is
/// `Idle -> CapturingFullFrame -> AwaitingSelection -> Cropping -> Recognizing -> Delivering -> Idle`.
/// `Cancelled` is reachable from every state before `Delivering`, and `Failed` from
/// every non-idle state. Both terminal states return to `Idle` after cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    CapturingFullFrame,
    AwaitingSelection,
    Cropping,
    Recognizing,
    Delivering,
    Cancelled,
    Failed,
}

impl SessionState {
    /// True for states that come before recognition starts.
    pub fn is_pre_recognition(self) -> bool {
        matches!(
            self,
            SessionState::CapturingFullFrame
                | SessionState::AwaitingSelection
                | SessionState::Cropping
        )
    }

    /// Check whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if next == Failed {
            return self != Idle;
        }

        match (self, next) {
            (Idle, CapturingFullFrame) => true,
            // Native capture collapses selection and cropping into one call
            (CapturingFullFrame, AwaitingSelection | Recognizing) => true,
            (AwaitingSelection, Cropping) => true,
            (Cropping, Recognizing) => true,
            (Recognizing, Delivering) => true,
            // Empty recognition result
            (Recognizing, Cancelled) => true,
            (from, Cancelled) => from.is_pre_recognition(),
            (Delivering | Cancelled | Failed, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::CapturingFullFrame => "capturing full frame",
            SessionState::AwaitingSelection => "awaiting selection",
            SessionState::Cropping => "cropping",
            SessionState::Recognizing => "recognizing",
            SessionState::Delivering => "delivering",
            SessionState::Cancelled => "cancelled",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session ended in `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Escape, overlay closed, or a selection below the minimum size
    UserCancelled,
    /// Recognition produced only whitespace
    EmptyResult,
}

/// How a completed session ended. Exactly one outcome is recorded per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Delivered { text: String },
    Cancelled(CancelReason),
    Failed { message: String },
}

/// Transient record of one capture invocation.
///
/// Owned by the orchestrator and dropped once the session returns to idle.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: u64,
    pub state: SessionState,
    pub source_image_path: Option<Utf8PathBuf>,
    pub region: Option<Region>,
    pub cropped_image_path: Option<Utf8PathBuf>,
    pub language: String,
    pub started_at: DateTime<Utc>,
}

impl CaptureSession {
    pub fn new(id: u64, language: impl Into<String>) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            source_image_path: None,
            region: None,
            cropped_image_path: None,
            language: language.into(),
            started_at: Utc::now(),
        }
    }

    /// The image that should be fed to recognition: the crop when present, else the source.
    pub fn recognition_image(&self) -> Option<&Utf8Path> {
        self.cropped_image_path
            .as_deref()
            .or(self.source_image_path.as_deref())
    }

    /// Every temporary image this session produced, deduplicated.
    pub fn temp_files(&self) -> Vec<Utf8PathBuf> {
        let mut files: Vec<Utf8PathBuf> = Vec::new();
        for path in [&self.source_image_path, &self.cropped_image_path]
            .into_iter()
            .flatten()
        {
            if !files.contains(path) {
                files.push(path.clone());
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Idle,
            CapturingFullFrame,
            AwaitingSelection,
            Cropping,
            Recognizing,
            Delivering,
            Idle,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_native_capture_skips_selection() {
        assert!(CapturingFullFrame.can_transition_to(Recognizing));
    }

    #[test]
    fn test_cancel_only_before_delivery() {
        assert!(CapturingFullFrame.can_transition_to(Cancelled));
        assert!(AwaitingSelection.can_transition_to(Cancelled));
        assert!(Cropping.can_transition_to(Cancelled));
        assert!(Recognizing.can_transition_to(Cancelled));
        assert!(!Delivering.can_transition_to(Cancelled));
        assert!(!Idle.can_transition_to(Cancelled));
    }

    #[test]
    fn test_failed_from_any_active_state() {
        for state in [
            CapturingFullFrame,
            AwaitingSelection,
            Cropping,
            Recognizing,
            Delivering,
        ] {
            assert!(state.can_transition_to(Failed));
        }
        assert!(!Idle.can_transition_to(Failed));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Idle.can_transition_to(Recognizing));
        assert!(!AwaitingSelection.can_transition_to(Delivering));
        assert!(!Cancelled.can_transition_to(Delivering));
    }

    #[test]
    fn test_temp_files_deduplicated() {
        let mut session = CaptureSession::new(1, "eng");
        session.source_image_path = Some("/tmp/a.png".into());
        session.cropped_image_path = Some("/tmp/a.png".into());
        assert_eq!(session.temp_files().len(), 1);

        session.cropped_image_path = Some("/tmp/b.png".into());
        assert_eq!(session.temp_files().len(), 2);
        assert_eq!(session.recognition_image(), Some(Utf8Path::new("/tmp/b.png")));
    }
}
