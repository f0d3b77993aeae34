//! Region selection protocol.
//!
//! The overlay feeds raw pointer and keyboard events into a [`SelectionTracker`], which
//! decides when the selection resolves. Keeping the protocol free of any windowing code
//! lets it be driven directly from tests.

use crate::models::Region;
use async_trait::async_trait;
use camino::Utf8Path;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// Input delivered by the overlay, in overlay-local pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionEvent {
    Press { x: u32, y: u32 },
    Move { x: u32, y: u32 },
    Release { x: u32, y: u32 },
    /// Escape key
    Cancel,
    /// The overlay window was closed from outside
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Dragging { start: (u32, u32), current: (u32, u32) },
    Resolved,
}

/// State machine for one drag-to-select interaction.
///
/// Resolves exactly once: [`handle`](Self::handle) returns `Some` for the event that
/// resolves the selection and `None` for every other event, including all events after
/// resolution.
#[derive(Debug)]
pub struct SelectionTracker {
    phase: Phase,
}

impl Default for SelectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionTracker {
    pub fn new() -> Self {
        Self {
            phase: Phase::Waiting,
        }
    }

    /// Feed one event.
    ///
    /// # Returns
    /// - `Some(Some(region))` when a drag of acceptable size is released
    /// - `Some(None)` on Escape or close
    /// - `None` otherwise; an undersized release returns to waiting for a new drag
    pub fn handle(&mut self, event: SelectionEvent) -> Option<Option<Region>> {
        match (self.phase, event) {
            (Phase::Resolved, _) => None,

            (_, SelectionEvent::Cancel | SelectionEvent::Closed) => {
                self.phase = Phase::Resolved;
                Some(None)
            }

            (Phase::Waiting, SelectionEvent::Press { x, y }) => {
                self.phase = Phase::Dragging {
                    start: (x, y),
                    current: (x, y),
                };
                None
            }

            (Phase::Dragging { start, .. }, SelectionEvent::Move { x, y }) => {
                self.phase = Phase::Dragging {
                    start,
                    current: (x, y),
                };
                None
            }

            (Phase::Dragging { start, .. }, SelectionEvent::Release { x, y }) => {
                let region = Region::from_points(start, (x, y));
                if region.is_acceptable() {
                    self.phase = Phase::Resolved;
                    Some(Some(region))
                } else {
                    tracing::debug!(
                        "Ignoring {}x{} selection below minimum size",
                        region.width,
                        region.height
                    );
                    self.phase = Phase::Waiting;
                    None
                }
            }

            // A second press mid-drag restarts the rubber band
            (Phase::Dragging { .. }, SelectionEvent::Press { x, y }) => {
                self.phase = Phase::Dragging {
                    start: (x, y),
                    current: (x, y),
                };
                None
            }

            (Phase::Waiting, SelectionEvent::Move { .. } | SelectionEvent::Release { .. }) => None,
        }
    }

    /// End of input: an unresolved selection resolves as cancelled.
    pub fn finish(&mut self) -> Option<Option<Region>> {
        self.handle(SelectionEvent::Closed)
    }

    /// Rectangle to draw while dragging.
    pub fn rubber_band(&self) -> Option<Region> {
        match self.phase {
            Phase::Dragging { start, current } => Some(Region::from_points(start, current)),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.phase == Phase::Resolved
    }
}

/// One-shot delivery of a selection result.
///
/// The first [`resolve`](Self::resolve) wins; later calls are dropped.
pub struct SelectionResolver {
    tx: Mutex<Option<oneshot::Sender<Option<Region>>>>,
}

impl SelectionResolver {
    /// Create a resolver and the receiver its result arrives on.
    pub fn new() -> (Self, oneshot::Receiver<Option<Region>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver `selection` if nothing was delivered yet.
    ///
    /// # Returns
    /// `true` if this call delivered the result
    pub fn resolve(&self, selection: Option<Region>) -> bool {
        let sender = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // The receiver may be gone if the session already failed
                let _ = tx.send(selection);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

/// Errors raised while presenting the selection overlay
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("Selection overlay unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load captured image: {0}")]
    Image(String),
}

/// Presents a still image and lets the user pick a rectangle on it.
///
/// Returns the region in image pixels, or `None` when the user cancelled. There is no
/// timeout: the future completes only when the user acts or the overlay is closed.
#[async_trait]
pub trait RegionSelector: Send + Sync {
    async fn select_region(&self, image_path: &Utf8Path) -> Result<Option<Region>, SelectionError>;
}
