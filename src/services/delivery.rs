//! Result delivery seams: clipboard and notification surface.

use crate::models::HistoryEntry;
use anyhow::{Context, Result};
use std::sync::{Mutex, PoisonError};

/// Signal pushed to the notification surface at the end of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Recognition succeeded
    Result {
        history: Vec<HistoryEntry>,
        text: String,
        /// Show a transient toast in addition to updating the history view
        toast: bool,
    },
    /// Recognition finished but found no text
    EmptyResult,
    /// A capture was requested while another was running
    Busy,
    /// The session failed
    Error { message: String },
}

impl Notification {
    /// User-facing one-line message.
    pub fn message(&self) -> String {
        match self {
            Notification::Result { text, .. } => text.clone(),
            Notification::EmptyResult => "No text recognized".to_string(),
            Notification::Busy => "OCR is already in progress, please wait".to_string(),
            Notification::Error { message } => format!("OCR failed: {message}"),
        }
    }
}

/// Renders notifications to the user. Pushes are fire-and-forget.
pub trait NotificationSurface: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// System clipboard.
pub trait Clipboard: Send + Sync {
    fn set_text(&self, text: &str) -> Result<()>;
}

/// Clipboard backed by `arboard`.
///
/// The handle is created on first use and kept for the process lifetime, so the copied
/// text stays available on platforms where the owning process serves the selection.
pub struct ArboardClipboard {
    inner: Mutex<Option<arboard::Clipboard>>,
}

impl ArboardClipboard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl Default for ArboardClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard for ArboardClipboard {
    fn set_text(&self, text: &str) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(arboard::Clipboard::new().context("Failed to open clipboard")?);
        }
        let clipboard = guard.as_mut().context("Clipboard unavailable")?;
        clipboard
            .set_text(text.to_string())
            .context("Failed to write clipboard")?;
        tracing::debug!("Copied {} chars to clipboard", text.chars().count());
        Ok(())
    }
}

/// Notification surface that writes to the log, optionally echoing results to stdout.
pub struct LogNotifier {
    echo_results: bool,
}

impl LogNotifier {
    pub fn new(echo_results: bool) -> Self {
        Self { echo_results }
    }
}

impl NotificationSurface for LogNotifier {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Result { history, text, toast } => {
                tracing::info!(
                    "Recognized {} chars (history: {}, toast: {})",
                    text.chars().count(),
                    history.len(),
                    toast
                );
                if self.echo_results {
                    println!("{text}");
                }
            }
            Notification::EmptyResult | Notification::Busy => {
                tracing::info!("{}", notification.message());
            }
            Notification::Error { .. } => {
                tracing::error!("{}", notification.message());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(Notification::EmptyResult.message(), "No text recognized");
        assert!(
            Notification::Error {
                message: "boom".to_string()
            }
            .message()
            .contains("boom")
        );
        let result = Notification::Result {
            history: vec![],
            text: "Hello".to_string(),
            toast: true,
        };
        assert_eq!(result.message(), "Hello");
    }
}
