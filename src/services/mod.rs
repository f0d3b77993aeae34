//! Services module - the capture-to-result pipeline.
//!
//! The services are **framework-agnostic**: nothing here depends on Slint or on the
//! hotkey layer. Every platform or user-facing seam is a trait so the pipeline can be
//! driven end to end with stubs.
//!
//! # Components
//!
//! - [`CaptureOrchestrator`]: single-flight session state machine. Owns the guard through
//!   [`crate::state::StateManager`], sequences capture, selection, crop, recognition, and
//!   delivery, and cleans up temporary images on every exit path.
//! - [`capture`]: [`CaptureBackend`] with the native-interactive (`screencapture`) and
//!   frame-grab (`xcap`) variants, plus cropping.
//! - [`selection`]: the drag-to-select protocol ([`SelectionTracker`]) and the
//!   [`RegionSelector`] seam implemented by the Slint overlay.
//! - [`ocr`]: [`OcrAdapter`] around the `tesseract` program, with bundled/default
//!   language-data fallback and the CJK tuning profile.
//! - [`result`]: [`ResultProcessor`] trimming and paragraph merging.
//! - [`delivery`]: clipboard and notification-surface seams.
//!
//! # Usage Example
//!
//! ```ignore
//! use quick_ocr::services::*;
//!
//! let orchestrator = Arc::new(CaptureOrchestrator::new(
//!     context,
//!     platform_backend(),
//!     selector,
//!     Arc::new(OcrAdapter::tesseract()),
//!     Arc::new(ArboardClipboard::new()),
//!     Arc::new(LogNotifier::new(false)),
//!     TempImageDir::system()?,
//! ));
//!
//! match orchestrator.request_capture() {
//!     CaptureRequest::Accepted { handle, .. } => println!("{:?}", handle.await?),
//!     CaptureRequest::Busy => {}
//! }
//! ```

pub mod capture;
pub mod delivery;
pub mod ocr;
pub mod orchestrator;
pub mod result;
pub mod selection;

pub use capture::{
    Capture, CaptureBackend, CaptureError, CropError, FrameGrabBackend, NativeInteractiveBackend,
    TempImageDir, crop_region, platform_backend,
};
pub use delivery::{ArboardClipboard, Clipboard, LogNotifier, Notification, NotificationSurface};
pub use ocr::{
    OcrAdapter, OcrEngine, OcrEngineFactory, OcrError, OcrSettings, TesseractFactory, TextRecognizer,
    TuningProfile,
};
pub use orchestrator::{AppContext, CaptureOrchestrator, CaptureRequest};
pub use result::ResultProcessor;
pub use selection::{RegionSelector, SelectionError, SelectionEvent, SelectionResolver, SelectionTracker};
