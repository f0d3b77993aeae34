//! Screen capture backends.
//!
//! Two variants exist, chosen once at startup by [`platform_backend`]:
//!
//! - [`NativeInteractiveBackend`] runs the OS screenshot utility in interactive region mode.
//!   The user picks the region inside the utility, so its output is already cropped.
//! - [`FrameGrabBackend`] grabs the primary display with `xcap`. The orchestrator then asks
//!   the region selector for a rectangle and calls [`crop_region`].
//!
//! All images land in a [`TempImageDir`]. Callers own the files and delete them.

use crate::models::Region;
use crate::services::ocr::{OcrError, remove_image};
use crate::state::TransitionError;
use crate::storage::StoreError;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::process::Command;
use xcap::Monitor;

/// Errors that end (or redirect) a capture session
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Selection escaped, overlay closed, or region below the minimum size
    #[error("Capture cancelled by the user")]
    UserCancelled,

    #[error("Screen capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Crop failed: {0}")]
    CropFailure(#[from] CropError),

    #[error("OCR engine failed to initialize: {0}")]
    EngineInitFailure(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("No text was recognized")]
    EmptyResult,

    #[error("Failed to persist result: {0}")]
    PersistenceFailure(#[from] StoreError),

    #[error("Invalid session transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<OcrError> for CaptureError {
    fn from(err: OcrError) -> Self {
        match err {
            OcrError::EngineInit { .. } => CaptureError::EngineInitFailure(err.to_string()),
            other => CaptureError::Recognition(other.to_string()),
        }
    }
}

/// Errors raised while cropping a captured frame
#[derive(Error, Debug)]
pub enum CropError {
    #[error("Crop rectangle has zero width or height")]
    ZeroDimension,

    #[error(
        "Crop rectangle ({},{},{},{}) exceeds image bounds ({}x{})",
        requested.x, requested.y, requested.width, requested.height,
        image_size.0, image_size.1
    )]
    OutOfBounds {
        requested: Region,
        image_size: (u32, u32),
    },

    #[error("Failed to decode {path}: {message}")]
    Decode { path: Utf8PathBuf, message: String },

    #[error("PNG encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Crop task aborted: {0}")]
    Aborted(String),
}

/// Result of a backend capture call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// The user already chose a region; the image is final
    Selected(Utf8PathBuf),
    /// A full-frame still that still needs a selection and crop
    FullFrame(Utf8PathBuf),
    /// The user dismissed the capture utility
    Cancelled,
}

/// Process-scoped directory for captured images.
///
/// Every path handed out is unique within the process: a millisecond timestamp plus a
/// monotonically increasing sequence number.
#[derive(Debug, Clone)]
pub struct TempImageDir {
    root: Utf8PathBuf,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl TempImageDir {
    /// Directory under the platform temp dir (`<temp>/quick-ocr`).
    pub fn system() -> Result<Self, CaptureError> {
        let temp = Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|p| {
            CaptureError::CaptureUnavailable(format!(
                "Temp directory is not UTF-8: {}",
                p.display()
            ))
        })?;
        Ok(Self::new(temp.join("quick-ocr")))
    }

    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Allocate a fresh `.png` path with the given prefix, creating the directory.
    pub fn unique_path(&self, prefix: &str) -> Result<Utf8PathBuf, CaptureError> {
        fs::create_dir_all(&self.root)?;
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Ok(self.root.join(format!(
            "{}-{}-{}.png",
            prefix,
            Utc::now().timestamp_millis(),
            seq
        )))
    }
}

/// Platform capture capability.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Produce a still image under `dir`.
    async fn capture(&self, dir: &TempImageDir) -> Result<Capture, CaptureError>;
}

/// Interactive region capture through the OS screenshot utility (`screencapture` on macOS).
pub struct NativeInteractiveBackend {
    program: String,
}

impl NativeInteractiveBackend {
    pub fn new() -> Self {
        Self::with_program("screencapture")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for region mode without window shadow, writing to `output`.
    pub fn build_args(output: &Utf8Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            "-s".to_string(),
            "-o".to_string(),
            output.to_string(),
        ]
    }
}

impl Default for NativeInteractiveBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureBackend for NativeInteractiveBackend {
    fn name(&self) -> &'static str {
        "native-interactive"
    }

    async fn capture(&self, dir: &TempImageDir) -> Result<Capture, CaptureError> {
        let output = dir.unique_path("screenshot")?;
        let args = Self::build_args(&output);
        tracing::info!("Executing: {} {}", self.program, args.join(" "));

        // The utility cannot be aborted once running; wait for the user to finish
        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .await
            .map_err(|e| {
                CaptureError::CaptureUnavailable(format!("Failed to run {}: {}", self.program, e))
            })?;

        let size = fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
        if size > 0 {
            tracing::info!("Captured region to {} ({} bytes)", output, size);
            return Ok(Capture::Selected(output));
        }

        tracing::info!(
            "No capture produced (exit status {:?}), treating as cancellation",
            status.code()
        );
        if output.exists() {
            let _ = fs::remove_file(&output);
        }
        Ok(Capture::Cancelled)
    }
}

/// Full-frame grab of the primary display through `xcap`.
pub struct FrameGrabBackend;

impl FrameGrabBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FrameGrabBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Grab the primary monitor, falling back to the first one enumerated.
fn grab_primary_monitor() -> Result<DynamicImage, CaptureError> {
    let monitors = Monitor::all().map_err(|e| {
        CaptureError::CaptureUnavailable(format!("Failed to enumerate monitors: {}", e))
    })?;

    let count = monitors.len();
    // Fallback: if no monitor reports as primary, use the first one
    let index = monitors
        .iter()
        .position(|m| m.is_primary().unwrap_or(false))
        .unwrap_or(0);
    let monitor = monitors.into_iter().nth(index).ok_or_else(|| {
        CaptureError::CaptureUnavailable("No screen capture source found".to_string())
    })?;
    tracing::debug!(
        "Capturing monitor {:?} of {}",
        monitor.name().unwrap_or_default(),
        count
    );

    let image = monitor
        .capture_image()
        .map_err(|e| CaptureError::CaptureUnavailable(format!("Screen capture failed: {}", e)))?;

    Ok(DynamicImage::ImageRgba8(image))
}

#[async_trait]
impl CaptureBackend for FrameGrabBackend {
    fn name(&self) -> &'static str {
        "frame-grab"
    }

    async fn capture(&self, dir: &TempImageDir) -> Result<Capture, CaptureError> {
        let output = dir.unique_path("screenshot-full")?;
        let path = output.clone();

        let saved = tokio::task::spawn_blocking(move || -> Result<(), CaptureError> {
            let image = grab_primary_monitor()?;
            image
                .save_with_format(&path, ImageFormat::Png)
                .map_err(|e| {
                    CaptureError::CaptureUnavailable(format!("Failed to encode frame: {}", e))
                })?;
            Ok(())
        })
        .await
        .map_err(|e| CaptureError::CaptureUnavailable(format!("Capture task aborted: {}", e)))
        .and_then(|result| result);
        discard_on_error(saved, &output)?;

        tracing::info!("Saved full frame to {}", output);
        Ok(Capture::FullFrame(output))
    }
}

/// Remove a partially written image when producing it failed.
///
/// The session never learns the path of a failed capture, so nothing else cleans it up.
fn discard_on_error<T, E>(result: Result<T, E>, path: &Utf8Path) -> Result<T, E> {
    if result.is_err() {
        remove_image(path);
    }
    result
}

/// Pick the capture backend for this platform.
///
/// macOS uses the native interactive utility when it is on `PATH`; everything else grabs
/// frames with `xcap`.
pub fn platform_backend() -> Arc<dyn CaptureBackend> {
    if cfg!(target_os = "macos") && which::which("screencapture").is_ok() {
        tracing::info!("Using native interactive capture backend");
        Arc::new(NativeInteractiveBackend::new())
    } else {
        tracing::info!("Using frame-grab capture backend");
        Arc::new(FrameGrabBackend::new())
    }
}

/// Crop `image` to `region`, clamping a rectangle that overhangs the right or bottom edge.
pub fn crop_image(image: &DynamicImage, region: Region) -> Result<DynamicImage, CropError> {
    if region.width == 0 || region.height == 0 {
        return Err(CropError::ZeroDimension);
    }

    let image_size = (image.width(), image.height());
    let clamped = region
        .clamp_to(image_size.0, image_size.1)
        .ok_or(CropError::OutOfBounds {
            requested: region,
            image_size,
        })?;

    Ok(image.crop_imm(clamped.x, clamped.y, clamped.width, clamped.height))
}

/// Crop the still at `source` and save the result as a new PNG under `dir`.
pub async fn crop_region(
    source: &Utf8Path,
    region: Region,
    dir: &TempImageDir,
) -> Result<Utf8PathBuf, CropError> {
    let output = dir
        .unique_path("screenshot-region")
        .map_err(|e| CropError::EncodingFailed(e.to_string()))?;
    let source = source.to_path_buf();
    let path = output.clone();

    let saved = tokio::task::spawn_blocking(move || -> Result<(), CropError> {
        let image = image::open(&source).map_err(|e| CropError::Decode {
            path: source.clone(),
            message: e.to_string(),
        })?;
        let cropped = crop_image(&image, region)?;
        cropped
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| CropError::EncodingFailed(e.to_string()))
    })
    .await
    .map_err(|e| CropError::Aborted(e.to_string()))
    .and_then(|result| result);
    discard_on_error(saved, &output)?;

    tracing::info!("Cropped {:?} to {}", region, output);
    Ok(output)
}
