//! Capture orchestrator: the single-flight capture-to-result pipeline.
//!
//! ```text
//! Idle -> CapturingFullFrame -> AwaitingSelection -> Cropping -> Recognizing -> Delivering -> Idle
//!                \______________________________________/            |
//!                      Cancelled (user / empty result)  <------------+
//! ```
//!
//! [`CaptureOrchestrator::request_capture`] checks and sets the guard synchronously, then
//! runs the session on a tokio task. Every exit path records exactly one
//! [`SessionOutcome`], removes the session's temporary images, and releases the guard.

use crate::config::ConfigManager;
use crate::metrics::Metrics;
use crate::models::{
    CancelReason, CaptureSession, Config, PartialConfig, SessionOutcome, SessionState,
};
use crate::services::capture::{Capture, CaptureBackend, CaptureError, TempImageDir, crop_region};
use crate::services::delivery::{Clipboard, Notification, NotificationSurface};
use crate::services::ocr::{OcrSettings, TextRecognizer, remove_image};
use crate::services::result::ResultProcessor;
use crate::services::selection::RegionSelector;
use crate::state::StateManager;
use crate::storage::HistoryStore;
use anyhow::Result;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Process-owned context shared by the orchestrator and the settings surface.
///
/// Holds the current config in memory. The config only changes through
/// [`update_config`](Self::update_config), which persists before publishing.
pub struct AppContext {
    state: StateManager,
    config: RwLock<Config>,
    config_manager: ConfigManager,
    history: HistoryStore,
    metrics: Metrics,
    config_tx: broadcast::Sender<Config>,
}

impl AppContext {
    /// Load the config from `config_manager` and open the history log beside it.
    pub fn load(config_manager: ConfigManager) -> Result<Self> {
        let config = config_manager.load()?;
        let history = config_manager.history_store();
        let (config_tx, _) = broadcast::channel(16);

        Ok(Self {
            state: StateManager::new(),
            config: RwLock::new(config),
            config_manager,
            history,
            metrics: Metrics::new(),
            config_tx,
        })
    }

    /// Replace the history log opened beside the config.
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = history;
        self
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config_manager(&self) -> &ConfigManager {
        &self.config_manager
    }

    /// Snapshot of the current config.
    pub fn config(&self) -> Config {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Merge `partial` onto the stored config, persist it, and publish the result.
    pub fn update_config(&self, partial: PartialConfig) -> Result<Config> {
        let merged = self.config_manager.save_partial(partial)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = merged.clone();
        let _ = self.config_tx.send(merged.clone());
        Ok(merged)
    }

    /// Settings-surface save: merge and persist, reporting success as a flag.
    pub fn save_settings(&self, partial: PartialConfig) -> bool {
        match self.update_config(partial) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to save settings: {:#}", e);
                false
            }
        }
    }

    /// Re-read the config from disk, publishing it if it differs from the one in memory.
    ///
    /// # Returns
    /// Whether the in-memory config changed
    pub fn reload_config(&self) -> Result<bool> {
        let loaded = self.config_manager.load()?;
        {
            let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
            if *current == loaded {
                return Ok(false);
            }
            *current = loaded.clone();
        }

        tracing::info!("Config changed on disk, reloaded");
        let _ = self.config_tx.send(loaded);
        Ok(true)
    }

    /// Subscribe to config updates (e.g. to re-register the hotkey).
    pub fn subscribe_config(&self) -> broadcast::Receiver<Config> {
        self.config_tx.subscribe()
    }
}

/// Answer to a capture request
#[derive(Debug)]
pub enum CaptureRequest {
    /// A new session started; the handle resolves with its outcome
    Accepted {
        id: u64,
        handle: JoinHandle<SessionOutcome>,
    },
    /// Another session is active; nothing was started
    Busy,
}

impl CaptureRequest {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CaptureRequest::Accepted { .. })
    }
}

/// Releases the guard if a session task unwinds before reaching its normal finish.
struct SessionGuard<'a> {
    state: &'a StateManager,
    session: CaptureSession,
    finished: bool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::error!("Capture session {} aborted", self.session.id);
        for path in self.session.temp_files() {
            remove_image(&path);
        }
        self.state.finish_session(
            self.session.id,
            SessionOutcome::Failed {
                message: "session aborted".to_string(),
            },
        );
    }
}

/// Drives capture sessions end to end.
pub struct CaptureOrchestrator {
    context: Arc<AppContext>,
    backend: Arc<dyn CaptureBackend>,
    selector: Arc<dyn RegionSelector>,
    recognizer: Arc<dyn TextRecognizer>,
    clipboard: Arc<dyn Clipboard>,
    notifier: Arc<dyn NotificationSurface>,
    temp_dir: TempImageDir,
    processor: ResultProcessor,
}

impl CaptureOrchestrator {
    /// # Arguments
    /// * `context` - Shared config, state, and history
    /// * `backend` - Platform capture variant
    /// * `selector` - Region selector used with full-frame captures
    /// * `recognizer` - OCR adapter
    /// * `clipboard` - Clipboard for `autoClipboard`
    /// * `notifier` - Notification surface
    pub fn new(
        context: Arc<AppContext>,
        backend: Arc<dyn CaptureBackend>,
        selector: Arc<dyn RegionSelector>,
        recognizer: Arc<dyn TextRecognizer>,
        clipboard: Arc<dyn Clipboard>,
        notifier: Arc<dyn NotificationSurface>,
        temp_dir: TempImageDir,
    ) -> Self {
        tracing::info!("Capture orchestrator using {} backend", backend.name());
        Self {
            context,
            backend,
            selector,
            recognizer,
            clipboard,
            notifier,
            temp_dir,
            processor: ResultProcessor::new(),
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Start a capture session unless one is already running.
    ///
    /// Must be called from within a tokio runtime. Returns immediately; the result is
    /// delivered through the notification surface. A request made while busy starts
    /// nothing and pushes [`Notification::Busy`].
    pub fn request_capture(self: &Arc<Self>) -> CaptureRequest {
        let Some(id) = self.context.state().try_begin_session() else {
            self.context.metrics().record_busy();
            self.notifier.notify(Notification::Busy);
            return CaptureRequest::Busy;
        };

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_session(id).await });
        CaptureRequest::Accepted { id, handle }
    }

    async fn run_session(self: Arc<Self>, id: u64) -> SessionOutcome {
        let config = self.context.config();
        let mut guard = SessionGuard {
            state: self.context.state(),
            session: CaptureSession::new(id, config.language.clone()),
            finished: false,
        };
        guard.session.state = SessionState::CapturingFullFrame;
        tracing::info!("Session {} capturing with languages {}", id, config.language);

        let result = self
            .run_pipeline(&mut guard.session, &config)
            .await
            .and_then(|text| self.deliver(&text, &config).map(|()| text));

        let outcome = match result {
            Ok(text) => SessionOutcome::Delivered { text },
            Err(CaptureError::UserCancelled) => {
                self.enter(&mut guard.session, SessionState::Cancelled);
                SessionOutcome::Cancelled(CancelReason::UserCancelled)
            }
            Err(CaptureError::EmptyResult) => {
                self.enter(&mut guard.session, SessionState::Cancelled);
                self.notifier.notify(Notification::EmptyResult);
                SessionOutcome::Cancelled(CancelReason::EmptyResult)
            }
            Err(e) => {
                tracing::error!("Session {} failed: {}", id, e);
                self.enter(&mut guard.session, SessionState::Failed);
                let message = e.to_string();
                self.notifier.notify(Notification::Error {
                    message: message.clone(),
                });
                SessionOutcome::Failed { message }
            }
        };

        for path in guard.session.temp_files() {
            remove_image(&path);
        }

        let elapsed = (chrono::Utc::now() - guard.session.started_at)
            .to_std()
            .unwrap_or_default();
        self.context.metrics().record_outcome(&outcome, elapsed);
        self.context.state().finish_session(id, outcome.clone());
        guard.finished = true;
        outcome
    }

    /// Best-effort move into a terminal state; the guard is released regardless.
    fn enter(&self, session: &mut CaptureSession, next: SessionState) {
        match self.context.state().transition(session.id, next) {
            Ok(()) => session.state = next,
            Err(e) => tracing::warn!("Session {}: {}", session.id, e),
        }
    }

    fn advance(&self, session: &mut CaptureSession, next: SessionState) -> Result<(), CaptureError> {
        self.context.state().transition(session.id, next)?;
        session.state = next;
        Ok(())
    }

    async fn run_pipeline(
        &self,
        session: &mut CaptureSession,
        config: &Config,
    ) -> Result<String, CaptureError> {
        match self.backend.capture(&self.temp_dir).await? {
            Capture::Cancelled => return Err(CaptureError::UserCancelled),
            Capture::Selected(path) => {
                session.source_image_path = Some(path);
            }
            Capture::FullFrame(path) => {
                session.source_image_path = Some(path.clone());
                self.advance(session, SessionState::AwaitingSelection)?;

                let region = self
                    .selector
                    .select_region(&path)
                    .await
                    .map_err(|e| CaptureError::CaptureUnavailable(e.to_string()))?;
                let region = match region {
                    Some(region) if region.is_acceptable() => region,
                    _ => return Err(CaptureError::UserCancelled),
                };
                session.region = Some(region);

                self.advance(session, SessionState::Cropping)?;
                match crop_region(&path, region, &self.temp_dir).await {
                    Ok(cropped) => {
                        session.cropped_image_path = Some(cropped);
                        remove_image(&path);
                    }
                    Err(e) => {
                        tracing::warn!("Crop failed, recognizing the full frame instead: {}", e);
                    }
                }
            }
        }

        self.advance(session, SessionState::Recognizing)?;
        let image = session
            .recognition_image()
            .ok_or_else(|| CaptureError::CaptureUnavailable("No image captured".to_string()))?
            .to_path_buf();

        let settings = OcrSettings::from_config(config);
        let raw = self
            .recognizer
            .recognize(&image, &session.language, &settings)
            .await?;
        let text = self.processor.process(&raw, config.merge_paragraphs);
        if ResultProcessor::is_blank(&text) {
            return Err(CaptureError::EmptyResult);
        }

        self.advance(session, SessionState::Delivering)?;
        Ok(text)
    }

    fn deliver(&self, text: &str, config: &Config) -> Result<(), CaptureError> {
        if config.auto_clipboard {
            if let Err(e) = self.clipboard.set_text(text) {
                tracing::warn!("Failed to copy result to clipboard: {:#}", e);
            }
        }

        let history = self.context.history().append(text)?;
        self.notifier.notify(Notification::Result {
            history,
            text: text.to_string(),
            toast: config.show_notification,
        });
        Ok(())
    }
}
