//! Quick OCR - hotkey-driven screen region OCR
//!
//! Main entry point for the daemon and the command-line tools.
//!
//! # Overview
//!
//! `quick-ocr run` (the default) initializes:
//! - Logging infrastructure (daily file rotation + stderr console output)
//! - Tokio async runtime (4 worker threads for capture, OCR subprocesses, and file I/O)
//! - Application context ([`AppContext`]: config, state, history)
//! - The capture pipeline ([`CaptureOrchestrator`])
//! - The global hotkey and its listener thread
//!
//! The application uses a hybrid threading model:
//! - **Main thread**: Runs the Slint event loop (selection overlay, hotkey manager)
//! - **Tokio workers**: Run capture sessions, the OCR engine, and the config watcher
//! - **Hotkey listener**: Background std::thread turning key presses into capture requests
//!
//! # Execution Flow
//!
//! 1. Resolve the data directory (`--data-dir`, `QUICK_OCR_DATA_DIR`, platform data dir)
//! 2. Initialize logging -> `<data dir>/logs/quick-ocr.<date>`
//! 3. Create tokio runtime with 4 worker threads
//! 4. Load `config.json` and open `ocr_history.json`
//! 5. Register the global hotkey, start the listener and the config watcher
//! 6. Run the Slint event loop until Ctrl+C (or until the single capture finishes)
//! 7. Log session metrics and shut down the runtime with a 5s timeout

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use quick_ocr::config::ConfigWatch;
use quick_ocr::services::{
    AppContext, ArboardClipboard, CaptureOrchestrator, CaptureRequest, LogNotifier, Notification,
    NotificationSurface, OcrAdapter, TempImageDir, platform_backend,
};
use quick_ocr::ui::{SlintRegionSelector, hotkey};
use quick_ocr::{APP_NAME, ConfigManager, PartialConfig, VERSION};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const WORKER_THREADS: usize = 4;
const CONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "quick-ocr", version, about = "Hotkey-driven screen region OCR")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Data directory holding config.json, ocr_history.json, and logs
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Run in the background and capture on the global hotkey (default)
    Run,
    /// Capture one region, print the recognized text, and exit
    Capture,
    /// Print the recognition history, newest first
    History,
    /// Remove every history entry
    ClearHistory,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum ConfigAction {
    /// Print the current config as JSON
    Show,
    /// Set one setting by its config.json key, e.g. `set autoClipboard false`
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let data_dir = ConfigManager::default_data_dir(cli.data_dir.as_deref())?;
    let config_manager = ConfigManager::new(&data_dir)?;

    // stdout is kept for command output; console logs go to stderr in daemon mode only
    let _log_guard = quick_ocr::logging::setup_logging_with_console(
        &config_manager.log_dir(),
        "quick-ocr",
        cli.debug,
        command == Command::Run,
    )?;

    tracing::info!("Starting {} v{} ({:?})", APP_NAME, VERSION, command);
    tracing::info!("Data directory: {}", config_manager.data_dir());

    match command {
        Command::Run => run_event_loop(config_manager, false),
        Command::Capture => run_event_loop(config_manager, true),
        Command::History => print_history(&config_manager),
        Command::ClearHistory => clear_history(&config_manager),
        Command::Config { action } => run_config_action(&config_manager, action),
    }
}

/// Run the Slint event loop with the capture pipeline wired up.
///
/// # Arguments
/// * `config_manager` - Manager for the resolved data directory
/// * `single_capture` - Capture once and quit instead of waiting for the hotkey
fn run_event_loop(config_manager: ConfigManager, single_capture: bool) -> Result<()> {
    // Create tokio runtime for capture sessions and OCR subprocesses
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(WORKER_THREADS)
        .thread_name("quick-ocr-worker")
        .build()?;

    tracing::info!(
        "Tokio runtime initialized with {} worker threads",
        WORKER_THREADS
    );

    let context = Arc::new(AppContext::load(config_manager)?);
    let config = context.config();
    tracing::info!(
        "Loaded config - shortcut: {}, languages: {}",
        config.shortcut,
        config.language
    );

    let notifier: Arc<dyn NotificationSurface> = Arc::new(LogNotifier::new(single_capture));
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        Arc::clone(&context),
        platform_backend(),
        Arc::new(SlintRegionSelector::new()),
        Arc::new(OcrAdapter::tesseract()),
        Arc::new(ArboardClipboard::new()),
        Arc::clone(&notifier),
        TempImageDir::system()?,
    ));

    let stop = Arc::new(AtomicBool::new(false));
    let mut listener = None;

    if single_capture {
        schedule_single_capture(Arc::clone(&orchestrator), runtime.handle().clone())?;
    } else {
        if let Err(e) = hotkey::install(&config.shortcut) {
            tracing::error!("Hotkey unavailable: {:#}", e);
            notifier.notify(Notification::Error {
                message: format!("{:#}", e),
            });
        }
        listener = Some(hotkey::spawn_listener(
            Arc::clone(&orchestrator),
            runtime.handle().clone(),
            Arc::clone(&stop),
        )?);

        spawn_hotkey_updater(&context, &runtime);
        spawn_config_watcher(Arc::clone(&context), &runtime);

        runtime.spawn(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, shutting down");
                let _ = slint::quit_event_loop();
            }
        });

        tracing::info!("Waiting for {}", config.shortcut);
    }

    // Blocks until quit_event_loop; no window is open between captures
    let result = slint::run_event_loop_until_quit();

    tracing::info!("Event loop stopped, shutting down");

    if context.state().is_busy() {
        tracing::warn!("Shutting down during a capture session - abandoning it");
    }

    stop.store(true, Ordering::SeqCst);
    hotkey::uninstall();
    if let Some(listener) = listener {
        if listener.join().is_err() {
            tracing::warn!("Hotkey listener panicked");
        }
    }

    context.metrics().log_summary();

    // Shutdown the tokio runtime gracefully
    runtime.shutdown_timeout(Duration::from_secs(5));

    tracing::info!("Application shutdown complete");

    result.map_err(|e| {
        tracing::error!("Event loop error: {}", e);
        anyhow::anyhow!("Event loop error: {}", e)
    })
}

/// Queue one capture to start once the event loop runs, quitting when it finishes.
fn schedule_single_capture(
    orchestrator: Arc<CaptureOrchestrator>,
    runtime: tokio::runtime::Handle,
) -> Result<()> {
    slint::invoke_from_event_loop(move || {
        let _enter = runtime.enter();
        match orchestrator.request_capture() {
            CaptureRequest::Accepted { id, handle } => {
                runtime.spawn(async move {
                    match handle.await {
                        Ok(outcome) => tracing::info!("Session {} finished: {:?}", id, outcome),
                        Err(e) => tracing::error!("Session {} task failed: {}", id, e),
                    }
                    let _ = slint::quit_event_loop();
                });
            }
            CaptureRequest::Busy => {
                let _ = slint::quit_event_loop();
            }
        }
    })
    .context("Failed to start the event loop")
}

/// Re-register the hotkey whenever a saved config changes the shortcut.
fn spawn_hotkey_updater(context: &AppContext, runtime: &tokio::runtime::Runtime) {
    let mut config_rx = context.subscribe_config();
    let mut shortcut = context.config().shortcut;

    runtime.spawn(async move {
        loop {
            let config = match config_rx.recv().await {
                Ok(config) => config,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            if config.shortcut == shortcut {
                continue;
            }
            shortcut = config.shortcut.clone();

            let next = config.shortcut;
            let queued = slint::invoke_from_event_loop(move || {
                if let Err(e) = hotkey::reregister(&next) {
                    tracing::error!("Failed to re-register hotkey: {:#}", e);
                }
            });
            if let Err(e) = queued {
                tracing::warn!("Could not reach the event loop: {}", e);
                break;
            }
        }
    });
}

/// Poll `config.json` so edits from `quick-ocr config set` reach the running daemon.
fn spawn_config_watcher(context: Arc<AppContext>, runtime: &tokio::runtime::Runtime) {
    runtime.spawn(async move {
        let mut watch = ConfigWatch::new(context.config_manager());
        let mut interval = tokio::time::interval(CONFIG_POLL_INTERVAL);
        loop {
            interval.tick().await;
            if !watch.changed(context.config_manager()) {
                continue;
            }

            let ctx = Arc::clone(&context);
            match tokio::task::spawn_blocking(move || ctx.reload_config()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::error!("Failed to reload config: {:#}", e),
                Err(e) => tracing::error!("Config reload task failed: {}", e),
            }
            // Loading writes the normalized document back
            watch.mark(context.config_manager());
        }
    });
}

fn print_history(config_manager: &ConfigManager) -> Result<()> {
    let entries = config_manager.history_store().read();
    if entries.is_empty() {
        println!("No history");
        return Ok(());
    }

    for entry in entries {
        println!("[{}] {}", entry.display_time, entry.text);
    }
    Ok(())
}

fn clear_history(config_manager: &ConfigManager) -> Result<()> {
    if !config_manager.history_store().clear() {
        anyhow::bail!("Failed to clear history");
    }
    println!("History cleared");
    Ok(())
}

fn run_config_action(config_manager: &ConfigManager, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = config_manager.load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let partial = PartialConfig::from_setting(&key, &value)
                .with_context(|| format!("Unknown setting or invalid value: {} = {}", key, value))?;
            let config = config_manager.save_partial(partial)?;
            tracing::info!("Setting {} updated", key);
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
