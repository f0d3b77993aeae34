// Global hotkey trigger
//
// The GlobalHotKeyManager must be created and used on the main (event loop) thread, so it
// lives in a thread_local. Events are read from the global receiver on a listener thread
// that forwards presses of the active hotkey to the orchestrator.

use crate::services::CaptureOrchestrator;
use anyhow::{Context, Result};
use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Id of the registered hotkey, 0 when none is registered
static ACTIVE_HOTKEY_ID: AtomicU32 = AtomicU32::new(0);

const POLL_INTERVAL: Duration = Duration::from_millis(200);

thread_local! {
    static REGISTRATION: RefCell<Option<Registration>> = const { RefCell::new(None) };
}

struct Registration {
    manager: GlobalHotKeyManager,
    hotkey: Option<HotKey>,
}

/// Parse a shortcut string such as `Shift+Ctrl+E` or `Shift+Command+E`.
///
/// `Command`/`Cmd` map to the Super modifier, `CommandOrControl` to Super on macOS and
/// Control elsewhere.
pub fn parse_shortcut(shortcut: &str) -> Result<HotKey> {
    shortcut
        .trim()
        .parse::<HotKey>()
        .with_context(|| format!("Invalid shortcut: {}", shortcut))
}

/// Create the hotkey manager and register `shortcut`. Call on the main thread.
pub fn install(shortcut: &str) -> Result<()> {
    REGISTRATION.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            let manager = GlobalHotKeyManager::new().context("Failed to create hotkey manager")?;
            *slot = Some(Registration {
                manager,
                hotkey: None,
            });
        }

        match slot.as_mut() {
            Some(registration) => registration.replace(shortcut),
            None => Ok(()),
        }
    })
}

/// Swap the registered hotkey for `shortcut`. Call on the main thread after [`install`].
pub fn reregister(shortcut: &str) -> Result<()> {
    REGISTRATION.with(|slot| match slot.borrow_mut().as_mut() {
        Some(registration) => registration.replace(shortcut),
        None => anyhow::bail!("Hotkey manager not installed"),
    })
}

/// Unregister the hotkey and drop the manager.
pub fn uninstall() {
    REGISTRATION.with(|slot| {
        if let Some(mut registration) = slot.borrow_mut().take() {
            registration.clear();
        }
    });
}

impl Registration {
    fn replace(&mut self, shortcut: &str) -> Result<()> {
        let hotkey = parse_shortcut(shortcut)?;
        if self.hotkey == Some(hotkey) {
            return Ok(());
        }

        self.clear();
        self.manager
            .register(hotkey)
            .with_context(|| format!("Failed to register hotkey {}", shortcut))?;
        self.hotkey = Some(hotkey);
        ACTIVE_HOTKEY_ID.store(hotkey.id(), Ordering::SeqCst);

        tracing::info!("Registered hotkey {}", shortcut);
        Ok(())
    }

    fn clear(&mut self) {
        if let Some(previous) = self.hotkey.take() {
            if let Err(e) = self.manager.unregister(previous) {
                tracing::warn!("Failed to unregister hotkey: {}", e);
            }
        }
        ACTIVE_HOTKEY_ID.store(0, Ordering::SeqCst);
    }
}

/// Start the listener thread that turns hotkey presses into capture requests.
///
/// # Arguments
/// * `orchestrator` - Receives a `request_capture` per press
/// * `runtime` - Handle the sessions are spawned on
/// * `stop` - Set to end the listener
pub fn spawn_listener(
    orchestrator: Arc<CaptureOrchestrator>,
    runtime: tokio::runtime::Handle,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("hotkey-listener".to_string())
        .spawn(move || {
            tracing::debug!("Hotkey listener started");
            let receiver = GlobalHotKeyEvent::receiver();

            while !stop.load(Ordering::SeqCst) {
                let Ok(event) = receiver.recv_timeout(POLL_INTERVAL) else {
                    continue;
                };
                if !is_trigger(&event) {
                    continue;
                }

                let _enter = runtime.enter();
                if !orchestrator.request_capture().is_accepted() {
                    tracing::info!("Hotkey ignored: a capture is already in progress");
                }
            }

            tracing::debug!("Hotkey listener stopped");
        })
}

fn is_trigger(event: &GlobalHotKeyEvent) -> bool {
    event.state == HotKeyState::Pressed && event.id == ACTIVE_HOTKEY_ID.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use global_hotkey::hotkey::{Code, Modifiers};

    #[test]
    fn test_parse_default_shortcut() {
        let hotkey = parse_shortcut("Shift+Ctrl+E").unwrap();
        assert_eq!(
            hotkey,
            HotKey::new(Some(Modifiers::SHIFT | Modifiers::CONTROL), Code::KeyE)
        );
    }

    #[test]
    fn test_parse_command_shortcut() {
        let hotkey = parse_shortcut(" Shift+Command+E ").unwrap();
        assert_eq!(
            hotkey,
            HotKey::new(Some(Modifiers::SHIFT | Modifiers::SUPER), Code::KeyE)
        );
    }

    #[test]
    fn test_parse_invalid_shortcut() {
        assert!(parse_shortcut("Shift+Nope").is_err());
        assert!(parse_shortcut("").is_err());
    }

    #[test]
    fn test_release_is_not_a_trigger() {
        let hotkey = parse_shortcut("Shift+Ctrl+E").unwrap();
        ACTIVE_HOTKEY_ID.store(hotkey.id(), Ordering::SeqCst);

        let released = GlobalHotKeyEvent {
            id: hotkey.id(),
            state: HotKeyState::Released,
        };
        assert!(!is_trigger(&released));

        let pressed = GlobalHotKeyEvent {
            id: hotkey.id(),
            state: HotKeyState::Pressed,
        };
        assert!(is_trigger(&pressed));
    }
}
