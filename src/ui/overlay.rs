// Region selection overlay - Slint implementation of RegionSelector
//
// The overlay lives on the Slint event loop thread. `select_region` posts the work there
// with `invoke_from_event_loop` and awaits a oneshot that the selection protocol resolves.
// Coordinates arrive in logical pixels and are scaled to image pixels on resolution.

use crate::models::Region;
use crate::services::selection::{
    RegionSelector, SelectionError, SelectionEvent, SelectionResolver, SelectionTracker,
};
use async_trait::async_trait;
use camino::Utf8Path;
use slint::ComponentHandle;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

// Include the generated Slint code
slint::include_modules!();

thread_local! {
    // The overlay currently on screen, kept alive until it resolves
    static ACTIVE_OVERLAY: RefCell<Option<SelectionOverlay>> = const { RefCell::new(None) };
}

/// [`RegionSelector`] that shows a full-screen, borderless, topmost Slint window.
///
/// Requires the Slint event loop to be running on the main thread.
pub struct SlintRegionSelector;

impl SlintRegionSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SlintRegionSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegionSelector for SlintRegionSelector {
    async fn select_region(&self, image_path: &Utf8Path) -> Result<Option<Region>, SelectionError> {
        let (resolver, rx) = SelectionResolver::new();
        let resolver = Arc::new(resolver);
        let open_error: Arc<Mutex<Option<SelectionError>>> = Arc::default();

        let path = image_path.to_path_buf();
        let resolver_ui = Arc::clone(&resolver);
        let open_error_ui = Arc::clone(&open_error);
        slint::invoke_from_event_loop(move || {
            if let Err(e) = open_overlay(&path, Arc::clone(&resolver_ui)) {
                tracing::error!("Failed to open selection overlay: {}", e);
                *open_error_ui.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                resolver_ui.resolve(None);
            }
        })
        .map_err(|e| SelectionError::Unavailable(e.to_string()))?;

        // No timeout: the user may take as long as they like
        let selection = rx.await.map_err(|_| {
            SelectionError::Unavailable("overlay closed without a result".to_string())
        })?;

        if let Some(e) = open_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(e);
        }

        match selection {
            Some(region) => tracing::info!("Selected region {:?}", region),
            None => tracing::info!("Selection cancelled"),
        }
        Ok(selection)
    }
}

/// Feeds overlay input into the selection protocol and mirrors the rubber band.
struct OverlayHandler {
    overlay: slint::Weak<SelectionOverlay>,
    tracker: RefCell<SelectionTracker>,
    resolver: Arc<SelectionResolver>,
    image_size: (u32, u32),
}

impl OverlayHandler {
    fn handle(&self, event: SelectionEvent) {
        let resolved = self.tracker.borrow_mut().handle(event);
        let Some(ui) = self.overlay.upgrade() else {
            return;
        };

        match resolved {
            Some(selection) => {
                let selection = selection.map(|region| self.to_image_pixels(&ui, region));
                self.resolver.resolve(selection);

                let _ = ui.hide();
                // Drop the component after its callback has returned
                let _ = slint::invoke_from_event_loop(|| {
                    ACTIVE_OVERLAY.with(|active| drop(active.borrow_mut().take()));
                });
            }
            None => {
                let band = self.tracker.borrow().rubber_band();
                ui.set_band_visible(band.is_some());
                if let Some(band) = band {
                    ui.set_band_x(band.x as f32);
                    ui.set_band_y(band.y as f32);
                    ui.set_band_width(band.width as f32);
                    ui.set_band_height(band.height as f32);
                }
            }
        }
    }

    /// Scale a logical-pixel region to the captured image's pixel grid.
    fn to_image_pixels(&self, ui: &SelectionOverlay, region: Region) -> Region {
        let window = ui.window();
        let size = window.size();
        let scale = f64::from(window.scale_factor());

        let logical_width = f64::from(size.width) / scale;
        let logical_height = f64::from(size.height) / scale;
        if logical_width <= 0.0 || logical_height <= 0.0 {
            return region;
        }

        region.scaled(
            f64::from(self.image_size.0) / logical_width,
            f64::from(self.image_size.1) / logical_height,
        )
    }
}

impl Drop for OverlayHandler {
    fn drop(&mut self) {
        // Destroyed without a result counts as cancellation
        self.resolver.resolve(None);
    }
}

fn to_px(value: f32) -> u32 {
    value.max(0.0).round() as u32
}

fn open_overlay(path: &Utf8Path, resolver: Arc<SelectionResolver>) -> Result<(), SelectionError> {
    let screenshot = slint::Image::load_from_path(path.as_std_path())
        .map_err(|_| SelectionError::Image(path.to_string()))?;
    let image_size = screenshot.size();

    let overlay =
        SelectionOverlay::new().map_err(|e| SelectionError::Unavailable(e.to_string()))?;
    overlay.set_screenshot(screenshot);

    let handler = Rc::new(OverlayHandler {
        overlay: overlay.as_weak(),
        tracker: RefCell::new(SelectionTracker::new()),
        resolver,
        image_size: (image_size.width, image_size.height),
    });

    overlay.on_pointer_pressed({
        let handler = Rc::clone(&handler);
        move |x, y| handler.handle(SelectionEvent::Press { x: to_px(x), y: to_px(y) })
    });
    overlay.on_pointer_moved({
        let handler = Rc::clone(&handler);
        move |x, y| handler.handle(SelectionEvent::Move { x: to_px(x), y: to_px(y) })
    });
    overlay.on_pointer_released({
        let handler = Rc::clone(&handler);
        move |x, y| handler.handle(SelectionEvent::Release { x: to_px(x), y: to_px(y) })
    });
    overlay.on_cancel_requested({
        let handler = Rc::clone(&handler);
        move || handler.handle(SelectionEvent::Cancel)
    });
    overlay.window().on_close_requested({
        let handler = Rc::clone(&handler);
        move || {
            handler.handle(SelectionEvent::Closed);
            slint::CloseRequestResponse::HideWindow
        }
    });

    overlay.window().set_fullscreen(true);
    overlay
        .show()
        .map_err(|e| SelectionError::Unavailable(e.to_string()))?;

    ACTIVE_OVERLAY.with(|active| {
        if let Some(previous) = active.borrow_mut().replace(overlay) {
            let _ = previous.hide();
        }
    });

    tracing::debug!(
        "Selection overlay opened over {}x{} image",
        image_size.width,
        image_size.height
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_px() {
        assert_eq!(to_px(-3.0), 0);
        assert_eq!(to_px(10.4), 10);
        assert_eq!(to_px(10.6), 11);
    }
}
