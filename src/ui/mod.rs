// UI module - Slint overlay and global hotkey
//
// This module contains:
// - SlintRegionSelector: full-screen selection overlay implementing RegionSelector
// - hotkey: global shortcut registration and the listener that triggers captures
//
// Everything here touches the windowing system and runs on (or posts to) the main thread.

pub mod hotkey;
pub mod overlay;

pub use overlay::SlintRegionSelector;
