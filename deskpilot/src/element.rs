//! Native window handles and the per-operation snapshots taken from them.

use crate::platforms::WindowSystem;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque OS identifier of a native UI element.
///
/// The owning process may destroy it at any moment, so a handle is only
/// trusted for the duration of one operation and re-resolved afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    pub fn raw(self) -> isize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hwnd:0x{:x}", self.0)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Screen rectangle in pixels, edges inclusive-exclusive like `RECT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Builds a rect from origin and size.
    pub const fn sized(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self::new(left, top, left + width, top + height)
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }
}

/// Everything the locator needs to know about one control, read in one go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub handle: WindowHandle,
    pub class_name: String,
    pub text: String,
    pub rect: Rect,
    pub visible: bool,
    pub enabled: bool,
}

impl ControlSnapshot {
    /// Reads a snapshot, or `None` when the handle died or has no geometry.
    pub fn capture(system: &dyn WindowSystem, handle: WindowHandle) -> Option<Self> {
        if !system.is_alive(handle) {
            return None;
        }
        let rect = system.rect(handle)?;
        Some(Self {
            handle,
            class_name: system.class_name(handle),
            text: system.window_text(handle).trim().to_string(),
            rect,
            visible: system.is_visible(handle),
            enabled: system.is_enabled(handle),
        })
    }
}
