use crate::{AutomationError, Rect, WindowHandle};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub mod fake;
#[cfg(target_os = "windows")]
pub mod windows;

/// Keys the core ever needs to press. Anything else is typed as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Enter,
    Escape,
    Tab,
    Backspace,
    Home,
    End,
    F4,
    Char(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
}

/// One unit of simulated keyboard input, delivered to whatever has focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStroke {
    Text(String),
    Press(Key),
    Chord(Modifier, Key),
}

impl KeyStroke {
    pub fn text(value: impl Into<String>) -> Self {
        KeyStroke::Text(value.into())
    }

    pub fn select_all() -> Self {
        KeyStroke::Chord(Modifier::Ctrl, Key::Char('a'))
    }

    pub fn copy() -> Self {
        KeyStroke::Chord(Modifier::Ctrl, Key::Char('c'))
    }

    pub fn close_window() -> Self {
        KeyStroke::Chord(Modifier::Alt, Key::F4)
    }
}

/// `WM_COMMAND` notification codes the driven application listens to.
pub mod notify {
    pub const EN_CHANGE: u16 = 0x0300;
    pub const CBN_SELCHANGE: u16 = 1;
}

/// Everything the core asks of the operating system's window manager.
///
/// Every method takes the handles it acts on; implementations keep no
/// notion of a "current" window. Reads never fail loudly: a handle that
/// died mid-call reads as empty / `None` / `false`.
pub trait WindowSystem: Send + Sync {
    /// All top-level windows, visible or not, in z-order.
    fn top_level_windows(&self) -> Vec<WindowHandle>;

    /// Direct children of `parent`.
    fn children(&self, parent: WindowHandle) -> Vec<WindowHandle>;

    /// All descendants of `root`, depth first, `root` excluded.
    fn descendants(&self, root: WindowHandle) -> Vec<WindowHandle> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<WindowHandle> = self.children(root).into_iter().rev().collect();
        while let Some(handle) = stack.pop() {
            if !seen.insert(handle) {
                continue;
            }
            out.push(handle);
            stack.extend(self.children(handle).into_iter().rev());
        }
        out
    }

    fn class_name(&self, handle: WindowHandle) -> String;

    /// Caption / static text as the window manager reports it.
    fn window_text(&self, handle: WindowHandle) -> String;

    /// Text through the control-message channel (`WM_GETTEXT`). `None` when
    /// the control does not answer.
    fn control_text(&self, handle: WindowHandle) -> Option<String>;

    fn rect(&self, handle: WindowHandle) -> Option<Rect>;
    fn is_visible(&self, handle: WindowHandle) -> bool;
    fn is_enabled(&self, handle: WindowHandle) -> bool;
    fn is_alive(&self, handle: WindowHandle) -> bool;
    fn parent(&self, handle: WindowHandle) -> Option<WindowHandle>;
    fn control_id(&self, handle: WindowHandle) -> i32;

    /// Posts a button activation (`BM_CLICK`). Fire-and-forget.
    fn post_click(&self, handle: WindowHandle) -> Result<(), AutomationError>;

    /// Posts a left button down/up at a client-relative point.
    fn post_mouse_click(&self, handle: WindowHandle, x: i32, y: i32)
        -> Result<(), AutomationError>;

    fn post_close(&self, handle: WindowHandle) -> Result<(), AutomationError>;

    /// Posts a key down/up pair straight to a window's queue.
    fn post_key(&self, handle: WindowHandle, key: Key) -> Result<(), AutomationError>;

    fn set_text(&self, handle: WindowHandle, value: &str) -> Result<(), AutomationError>;

    /// Sends `WM_COMMAND(code, id)` to the control's parent and top ancestor.
    fn notify_parent(&self, handle: WindowHandle, code: u16) -> Result<(), AutomationError>;

    fn show_dropdown(&self, combo: WindowHandle, show: bool) -> Result<(), AutomationError>;

    /// Current selection index of a combo box, if it reports one.
    fn combo_selection(&self, combo: WindowHandle) -> Option<i32>;

    /// Item count of a list box (including a combo's transient list).
    fn list_item_count(&self, list: WindowHandle) -> Option<usize>;

    /// Cell text of a report-style list view, rows by columns.
    fn list_view_cells(&self, list: WindowHandle) -> Option<Vec<Vec<String>>>;

    fn set_foreground(&self, handle: WindowHandle) -> bool;
    fn set_focus(&self, handle: WindowHandle) -> bool;

    /// Global keystroke injection into the focused window.
    fn send_keys(&self, keys: &[KeyStroke]) -> Result<(), AutomationError>;

    /// Physical click at a screen coordinate.
    fn click_at(&self, x: i32, y: i32) -> Result<(), AutomationError>;

    fn clipboard_text(&self) -> Option<String>;
    fn set_clipboard_text(&self, value: &str) -> Result<(), AutomationError>;

    /// Triggers a menu item of `window` addressed by its captions.
    fn menu_command(&self, window: WindowHandle, path: &[&str]) -> Result<(), AutomationError>;

    /// Starts a program, optionally asking for elevation. Returns a pid when known.
    fn launch(&self, exe_path: &Path, elevated: bool) -> Result<Option<u32>, AutomationError>;

    /// Kills every process whose image name matches. Returns how many were signalled.
    fn kill_processes(&self, image_name: &str) -> usize;

    fn is_elevated(&self) -> bool;
}

/// Create the window system for the current platform
pub fn create_window_system() -> Result<Arc<dyn WindowSystem>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::Win32System::new()?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(AutomationError::PlatformError(
            "the driven application only runs on Windows".to_string(),
        ))
    }
}
