//! Atomic operations on a located control.

use crate::config::Timings;
use crate::platforms::{notify, Key, KeyStroke, WindowSystem};
use crate::utils::{pause, poll_until};
use crate::{AutomationError, WindowHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Classes that answer `BM_CLICK`; anything else gets a posted mouse click.
const BUTTON_CLASSES: &[&str] = &["Button", "ThunderRT6CommandButton", "ThunderCommandButton"];

const DROPDOWN_LIST_CLASS: &str = "ComboLBox";

#[derive(Clone)]
pub struct Actions {
    system: Arc<dyn WindowSystem>,
    timings: Timings,
    cancel: CancellationToken,
}

impl Actions {
    pub fn new(system: Arc<dyn WindowSystem>, timings: Timings, cancel: CancellationToken) -> Self {
        Self {
            system,
            timings,
            cancel,
        }
    }

    /// Posts an activation. The effect is not confirmed here.
    pub fn click(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        let class_name = self.system.class_name(handle);
        if BUTTON_CLASSES
            .iter()
            .any(|c| class_name.eq_ignore_ascii_case(c))
        {
            debug!("BM_CLICK -> {} ({})", handle, class_name);
            return self.system.post_click(handle);
        }
        let rect = self.system.rect(handle).ok_or_else(|| {
            AutomationError::ActionFailed(format!("control {handle} vanished before click"))
        })?;
        debug!("mouse click -> {} ({})", handle, class_name);
        self.system
            .post_mouse_click(handle, rect.width() / 2, rect.height() / 2)
    }

    /// Physical click in the middle of the control. For custom-drawn
    /// controls that ignore posted messages.
    pub fn click_center(&self, handle: WindowHandle) -> Result<(), AutomationError> {
        let rect = self.system.rect(handle).ok_or_else(|| {
            AutomationError::ActionFailed(format!("control {handle} vanished before click"))
        })?;
        let (x, y) = rect.center();
        debug!("screen click ({}, {}) -> {}", x, y, handle);
        self.system.click_at(x, y)
    }

    /// Text as the control reports it, or empty when unreadable.
    pub fn read_text(&self, handle: WindowHandle) -> String {
        self.system
            .control_text(handle)
            .unwrap_or_else(|| self.system.window_text(handle))
            .trim()
            .to_string()
    }

    fn text_is(&self, handle: WindowHandle, value: &str) -> bool {
        self.system
            .control_text(handle)
            .is_some_and(|text| text == value)
    }

    /// Writes `value` through `WM_SETTEXT`, reads it back, and falls back to
    /// clearing and typing. On success the control's text equals `value`.
    pub fn set_text_verified(
        &self,
        handle: WindowHandle,
        value: &str,
        retries: u32,
    ) -> Result<(), AutomationError> {
        let attempts = retries.max(1);
        for attempt in 1..=attempts {
            if !self.system.is_alive(handle) {
                return Err(AutomationError::ActionFailed(format!(
                    "control {handle} vanished while writing text"
                )));
            }
            self.system.set_foreground(handle);
            self.system.set_focus(handle);

            if let Err(e) = self.system.set_text(handle, value) {
                debug!("WM_SETTEXT on {} failed: {}", handle, e);
            }
            let _ = self.system.notify_parent(handle, notify::EN_CHANGE);
            if self.text_is(handle, value) {
                debug!("Text set on {} via message (attempt {})", handle, attempt);
                return Ok(());
            }

            if let Some(rect) = self.system.rect(handle) {
                let (_, mid_y) = rect.center();
                let _ = self.system.click_at(rect.left + 10, mid_y);
            }
            self.system.set_focus(handle);
            self.system.send_keys(&[
                KeyStroke::select_all(),
                KeyStroke::Press(Key::Backspace),
                KeyStroke::text(value),
            ])?;
            let _ = self.system.notify_parent(handle, notify::EN_CHANGE);
            if self.text_is(handle, value) {
                debug!("Text set on {} via keystrokes (attempt {})", handle, attempt);
                return Ok(());
            }

            warn!(
                "Attempt {}/{}: control {} reads '{}' instead of the requested value",
                attempt,
                attempts,
                handle,
                self.read_text(handle)
            );
            pause(self.timings.action_backoff, &self.cancel)?;
        }
        Err(AutomationError::ActionFailed(format!(
            "could not write text into {handle} after {attempts} attempts"
        )))
    }

    fn wait_dropdown_list(&self, timeout: Duration) -> Result<Option<WindowHandle>, AutomationError> {
        let system = &self.system;
        poll_until(timeout, self.timings.fast_poll_interval, &self.cancel, || {
            system.top_level_windows().into_iter().find(|h| {
                system.is_visible(*h)
                    && system
                        .class_name(*h)
                        .eq_ignore_ascii_case(DROPDOWN_LIST_CLASS)
            })
        })
    }

    /// Opens the combo's transient list, clicks item `n` by geometry and
    /// closes the list without Enter. A missing list or too few items is a
    /// structural failure and is not retried.
    pub fn select_nth_dropdown_option(
        &self,
        combo: WindowHandle,
        n: usize,
        timeout: Duration,
    ) -> Result<(), AutomationError> {
        let combo_rect = self.system.rect(combo).ok_or_else(|| {
            AutomationError::ActionFailed(format!("combo {combo} vanished before selection"))
        })?;
        self.system.set_foreground(combo);
        self.system.set_focus(combo);
        pause(self.timings.fast_poll_interval, &self.cancel)?;

        if let Err(e) = self.system.show_dropdown(combo, true) {
            debug!("CB_SHOWDROPDOWN on {} failed: {}", combo, e);
        }
        let mut list = self.wait_dropdown_list(timeout)?;
        if list.is_none() {
            debug!("Dropdown list did not open; clicking the arrow of {}", combo);
            let (_, mid_y) = combo_rect.center();
            self.system.click_at(combo_rect.right - 8, mid_y)?;
            list = self.wait_dropdown_list(timeout)?;
        }
        let Some(list) = list else {
            return Err(AutomationError::StructuralMismatch(format!(
                "dropdown list of {combo} never appeared"
            )));
        };

        let count = self.system.list_item_count(list).unwrap_or(0);
        if count < n + 1 {
            let _ = self.system.send_keys(&[KeyStroke::Press(Key::Escape)]);
            return Err(AutomationError::StructuralMismatch(format!(
                "dropdown of {combo} has {count} items, item {n} requested"
            )));
        }

        let list_rect = self.system.rect(list).ok_or_else(|| {
            AutomationError::ActionFailed(format!("dropdown list of {combo} closed early"))
        })?;
        let item_height = (list_rect.height() / count as i32).max(1);
        let (x, _) = list_rect.center();
        let y = list_rect.top + item_height * n as i32 + item_height / 2;
        self.system.click_at(x, y)?;
        pause(self.timings.fast_poll_interval, &self.cancel)?;

        // Enter would trigger the form's default button.
        let _ = self.system.show_dropdown(combo, false);
        self.system.send_keys(&[KeyStroke::Press(Key::Escape)])?;
        let _ = self.system.notify_parent(combo, notify::CBN_SELCHANGE);

        match self.system.combo_selection(combo) {
            Some(selected) if selected == n as i32 => {
                info!("Selected item {} of {}", n, combo);
                Ok(())
            }
            other => Err(AutomationError::ActionFailed(format!(
                "combo {combo} reports selection {other:?} after clicking item {n}"
            ))),
        }
    }
}
