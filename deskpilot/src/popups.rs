//! Classification and dismissal of modal dialogs the driven application
//! throws up between steps.
//!
//! A dialog is recognised by substring match against the concatenation of
//! its static-text children. Dismissal goes through posted messages first
//! (button click, then `WM_CLOSE`) and only falls back to a keystroke for
//! confirmations that offer no affirmative button.

use crate::config::Timings;
use crate::locator::Locator;
use crate::platforms::{Key, KeyStroke};
use crate::utils::{fold_text, normalize_caption, pause, poll_until};
use crate::{AutomationError, WindowHandle};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DIALOG_CLASS: &str = "#32770";

pub const ACCEPT_BUTTONS: &[&str] = &["Aceptar", "OK"];
pub const YES_BUTTONS: &[&str] = &["Sí", "Si", "Yes"];
pub const CANCEL_BUTTONS: &[&str] = &["Cancelar", "Cancel"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopupKind {
    Informational,
    Confirmation,
    Error,
    Unrecognized,
}

/// A known dialog signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupRule {
    pub phrase: String,
    pub kind: PopupKind,
}

impl PopupRule {
    pub fn new(phrase: &str, kind: PopupKind) -> Self {
        Self {
            phrase: phrase.to_string(),
            kind,
        }
    }
}

/// Ordered rule list; the first matching phrase wins, so errors come first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupCatalog {
    pub rules: Vec<PopupRule>,
}

impl Default for PopupCatalog {
    fn default() -> Self {
        use PopupKind::*;
        Self {
            rules: vec![
                PopupRule::new("no coinciden los tipos", Error),
                PopupRule::new("error '13'", Error),
                PopupRule::new("error en tiempo de ejecucion", Error),
                PopupRule::new("no se encontr", Informational),
                PopupRule::new("mes a visualizar", Informational),
                PopupRule::new("archivo procesado", Informational),
                PopupRule::new("proceso finalizado", Informational),
                PopupRule::new("confirmacion", Confirmation),
                PopupRule::new("desea", Confirmation),
            ],
        }
    }
}

impl PopupCatalog {
    /// Pure classification of a dialog's concatenated text.
    pub fn classify(&self, text: &str) -> (PopupKind, Option<&PopupRule>) {
        let folded = fold_text(text);
        self.rules
            .iter()
            .find(|rule| folded.contains(&fold_text(&rule.phrase)))
            .map(|rule| (rule.kind, Some(rule)))
            .unwrap_or((PopupKind::Unrecognized, None))
    }
}

/// A dialog observed on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub handle: WindowHandle,
    pub title: String,
    pub text: String,
    pub kind: PopupKind,
}

#[derive(Clone)]
pub struct PopupHandler {
    locator: Locator,
    catalog: PopupCatalog,
    timings: Timings,
    cancel: CancellationToken,
}

impl PopupHandler {
    pub fn new(locator: Locator, catalog: PopupCatalog, timings: Timings, cancel: CancellationToken) -> Self {
        Self {
            locator,
            catalog,
            timings,
            cancel,
        }
    }

    pub fn catalog(&self) -> &PopupCatalog {
        &self.catalog
    }

    fn observe(&self, handle: WindowHandle) -> Popup {
        let system = self.locator.system();
        let title = system.window_text(handle);
        let text = self.locator.static_text(handle);
        let (kind, _) = self.catalog.classify(&format!("{title} {text}"));
        Popup {
            handle,
            title,
            text,
            kind,
        }
    }

    /// Every visible dialog currently on screen, classified.
    pub fn scan(&self) -> Vec<Popup> {
        let system = self.locator.system();
        system
            .top_level_windows()
            .into_iter()
            .filter(|h| {
                system.is_visible(*h) && system.class_name(*h).eq_ignore_ascii_case(DIALOG_CLASS)
            })
            .map(|h| self.observe(h))
            .collect()
    }

    /// Visible dialog whose static text contains `phrase`.
    pub fn find_containing(&self, phrase: &str) -> Option<Popup> {
        let needle = fold_text(phrase);
        self.scan()
            .into_iter()
            .find(|p| fold_text(&p.text).contains(&needle))
    }

    /// Polls for a dialog containing any of `phrases`.
    pub fn wait_containing(
        &self,
        phrases: &[&str],
        timeout: Duration,
        interval: Duration,
    ) -> Result<Option<Popup>, AutomationError> {
        poll_until(timeout, interval, &self.cancel, || {
            phrases.iter().find_map(|p| self.find_containing(p))
        })
    }

    /// Posts `BM_CLICK` to the first button whose caption matches one of
    /// `captions`. Returns whether a button was found.
    pub fn click_button(&self, dialog: WindowHandle, captions: &[&str]) -> bool {
        let system = self.locator.system();
        let wanted: Vec<String> = captions.iter().map(|c| normalize_caption(c)).collect();
        let button = system.descendants(dialog).into_iter().find(|h| {
            system.class_name(*h).eq_ignore_ascii_case("Button")
                && wanted.contains(&normalize_caption(&system.window_text(*h)))
        });
        match button {
            Some(button) => {
                debug!("Clicking '{}' in dialog {}", system.window_text(button), dialog);
                system.post_click(button).is_ok()
            }
            None => false,
        }
    }

    /// Clicks the first button of any caption, else posts `WM_CLOSE`.
    pub fn close_with_first_button(&self, dialog: WindowHandle) -> Result<(), AutomationError> {
        let system = self.locator.system();
        let first = system
            .descendants(dialog)
            .into_iter()
            .find(|h| system.class_name(*h).eq_ignore_ascii_case("Button"));
        match first {
            Some(button) => system.post_click(button),
            None => system.post_close(dialog),
        }
    }

    /// Clicks one of `captions`, else posts `WM_CLOSE`.
    pub fn close_preferring(&self, dialog: WindowHandle, captions: &[&str]) -> Result<(), AutomationError> {
        if self.click_button(dialog, captions) {
            return Ok(());
        }
        self.locator.system().post_close(dialog)
    }

    /// Affirms a confirmation: a yes button, else a posted Enter, else a
    /// focused global Enter.
    pub fn confirm(&self, dialog: WindowHandle) -> Result<(), AutomationError> {
        if self.click_button(dialog, YES_BUTTONS) {
            return Ok(());
        }
        let system = self.locator.system();
        debug!("No affirmative button in {}; posting Enter", dialog);
        system.post_key(dialog, Key::Enter)?;
        pause(self.timings.step_settle, &self.cancel)?;
        if system.is_alive(dialog) {
            system.set_foreground(dialog);
            system.send_keys(&[KeyStroke::Press(Key::Enter)])?;
        }
        Ok(())
    }

    /// Applies the policy for one observed dialog. Error dialogs are
    /// dismissed and then reported as `ForeignError`.
    pub fn dismiss(&self, popup: &Popup) -> Result<(), AutomationError> {
        info!(kind = ?popup.kind, "Dismissing dialog '{}': {}", popup.title, popup.text);
        match popup.kind {
            PopupKind::Informational => self.close_preferring(popup.handle, ACCEPT_BUTTONS),
            PopupKind::Confirmation => self.confirm(popup.handle),
            PopupKind::Error => {
                if let Err(e) = self.close_preferring(popup.handle, ACCEPT_BUTTONS) {
                    warn!("Could not dismiss error dialog {}: {}", popup.handle, e);
                }
                Err(AutomationError::ForeignError(popup.text.clone()))
            }
            PopupKind::Unrecognized => {
                let mut affirmative: Vec<&str> = ACCEPT_BUTTONS.to_vec();
                affirmative.extend_from_slice(YES_BUTTONS);
                self.close_preferring(popup.handle, &affirmative)
            }
        }
    }

    /// Dismisses everything on screen. Non-error dialogs are cleared first
    /// and the first error, if any, is returned afterwards.
    pub fn sweep(&self) -> Result<usize, AutomationError> {
        let popups = self.scan();
        let mut first_error = None;
        for popup in &popups {
            if let Err(e) = self.dismiss(popup) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(popups.len()),
        }
    }

    /// Posts `WM_CLOSE` to visible dialogs until none remain or `timeout`
    /// elapses. Returns how many were closed.
    pub fn close_stray_dialogs(&self, timeout: Duration) -> usize {
        let system = self.locator.system();
        let mut closed = 0;
        let _ = poll_until(timeout, self.timings.poll_interval, &self.cancel, || {
            let open: Vec<WindowHandle> = system
                .top_level_windows()
                .into_iter()
                .filter(|h| {
                    system.is_visible(*h)
                        && system.class_name(*h).eq_ignore_ascii_case(DIALOG_CLASS)
                })
                .collect();
            if open.is_empty() {
                return Some(());
            }
            for dialog in open {
                if system.post_close(dialog).is_ok() {
                    closed += 1;
                }
            }
            None
        });
        if closed > 0 {
            info!("Closed {} stray dialog(s)", closed);
        }
        closed
    }
}
