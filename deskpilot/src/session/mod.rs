//! Business operations against the driven application, each a linear
//! sequence of locate, act, verify and popup checks.
//!
//! Every operation takes the window handles it works on. The session keeps
//! no "current window"; callers hold on to what `open_*` returns and pass it
//! back in.

mod bulk;
mod search;

pub use bulk::{
    extract_errors, parse_grid_text, ErrorCapture, LoadReport, SaveReport, GRID_CLASSES,
};
pub use search::{
    assemble_search_group, criterion_descriptor, identifier_descriptor, pick_order_number,
    trigger_descriptor, SearchGroup, SearchState, DEFAULT_CRITERION_INDEX,
};

use crate::actions::Actions;
use crate::config::{AppConfig, LoginConfig, Timings};
use crate::descriptor::{TitleMatch, WindowQuery};
use crate::locator::Locator;
use crate::platforms::{Key, KeyStroke, WindowSystem};
use crate::popups::{PopupCatalog, PopupHandler, ACCEPT_BUTTONS};
use crate::utils::{pause, poll_until};
use crate::{AutomationError, WindowHandle};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const MIGRATION_MENU: &[&str] = &["Operaciones", "Migracion Servicios desde Excel"];
pub const CAPTURE_MENU: &[&str] = &["Archivo", "Capturar Servicios"];
pub const MIGRATION_TITLE: &str = r"(?i).*Migraci[oó]n\s+Servicios.*";
pub const DATA_WINDOW_TITLE: &str = "Datos";
const MONTH_PROMPT: &str = "Mes a Visualizar Servicios";

/// Result of a driven operation. Never coerced to success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Success(T),
    NotFound,
    ValidationError { code: String },
    Timeout,
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::NotFound => "not_found",
            Outcome::ValidationError { .. } => "validation_error",
            Outcome::Timeout => "timeout",
        }
    }
}

pub(crate) fn title_pattern(pattern: &str) -> Result<TitleMatch, AutomationError> {
    Regex::new(pattern)
        .map(TitleMatch::Pattern)
        .map_err(|e| AutomationError::Config(format!("bad title pattern '{pattern}': {e}")))
}

#[derive(Clone)]
pub struct Session {
    system: Arc<dyn WindowSystem>,
    locator: Locator,
    actions: Actions,
    popups: PopupHandler,
    timings: Timings,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(system: Arc<dyn WindowSystem>, timings: Timings, cancel: CancellationToken) -> Self {
        let locator = Locator::new(system.clone())
            .with_poll_interval(timings.poll_interval)
            .with_cancellation(cancel.clone());
        let actions = Actions::new(system.clone(), timings.clone(), cancel.clone());
        let popups = PopupHandler::new(
            locator.clone(),
            PopupCatalog::default(),
            timings.clone(),
            cancel.clone(),
        );
        Self {
            system,
            locator,
            actions,
            popups,
            timings,
            cancel,
        }
    }

    pub fn system(&self) -> &Arc<dyn WindowSystem> {
        &self.system
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn actions(&self) -> &Actions {
        &self.actions
    }

    pub fn popups(&self) -> &PopupHandler {
        &self.popups
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn settle(&self) -> Result<(), AutomationError> {
        pause(self.timings.step_settle, &self.cancel)
    }

    /// Brings `host` to the foreground and waits for it to repaint.
    pub fn focus_host(&self, host: WindowHandle) -> Result<(), AutomationError> {
        if !self.system.is_alive(host) {
            return Err(AutomationError::StructuralMismatch(format!(
                "host window {host} no longer exists"
            )));
        }
        if !self.system.set_foreground(host) {
            warn!("Could not bring {} to the foreground", host);
        }
        pause(self.timings.focus_settle, &self.cancel)
    }

    /// Clears dialogs and processes left over from an earlier run.
    pub fn preflight(&self, app: &AppConfig) {
        self.close_stray_dialogs();
        if let Some(image) = app.image_name() {
            let killed = self.system.kill_processes(&image);
            if killed > 0 {
                warn!("Preflight: killed {} leftover '{}' process(es)", killed, image);
            }
        }
        self.close_stray_dialogs();
    }

    pub fn launch(&self, app: &AppConfig) -> Result<(), AutomationError> {
        let elevate = app.require_admin && !self.system.is_elevated();
        info!(elevate, "Launching {}", app.exe_path.display());
        let pid = self.system.launch(&app.exe_path, elevate)?;
        debug!(?pid, "Launch requested");
        Ok(())
    }

    /// Tries the configured login title, then each fallback, on every poll.
    pub fn wait_login_window(&self, app: &AppConfig) -> Result<WindowHandle, AutomationError> {
        let mut patterns: Vec<&str> = Vec::new();
        if !app.login_title_re.is_empty() {
            patterns.push(&app.login_title_re);
        }
        patterns.extend(app.login_title_fallbacks.iter().map(String::as_str));
        let queries = patterns
            .iter()
            .map(|p| title_pattern(p).map(WindowQuery::titled))
            .collect::<Result<Vec<_>, _>>()?;
        self.locator
            .wait_any_window(&queries, self.timings.login_window_timeout)?
            .ok_or_else(|| {
                AutomationError::Timeout(format!(
                    "no login window matched any of {patterns:?}"
                ))
            })
    }

    /// Fills the credentials and submits. Prefers the two `Edit` children;
    /// otherwise types blind into whatever the login form focused.
    pub fn log_in(&self, login_window: WindowHandle, login: &LoginConfig) -> Result<(), AutomationError> {
        self.system.set_foreground(login_window);
        self.settle()?;
        let edits: Vec<WindowHandle> = self
            .system
            .children(login_window)
            .into_iter()
            .filter(|h| self.system.class_name(*h).eq_ignore_ascii_case("Edit"))
            .collect();
        if let [user_field, password_field, ..] = edits[..] {
            self.actions
                .set_text_verified(user_field, &login.user, self.timings.text_retries)?;
            self.actions
                .set_text_verified(password_field, &login.password, self.timings.text_retries)?;
        } else {
            debug!("Login form exposes {} Edit control(s); typing blind", edits.len());
            self.system.send_keys(&[
                KeyStroke::select_all(),
                KeyStroke::Press(Key::Backspace),
                KeyStroke::text(&login.user),
                KeyStroke::Press(Key::Tab),
                KeyStroke::select_all(),
                KeyStroke::Press(Key::Backspace),
                KeyStroke::text(&login.password),
            ])?;
        }
        self.system
            .send_keys(&[KeyStroke::Press(Key::Enter), KeyStroke::Press(Key::Enter)])
    }

    pub fn wait_main_window(&self, app: &AppConfig) -> Result<WindowHandle, AutomationError> {
        let query = WindowQuery::titled(title_pattern(&app.main_title_re)?);
        self.locator
            .wait_window(&query, app.main_load_timeout())?
            .ok_or_else(|| {
                AutomationError::Timeout("login sent but the main window never appeared".to_string())
            })
    }

    /// Preflight, launch, login. Returns the main window.
    #[instrument(level = "info", skip_all)]
    pub fn open_session(&self, app: &AppConfig, login: &LoginConfig) -> Result<WindowHandle, AutomationError> {
        self.preflight(app);
        self.launch(app)?;
        let login_window = self.wait_login_window(app)?;
        info!("Login window found: '{}'", self.system.window_text(login_window));
        self.log_in(login_window, login)?;
        let main = self.wait_main_window(app)?;
        info!("Main window ready: {}", main);
        Ok(main)
    }

    /// Opens the bulk-migration window from the main menu.
    pub fn open_migration(&self, main: WindowHandle) -> Result<WindowHandle, AutomationError> {
        self.system.set_foreground(main);
        self.system.menu_command(main, MIGRATION_MENU)?;
        let query = WindowQuery::titled(title_pattern(MIGRATION_TITLE)?);
        let window = self
            .locator
            .wait_window(&query, self.timings.window_timeout)?
            .ok_or_else(|| {
                AutomationError::Timeout("migration window did not open".to_string())
            })?;
        info!("Migration window open: {}", window);
        Ok(window)
    }

    /// Opens the capture screen and accepts the month prompt it raises.
    pub fn open_capture(&self, main: WindowHandle) -> Result<(), AutomationError> {
        self.system.set_foreground(main);
        self.settle()?;
        self.system.menu_command(main, CAPTURE_MENU)?;
        self.settle()?;
        let prompt = self
            .popups
            .wait_containing(
                &[MONTH_PROMPT],
                self.timings.month_popup_timeout,
                self.timings.poll_interval,
            )?
            .ok_or_else(|| {
                AutomationError::Timeout(format!("'{MONTH_PROMPT}' prompt never appeared"))
            })?;
        if !self.popups.click_button(prompt.handle, ACCEPT_BUTTONS) {
            debug!("No accept button on the month prompt; posting Enter");
            self.system.post_key(prompt.handle, Key::Enter)?;
        }
        info!("Capture screen open");
        Ok(())
    }

    /// Posts `WM_CLOSE`, falling back to Alt+F4, and waits for the handle
    /// to die. Returns whether it did.
    pub fn close_window(&self, window: WindowHandle, timeout: Duration) -> bool {
        if !self.system.is_alive(window) {
            return true;
        }
        if let Err(e) = self.system.post_close(window) {
            debug!("WM_CLOSE to {} failed ({}); trying Alt+F4", window, e);
            self.system.set_foreground(window);
            let _ = self.settle();
            if let Err(e) = self.system.send_keys(&[KeyStroke::close_window()]) {
                warn!("Alt+F4 to {} failed: {}", window, e);
            }
        }
        let closed = poll_until(timeout, self.timings.poll_interval, &self.cancel, || {
            (!self.system.is_alive(window)).then_some(())
        });
        matches!(closed, Ok(Some(())))
    }

    /// Closes the `Datos` window if it shows up within the wait.
    pub fn close_data_window(&self, timeout: Duration) -> bool {
        let query = WindowQuery::titled(TitleMatch::Exact(DATA_WINDOW_TITLE.to_string()));
        match self.locator.wait_window(&query, timeout) {
            Ok(Some(window)) => self.close_window(window, self.timings.close_timeout),
            _ => false,
        }
    }

    pub fn close_stray_dialogs(&self) -> usize {
        self.popups
            .close_stray_dialogs(self.timings.dialog_sweep_timeout)
    }

    /// Closes the application's windows and makes sure its process is gone.
    /// Each step runs regardless of how the previous one went.
    pub fn teardown(
        &self,
        app: &AppConfig,
        migration: Option<WindowHandle>,
        main: Option<WindowHandle>,
    ) -> Vec<&'static str> {
        let close_timeout = self.timings.close_timeout;
        Teardown::new()
            .step("close migration window", || match migration {
                Some(w) if !self.close_window(w, close_timeout) => Err(AutomationError::Timeout(
                    format!("migration window {w} still open"),
                )),
                _ => Ok(()),
            })
            .step("close main window", || match main {
                Some(w) if !self.close_window(w, close_timeout) => Err(AutomationError::Timeout(
                    format!("main window {w} still open"),
                )),
                _ => Ok(()),
            })
            .step("kill application processes", || {
                if let Some(image) = app.image_name() {
                    self.system.kill_processes(&image);
                }
                Ok(())
            })
            .step("close stray dialogs", || {
                self.close_stray_dialogs();
                Ok(())
            })
            .run()
    }
}

type TeardownAction<'a> = Box<dyn FnOnce() -> Result<(), AutomationError> + 'a>;

/// Ordered cleanup where every step gets its own failure boundary.
#[derive(Default)]
pub struct Teardown<'a> {
    steps: Vec<(&'static str, TeardownAction<'a>)>,
}

impl<'a> Teardown<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn step(
        mut self,
        name: &'static str,
        action: impl FnOnce() -> Result<(), AutomationError> + 'a,
    ) -> Self {
        self.steps.push((name, Box::new(action)));
        self
    }

    /// Runs every step in order and returns the names of those that failed.
    pub fn run(self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        for (name, action) in self.steps {
            match action() {
                Ok(()) => debug!("Teardown: {} done", name),
                Err(e) => {
                    error!("Teardown: {} failed: {}", name, e);
                    failed.push(name);
                }
            }
        }
        failed
    }
}
