//! Single-shot operations of the migration window: load a CSV, save it in
//! bulk, and read back the rejected rows from the `Datos` window.

use super::{Outcome, Session, DATA_WINDOW_TITLE};
use crate::artifacts;
use crate::descriptor::{ClassPattern, ControlDescriptor, Preference, TextMatch, TitleMatch, WindowQuery};
use crate::platforms::{Key, KeyStroke, Modifier};
use crate::popups::DIALOG_CLASS;
use crate::utils::{fold_text, pause};
use crate::{AutomationError, ControlSnapshot, WindowHandle};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

const COMMAND_BUTTON_CLASS: &str = "ThunderRT6CommandButton";
const LOAD_BUTTON: &str = "Cargar Archivo";
const SAVE_BUTTON: &str = "Guardar Masivo";
const LOAD_DONE_PHRASE: &str = "archivo procesado";
const SAVE_DONE_PHRASE: &str = "proceso finalizado";
const SAVE_FAILED_PHRASE: &str = "con errores";
const CONFIRMATION_TITLE: &str = "confirmación";
const DUMP_LIMIT: usize = 80;

/// Grid-like controls the `Datos` window has been seen to use.
pub const GRID_CLASSES: &[&str] = &[
    "SysListView32",
    "MSFlexGridWndClass",
    "MshFlexGridWndClass",
    "VSFlexGridWndClass",
    "VtListView",
    "TDBGrid",
    "ThunderRT6UserControlDC",
    "ThunderRT6PictureBox",
];

/// Counters from the load completion modal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub loaded: u32,
    pub invalid: u32,
}

impl LoadReport {
    /// Reads `Registros cargados: N` and `Registros inválidos: M`; a missing
    /// counter reads as zero.
    pub fn parse(text: &str) -> Self {
        let folded = fold_text(text);
        let counter = |label: &str| -> u32 {
            Regex::new(&format!(r"registros\s+{label}\s*:\s*(\d+)"))
                .ok()
                .and_then(|re| re.captures(&folded))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        Self {
            loaded: counter("cargados"),
            invalid: counter("invalidos"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub message: String,
}

/// Rejected rows read from `Datos` and the CSV they were written into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCapture {
    pub csv_path: PathBuf,
    pub errors: Vec<String>,
}

/// Splits clipboard text into cells and drops a header row.
pub fn parse_grid_text(raw: &str) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect();
    let is_header = rows.first().is_some_and(|first| {
        first
            .last()
            .is_some_and(|cell| cell.to_lowercase().contains("error"))
            || first
                .get(1)
                .is_some_and(|cell| cell.to_lowercase().contains("ident"))
    });
    if is_header {
        rows.remove(0);
    }
    rows
}

/// Error text per row: the fourth column, or the last one on narrow rows.
pub fn extract_errors(rows: &[Vec<String>]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get(3).or_else(|| row.last()))
        .map(|cell| cell.trim().to_string())
        .filter(|cell| !cell.is_empty())
        .collect()
}

impl Session {
    fn command_button(&self, window: WindowHandle, caption: &str) -> Option<WindowHandle> {
        let descriptor = ControlDescriptor::of_classes([COMMAND_BUTTON_CLASS])
            .with_text(TextMatch::Exact(caption.to_string()))
            .enabled_only();
        self.locator
            .locate(window, &descriptor, self.timings.relocate_timeout)
    }

    /// Feeds `csv_path` to the migration window and reads the counters off
    /// the completion modal, which is dismissed exactly once.
    #[instrument(level = "info", skip(self))]
    pub fn load_file(&self, migration: WindowHandle, csv_path: &Path) -> Result<LoadReport, AutomationError> {
        let button = self.command_button(migration, LOAD_BUTTON).ok_or_else(|| {
            AutomationError::StructuralMismatch(format!("'{LOAD_BUTTON}' button not available"))
        })?;
        self.actions.click(button)?;

        let dialog = self
            .locator
            .wait_window(&WindowQuery::of_class(DIALOG_CLASS), self.timings.file_dialog_timeout)?
            .ok_or_else(|| AutomationError::Timeout("file dialog did not open".to_string()))?;
        self.system.set_foreground(dialog);
        self.system.set_focus(dialog);
        self.settle()?;
        self.system.send_keys(&[
            KeyStroke::Chord(Modifier::Alt, Key::Char('n')),
            KeyStroke::select_all(),
            KeyStroke::Press(Key::Backspace),
            KeyStroke::text(csv_path.to_string_lossy()),
            KeyStroke::Press(Key::Enter),
        ])?;

        let popup = self
            .popups
            .wait_containing(
                &[LOAD_DONE_PHRASE],
                self.timings.load_result_timeout,
                self.timings.poll_interval,
            )?
            .ok_or_else(|| {
                AutomationError::Timeout("load completion message never appeared".to_string())
            })?;
        let report = LoadReport::parse(&popup.text);
        self.popups.close_with_first_button(popup.handle)?;
        info!(loaded = report.loaded, invalid = report.invalid, "File loaded");
        Ok(report)
    }

    /// Commits the loaded rows. Not retried: a second click could submit twice.
    #[instrument(level = "info", skip(self))]
    pub fn bulk_save(&self, migration: WindowHandle) -> Result<Outcome<SaveReport>, AutomationError> {
        let button = self.command_button(migration, SAVE_BUTTON).ok_or_else(|| {
            AutomationError::StructuralMismatch(format!(
                "'{SAVE_BUTTON}' is not available; the file is not loaded or the screen changed"
            ))
        })?;
        self.actions.click(button)?;

        let query = WindowQuery::titled(TitleMatch::Contains(CONFIRMATION_TITLE.to_string()));
        let confirmation = self
            .locator
            .wait_window(&query, self.timings.confirmation_timeout)?
            .ok_or_else(|| {
                AutomationError::Timeout("save confirmation never appeared".to_string())
            })?;
        self.popups.confirm(confirmation)?;

        let Some(done) = self.popups.wait_containing(
            &[SAVE_DONE_PHRASE],
            self.timings.save_result_timeout,
            self.timings.poll_interval,
        )?
        else {
            warn!("Bulk save started but its completion message never appeared");
            return Ok(Outcome::Timeout);
        };
        let failed = fold_text(&done.text).contains(SAVE_FAILED_PHRASE);
        self.popups.close_with_first_button(done.handle)?;
        if failed {
            info!("Bulk save finished with errors");
            Ok(Outcome::ValidationError {
                code: SAVE_FAILED_PHRASE.to_string(),
            })
        } else {
            info!("Bulk save finished cleanly");
            Ok(Outcome::Success(SaveReport { message: done.text }))
        }
    }

    fn grid_descriptor() -> ControlDescriptor {
        ControlDescriptor::of_classes(GRID_CLASSES.iter().copied())
            .with_wrapper(ClassPattern::Prefix("ATL:".to_string()))
            .prefer(Preference::LargestArea)
    }

    fn copy_grid(&self, window: WindowHandle, grid: &ControlSnapshot) -> Result<String, AutomationError> {
        let rect = grid.rect;
        self.system.set_foreground(window);
        self.settle()?;
        self.system.click_at(
            rect.left + 50.min(rect.width() / 2),
            rect.top + 60.min(rect.height() / 2),
        )?;
        self.settle()?;

        self.system.set_clipboard_text("")?;
        self.system
            .send_keys(&[KeyStroke::select_all(), KeyStroke::copy()])?;
        self.settle()?;
        let raw = self.system.clipboard_text().unwrap_or_default();
        if !raw.trim().is_empty() {
            return Ok(raw);
        }

        self.system.send_keys(&[
            KeyStroke::Press(Key::Home),
            KeyStroke::Chord(Modifier::Shift, Key::End),
            KeyStroke::copy(),
        ])?;
        self.settle()?;
        Ok(self.system.clipboard_text().unwrap_or_default())
    }

    /// Reads the rejected rows from `Datos`, writes them into
    /// `<stem>_ERRORES.csv` next to `csv_path` and closes `Datos`.
    #[instrument(level = "info", skip(self))]
    pub fn capture_errors(&self, csv_path: &Path) -> Result<ErrorCapture, AutomationError> {
        let query = WindowQuery::titled(TitleMatch::Exact(DATA_WINDOW_TITLE.to_string()));
        let window = self
            .locator
            .wait_window(&query, self.timings.data_window_timeout)?
            .ok_or_else(|| AutomationError::Timeout("'Datos' window never appeared".to_string()))?;
        self.system.set_foreground(window);
        pause(self.timings.step_settle, &self.cancel)?;

        let Some(grid) = self.locator.locate_snapshot(
            window,
            &Self::grid_descriptor(),
            self.timings.relocate_timeout,
        ) else {
            self.locator.describe_tree(window, DUMP_LIMIT);
            return Err(AutomationError::StructuralMismatch(
                "no grid control inside 'Datos'".to_string(),
            ));
        };
        info!("Grid in 'Datos': {} ({})", grid.handle, grid.class_name);

        let mut rows = Vec::new();
        if grid.class_name.eq_ignore_ascii_case("SysListView32") {
            rows = self.system.list_view_cells(grid.handle).unwrap_or_default();
        }
        if rows.is_empty() {
            let raw = self.copy_grid(window, &grid)?;
            if raw.trim().is_empty() {
                self.locator.describe_tree(window, DUMP_LIMIT);
                return Err(AutomationError::ActionFailed(format!(
                    "could not copy anything out of grid {} ({})",
                    grid.handle, grid.class_name
                )));
            }
            rows = parse_grid_text(&raw);
        }

        let errors = extract_errors(&rows);
        if errors.is_empty() {
            return Err(AutomationError::ActionFailed(
                "'Datos' grid was read but holds no error text".to_string(),
            ));
        }
        let csv_path = artifacts::write_errors_csv(csv_path, &errors)?;
        info!(count = errors.len(), "Errors written to {}", csv_path.display());

        if !self.close_window(window, self.timings.close_timeout) {
            warn!("'Datos' window {} did not close", window);
        }
        Ok(ErrorCapture { csv_path, errors })
    }
}
