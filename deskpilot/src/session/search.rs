//! Search by national ID on the capture screen.
//!
//! The search bar has no labels or stable ids. It is found as a group: the
//! widest combo near the top of the host, the text input nearest to its
//! left and the small square-ish control nearest to its right.

use super::{Outcome, Session};
use crate::descriptor::{
    Anchor, ControlDescriptor, Penalties, Preference, Region, TextMatch, TitleMatch, WindowQuery,
};
use crate::popups::{ACCEPT_BUTTONS, CANCEL_BUTTONS};
use crate::utils::{fold_text, pause, poll_until};
use crate::{AutomationError, ControlSnapshot, Rect, WindowHandle};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const COMBO_CLASSES: &[&str] = &["ComboBox", "ComboBoxEx32", "ThunderRT6ComboBox", "ThunderComboBox"];
pub const TEXT_INPUT_CLASSES: &[&str] = &["Edit", "ThunderRT6TextBox"];
pub const TRIGGER_CLASSES: &[&str] = &[
    "Button",
    "Static",
    "ToolbarWindow32",
    "ThunderRT6PictureBox",
    "ThunderRT6CommandButton",
];
const RESULT_INPUT_CLASSES: &[&str] = &["Edit", "ThunderRT6TextBox", "ThunderRT6MaskedEdit"];

const SEARCH_BAND: Region = Region::TopBand { height: 220 };

/// Item of the criterion combo meaning "by deceased's national ID".
pub const DEFAULT_CRITERION_INDEX: usize = 1;

const NO_MATCH_PHRASES: &[&str] = &["no se encontro registro", "no se encontr"];
const TYPE_MISMATCH_PHRASES: &[&str] = &["no coinciden los tipos", "error '13'"];
const CALLS_WINDOW_TITLE: &str = "Control de Llamadas / Novedades";
const MONTH_PROMPT_PHRASE: &str = "mes a visualizar";
const ORDER_LABEL: &str = "orden servicio";
const ORDER_NUMBER_PATTERN: &str = r"^\d{2}-\d{3,5}-\d{2}$";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchState {
    Idle,
    Focused,
    FieldsLocated,
    IdEntered,
    CriterionSelected,
    IdReentered,
    Submitted,
    NotFoundTerminal,
    ErrorTerminal,
    ResultExtracted,
}

impl SearchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SearchState::NotFoundTerminal | SearchState::ErrorTerminal | SearchState::ResultExtracted
        )
    }
}

/// The three cooperating controls of the search bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchGroup {
    pub identifier: ControlSnapshot,
    pub criterion: ControlSnapshot,
    pub trigger: ControlSnapshot,
}

pub fn criterion_descriptor() -> ControlDescriptor {
    ControlDescriptor::of_classes(COMBO_CLASSES.iter().copied())
        .in_region(SEARCH_BAND)
        .min_size(120, 18)
        .prefer(Preference::Widest)
}

pub fn identifier_descriptor(criterion: &Rect) -> ControlDescriptor {
    ControlDescriptor::of_classes(TEXT_INPUT_CLASSES.iter().copied())
        .in_region(SEARCH_BAND)
        .min_size(80, 18)
        .anchored(Anchor::LeftOf(*criterion), 3)
}

pub fn trigger_descriptor(criterion: &Rect) -> ControlDescriptor {
    ControlDescriptor::of_classes(TRIGGER_CLASSES.iter().copied())
        .in_region(SEARCH_BAND)
        .max_size(60, 60)
        .anchored(
            Anchor::RightOf {
                reference: *criterion,
                slack: 5,
            },
            1,
        )
        .with_penalties(Penalties {
            squareness: 1,
            ..Default::default()
        })
}

/// Assembles the group from one snapshot of the host's controls. Nothing
/// is returned unless all three members are found.
pub fn assemble_search_group(controls: &[ControlSnapshot], host: &Rect) -> Result<SearchGroup, AutomationError> {
    let criterion = criterion_descriptor()
        .best(controls, Some(host))
        .ok_or_else(|| {
            AutomationError::StructuralMismatch("no criterion selector in the search bar".to_string())
        })?;
    let identifier = identifier_descriptor(&criterion.rect)
        .best(controls, Some(host))
        .ok_or_else(|| {
            AutomationError::StructuralMismatch(format!(
                "no text input left of criterion selector {}",
                criterion.handle
            ))
        })?;
    let trigger = trigger_descriptor(&criterion.rect)
        .best(controls, Some(host))
        .ok_or_else(|| {
            AutomationError::StructuralMismatch(format!(
                "no search trigger right of criterion selector {}",
                criterion.handle
            ))
        })?;
    Ok(SearchGroup {
        identifier: identifier.clone(),
        criterion: criterion.clone(),
        trigger: trigger.clone(),
    })
}

/// Service order number from a snapshot of the host: the input right of the
/// "orden servicio" label, else any input holding a value shaped like one.
/// `read` returns an input's current text.
pub fn pick_order_number(
    controls: &[ControlSnapshot],
    read: impl Fn(&ControlSnapshot) -> String,
) -> Option<String> {
    let label = ControlDescriptor::of_classes(["Static"])
        .with_text(TextMatch::Contains(ORDER_LABEL.to_string()))
        .best(controls, None);
    if let Some(label) = label {
        let input = ControlDescriptor::of_classes(RESULT_INPUT_CLASSES.iter().copied())
            .max_size(260, 40)
            .anchored(
                Anchor::RightOf {
                    reference: label.rect,
                    slack: 5,
                },
                4,
            )
            .best(controls, None);
        if let Some(value) = input.map(&read).filter(|v| !v.trim().is_empty()) {
            return Some(value.trim().to_string());
        }
    }

    let shape = Regex::new(ORDER_NUMBER_PATTERN).ok()?;
    let inputs = ControlDescriptor::of_classes(RESULT_INPUT_CLASSES.iter().copied()).max_size(260, 40);
    controls
        .iter()
        .filter(|c| inputs.score(c, None).is_some())
        .map(|c| read(c).trim().to_string())
        .find(|v| shape.is_match(v))
}

struct SearchProgress<'a> {
    national_id: &'a str,
    state: SearchState,
}

impl<'a> SearchProgress<'a> {
    fn new(national_id: &'a str) -> Self {
        Self {
            national_id,
            state: SearchState::Idle,
        }
    }

    fn advance(&mut self, next: SearchState) {
        debug!(national_id = self.national_id, from = ?self.state, to = ?next, "search step");
        self.state = next;
    }
}

impl Session {
    /// Closes month prompts other than the services one, preferring Cancel.
    fn dismiss_foreign_month_prompts(&self) -> Result<(), AutomationError> {
        for popup in self.popups.scan() {
            let text = fold_text(&popup.text);
            if text.contains(MONTH_PROMPT_PHRASE) && !text.contains("servicios") {
                info!("Dismissing unrelated prompt: {}", popup.text);
                self.popups.close_preferring(popup.handle, CANCEL_BUTTONS)?;
            }
        }
        Ok(())
    }

    /// Polls until the group assembles. On timeout the last assembly error
    /// is returned.
    pub fn wait_search_group(&self, host: WindowHandle, timeout: Duration) -> Result<SearchGroup, AutomationError> {
        let attempt = || -> Result<SearchGroup, AutomationError> {
            let host_rect = self.system.rect(host).ok_or_else(|| {
                AutomationError::StructuralMismatch(format!("host window {host} is gone"))
            })?;
            assemble_search_group(&self.locator.visible_descendants(host), &host_rect)
        };
        if let Some(group) = poll_until(timeout, self.timings.poll_interval, &self.cancel, || {
            attempt().ok()
        })? {
            return Ok(group);
        }
        attempt()
    }

    fn extract_order_number(&self, host: WindowHandle) -> Option<String> {
        let controls = self.locator.visible_descendants(host);
        pick_order_number(&controls, |c| self.actions.read_text(c.handle))
    }

    /// Runs one search by national ID with the default criterion.
    pub fn search_by_national_id(
        &self,
        host: WindowHandle,
        national_id: &str,
    ) -> Result<Outcome<String>, AutomationError> {
        self.search_with_criterion(host, national_id, DEFAULT_CRITERION_INDEX)
    }

    /// `Success` carries the service order number. A type-mismatch modal is
    /// raised as `ForeignError`; it only concerns this record. Dialogs still
    /// on screen once the outcome is known are dismissed by the catalog
    /// policy, so they never reach the next record.
    #[instrument(level = "info", skip(self, host))]
    pub fn search_with_criterion(
        &self,
        host: WindowHandle,
        national_id: &str,
        criterion_index: usize,
    ) -> Result<Outcome<String>, AutomationError> {
        let outcome = self.run_search(host, national_id, criterion_index);
        if !matches!(outcome, Err(AutomationError::Cancelled(_))) {
            self.clear_leftover_dialogs();
        }
        outcome
    }

    /// Sweeps every visible dialog. An error dialog found here does not
    /// change the outcome already decided for the record.
    fn clear_leftover_dialogs(&self) {
        match self.popups.sweep() {
            Ok(0) => {}
            Ok(count) => debug!("Dismissed {} leftover dialog(s)", count),
            Err(e) => warn!("Leftover error dialog dismissed after the outcome: {}", e),
        }
    }

    fn run_search(
        &self,
        host: WindowHandle,
        national_id: &str,
        criterion_index: usize,
    ) -> Result<Outcome<String>, AutomationError> {
        let mut progress = SearchProgress::new(national_id);
        let retries = self.timings.text_retries;

        self.focus_host(host)?;
        progress.advance(SearchState::Focused);
        self.dismiss_foreign_month_prompts()?;

        let group = self.wait_search_group(host, self.timings.form_timeout)?;
        debug!(
            identifier = %group.identifier.handle,
            criterion = %group.criterion.handle,
            trigger = %group.trigger.handle,
            "Search bar located"
        );
        progress.advance(SearchState::FieldsLocated);

        self.actions
            .set_text_verified(group.identifier.handle, national_id, retries)?;
        progress.advance(SearchState::IdEntered);
        self.settle()?;

        self.actions.select_nth_dropdown_option(
            group.criterion.handle,
            criterion_index,
            self.timings.dropdown_timeout,
        )?;
        progress.advance(SearchState::CriterionSelected);
        self.settle()?;

        // Picking a criterion can clear the input, and may rebuild it.
        let group = self.wait_search_group(host, self.timings.relocate_timeout)?;
        self.actions
            .set_text_verified(group.identifier.handle, national_id, retries)?;
        progress.advance(SearchState::IdReentered);
        pause(self.timings.fast_poll_interval, &self.cancel)?;

        self.actions.click_center(group.trigger.handle)?;
        progress.advance(SearchState::Submitted);
        self.settle()?;

        if let Some(popup) = self.popups.wait_containing(
            NO_MATCH_PHRASES,
            self.timings.no_match_timeout,
            self.timings.fast_poll_interval,
        )? {
            self.popups.close_preferring(popup.handle, ACCEPT_BUTTONS)?;
            progress.advance(SearchState::NotFoundTerminal);
            warn!(national_id, "No record for this national ID");
            return Ok(Outcome::NotFound);
        }

        if let Some(popup) = self.popups.wait_containing(
            TYPE_MISMATCH_PHRASES,
            self.timings.error_modal_timeout,
            self.timings.fast_poll_interval,
        )? {
            if let Err(e) = self.popups.close_preferring(popup.handle, ACCEPT_BUTTONS) {
                warn!("Could not dismiss error modal: {}", e);
            }
            progress.advance(SearchState::ErrorTerminal);
            return Err(AutomationError::ForeignError(popup.text));
        }

        let calls = WindowQuery::titled(TitleMatch::Contains(CALLS_WINDOW_TITLE.to_string()));
        if let Some(window) = self
            .locator
            .wait_window(&calls, self.timings.calls_window_timeout)?
        {
            if !self.close_window(window, self.timings.close_timeout) {
                warn!("'{}' window {} did not close", CALLS_WINDOW_TITLE, window);
            }
        }

        match poll_until(
            self.timings.extract_timeout,
            self.timings.poll_interval,
            &self.cancel,
            || self.extract_order_number(host),
        )? {
            Some(order) => {
                progress.advance(SearchState::ResultExtracted);
                info!(national_id, order = %order, "Service order captured");
                Ok(Outcome::Success(order))
            }
            None => {
                warn!(national_id, "Service order number never showed up");
                Ok(Outcome::Timeout)
            }
        }
    }
}
