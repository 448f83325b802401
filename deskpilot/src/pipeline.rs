//! One full run: export pending rows, pre-validate them, bulk-load and save
//! through the migration window, then search every surviving record and
//! write the results back to the store.

use crate::artifacts::{CsvTable, DECEASED_ID_HEADERS, PRESTATION_HEADERS};
use crate::config::RobotConfig;
use crate::export::{self, export_fingerprint, ExportedCsv, Prevalidation};
use crate::reconcile::{FlushReport, PendingBatch, RowMap};
use crate::session::{LoadReport, Outcome, Session};
use crate::store::RowStore;
use crate::utils::fold_text;
use crate::{AutomationError, WindowHandle};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, info_span, warn};

pub const NOT_REGISTERED_MARK: &str = "Cedula no registrada";

/// Prestation values that take a row out of the search phase.
const SETTLED_MARKS: &[&str] = &["error", "falta cc fallecido", "cedula no registrada"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchTally {
    pub searched: usize,
    pub found: usize,
    pub not_found: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub unmapped: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub csv_path: Option<PathBuf>,
    pub errors_csv_path: Option<PathBuf>,
    pub exported: usize,
    pub prevalidation: Option<Prevalidation>,
    pub load: Option<LoadReport>,
    pub save: Option<&'static str>,
    pub search: SearchTally,
    pub flushed: FlushReport,
    pub teardown_failures: Vec<&'static str>,
}

/// Row of the CSV in use that still needs a search.
pub fn is_search_candidate(prestation: &str, national_id: &str) -> bool {
    let mark = fold_text(prestation.trim());
    !SETTLED_MARKS.contains(&mark.as_str()) && !national_id.trim().is_empty()
}

pub fn run(
    config: &RobotConfig,
    session: &Session,
    store: &mut dyn RowStore,
) -> Result<RunReport, AutomationError> {
    run_at(config, session, store, chrono::Local::now().naive_local())
}

/// Same as [`run`] with the export timestamp supplied by the caller.
pub fn run_at(
    config: &RobotConfig,
    session: &Session,
    store: &mut dyn RowStore,
    now: NaiveDateTime,
) -> Result<RunReport, AutomationError> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("run", run_id = %run_id);
    let _guard = span.enter();

    let mut report = RunReport {
        run_id,
        ..Default::default()
    };

    let Some(exported) = export::export_pending(store, &config.paths.output_dir(), now)? else {
        info!("Nothing pending; run finished");
        return Ok(report);
    };
    report.exported = exported.rows;
    report.csv_path = Some(exported.csv_path.clone());

    let ExportedCsv {
        csv_path,
        mut row_map,
        store_headers,
        ..
    } = exported;
    let store_column = export::store_prestation_column(&store_headers)?;

    let prevalidation = export::prevalidate(
        &csv_path,
        &mut row_map,
        store,
        store_column,
        config.store.merge_gap,
    )?;
    let kept = prevalidation.kept;
    report.prevalidation = Some(prevalidation);
    if kept == 0 {
        info!("No rows left after pre-validation; run finished");
        return Ok(report);
    }

    let mut runner = Runner {
        config,
        session,
        store,
        row_map,
        store_column,
        main: None,
        migration: None,
        report,
    };
    let outcome = runner.drive(&csv_path);
    runner.report.teardown_failures =
        session.teardown(&config.app, runner.migration, runner.main);
    if let Err(e) = &outcome {
        error!("Run failed: {}", e);
    }
    outcome.map(|()| runner.report)
}

struct Runner<'a> {
    config: &'a RobotConfig,
    session: &'a Session,
    store: &'a mut dyn RowStore,
    row_map: RowMap,
    store_column: u32,
    main: Option<WindowHandle>,
    migration: Option<WindowHandle>,
    report: RunReport,
}

impl Runner<'_> {
    fn drive(&mut self, csv_path: &Path) -> Result<(), AutomationError> {
        let main = self
            .session
            .open_session(&self.config.app, &self.config.login)?;
        self.main = Some(main);

        let csv_in_use = self.bulk_phase(main, csv_path)?;
        self.search_phase(main, &csv_in_use)
    }

    /// Loads and saves the file. Returns the CSV the search phase reads:
    /// the `_ERRORES` copy when the save reported rejected rows.
    fn bulk_phase(&mut self, main: WindowHandle, csv_path: &Path) -> Result<PathBuf, AutomationError> {
        let timings = self.session.timings();
        let migration = self.session.open_migration(main)?;
        self.migration = Some(migration);

        let load = self.session.load_file(migration, csv_path)?;
        self.report.load = Some(load);

        if load.loaded == 0 {
            warn!(invalid = load.invalid, "No rows were loaded; skipping bulk save");
            self.session.close_data_window(timings.data_window_timeout);
            if self.session.close_window(migration, timings.close_timeout) {
                self.migration = None;
            }
            self.session.focus_host(main)?;
            return Ok(csv_path.to_path_buf());
        }

        let saved = self.session.bulk_save(migration)?;
        self.report.save = Some(saved.label());
        match saved {
            Outcome::ValidationError { code } => {
                info!("Bulk save reported '{}'; reading rejected rows", code);
                let capture = self.session.capture_errors(csv_path)?;
                self.report.errors_csv_path = Some(capture.csv_path.clone());
                Ok(capture.csv_path)
            }
            Outcome::Timeout => {
                warn!("Bulk save outcome unknown; searching every row");
                Ok(csv_path.to_path_buf())
            }
            _ => Ok(csv_path.to_path_buf()),
        }
    }

    fn search_phase(&mut self, main: WindowHandle, csv_in_use: &Path) -> Result<(), AutomationError> {
        let timings = self.session.timings();
        let mut table = CsvTable::read(csv_in_use)?;
        let prestation = table.require_column(PRESTATION_HEADERS, "prestation")?;
        let national_id = table.require_column(DECEASED_ID_HEADERS, "deceased ID")?;

        let candidates: Vec<usize> = (0..table.rows.len())
            .filter(|&i| {
                is_search_candidate(table.value(i, prestation), table.value(i, national_id))
            })
            .collect();
        info!(candidates = candidates.len(), "Search phase starting");

        if let Some(migration) = self.migration.take() {
            if !self.session.close_window(migration, timings.close_timeout) {
                warn!("Migration window {} did not close", migration);
                self.migration = Some(migration);
            }
        }
        self.session.focus_host(main)?;
        self.session.open_capture(main)?;

        let mut batch = PendingBatch::new();
        let mut fatal = None;
        for index in candidates {
            let id = table.value(index, national_id).trim().to_string();
            let identity = export_fingerprint(&table.rows[index], prestation);
            self.report.search.searched += 1;

            let value = match self.session.search_by_national_id(main, &id) {
                Ok(Outcome::Success(order)) => {
                    self.report.search.found += 1;
                    order
                }
                Ok(Outcome::NotFound) => {
                    self.report.search.not_found += 1;
                    NOT_REGISTERED_MARK.to_string()
                }
                Ok(other) => {
                    self.report.search.timed_out += 1;
                    warn!(national_id = %id, outcome = other.label(), "Search gave no answer");
                    continue;
                }
                Err(e) if e.is_per_record() => {
                    self.report.search.failed += 1;
                    warn!(national_id = %id, "Search failed: {}", e);
                    continue;
                }
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
            };

            if let Some(cell) = table.rows[index].get_mut(prestation) {
                *cell = value.clone();
            }
            match self.row_map.resolve(&identity) {
                Some(row) => batch.push(row, self.store_column, value),
                None => {
                    self.report.search.unmapped += 1;
                    let e = AutomationError::UnmappedRow(format!("fingerprint {identity}"));
                    warn!(national_id = %id, "{}", e);
                }
            }
        }

        table.write(csv_in_use)?;
        self.report.flushed = batch.flush(self.store, self.config.store.merge_gap)?;
        info!(
            searched = self.report.search.searched,
            found = self.report.search.found,
            not_found = self.report.search.not_found,
            "Search phase finished"
        );
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
