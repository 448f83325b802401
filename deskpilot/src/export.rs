//! Pending-row export from the store and the pre-validation pass that runs
//! before the file is fed to the driven application.

use crate::artifacts::{find_header_exact, CsvTable, DECEASED_ID_HEADERS, PRESTATION_HEADERS};
use crate::reconcile::{fingerprint, FlushReport, PendingBatch, RowMap, RowNumber};
use crate::store::RowStore;
use crate::utils::fold_text;
use crate::AutomationError;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Column C, used when no prestation header is recognised.
pub const PRESTATION_FALLBACK_INDEX: usize = 2;
pub const PENDING_MARK: &str = "pendiente";
pub const MISSING_ID_MARK: &str = "Falta CC fallecido";
const PET_MARKER: &str = "mascota";
const PET_ID_SALT: &str = "PISCO";
const PET_ID_SPACE: u32 = 10_000;
const PET_ID_REHASHES: u32 = 20_000;

const PET_TYPE_HEADERS: &[&[&str]] = &[
    &["TIPO"],
    &["Categoria", "Categoría"],
    &["Clasificacion", "Clasificación"],
];

/// Where the exported file and its sidecar ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedCsv {
    pub csv_path: PathBuf,
    pub map_path: PathBuf,
    pub rows: usize,
    pub row_map: RowMap,
    /// Header row of the store, for locating its columns later.
    pub store_headers: Vec<String>,
}

/// Result of the pure export step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExport {
    pub table: CsvTable,
    pub row_map: RowMap,
}


/// Fingerprint of a CSV row as it looked when exported: prestation blank.
pub fn export_fingerprint(row: &[String], prestation_column: usize) -> String {
    let mut values = row.to_vec();
    if let Some(cell) = values.get_mut(prestation_column) {
        cell.clear();
    }
    fingerprint(&values)
}

fn pet_id_number(seed: &str) -> u32 {
    let hex = blake3::hash(seed.as_bytes()).to_hex();
    u32::from_str_radix(&hex[..8], 16).unwrap_or(0) % PET_ID_SPACE
}

/// Deterministic `M####` for a pet row with no owner ID. Collisions with
/// `used` rehash with an attempt counter, then fall back to the first free
/// number.
pub fn pet_id(row: &[String], used: &HashSet<String>) -> Result<String, AutomationError> {
    let base = row.iter().map(|v| v.trim()).collect::<Vec<_>>().join("|");
    let seed = format!("{PET_ID_SALT}|{base}");
    let first = format!("M{:04}", pet_id_number(&seed));
    if !used.contains(&first) {
        return Ok(first);
    }
    let digest = blake3::hash(seed.as_bytes()).to_hex().to_string();
    for attempt in 1..PET_ID_REHASHES {
        let candidate = format!("M{:04}", pet_id_number(&format!("{digest}|{attempt}")));
        if !used.contains(&candidate) {
            return Ok(candidate);
        }
    }
    (0..PET_ID_SPACE)
        .map(|n| format!("M{n:04}"))
        .find(|candidate| !used.contains(candidate))
        .ok_or_else(|| AutomationError::InvalidArgument("pet IDs M0000-M9999 exhausted".to_string()))
}

fn is_pet(row: &[String], columns: &[usize]) -> bool {
    columns
        .iter()
        .filter_map(|c| row.get(*c))
        .any(|v| fold_text(v).contains(PET_MARKER))
}

/// Keeps rows whose prestation reads "pendiente", clears that cell, fills
/// pet IDs, and maps every kept row back to its store row number.
/// `Ok(None)` when nothing is pending.
pub fn filter_pending(all_rows: &[Vec<String>]) -> Result<Option<PendingExport>, AutomationError> {
    let Some((headers, data)) = all_rows.split_first() else {
        return Err(AutomationError::Artifact("store sheet is empty".to_string()));
    };
    let prestation = find_header_exact(headers, PRESTATION_HEADERS).unwrap_or(PRESTATION_FALLBACK_INDEX);
    if headers.len() <= prestation {
        return Err(AutomationError::Artifact(format!(
            "no prestation column (index {prestation}) among {} headers",
            headers.len()
        )));
    }
    let deceased = find_header_exact(headers, DECEASED_ID_HEADERS).ok_or_else(|| {
        AutomationError::Artifact(format!("no deceased ID column among headers {headers:?}"))
    })?;
    let pet_columns: Vec<usize> = PET_TYPE_HEADERS
        .iter()
        .filter_map(|candidates| find_header_exact(headers, candidates))
        .collect();

    let mut used_pet_ids = HashSet::new();
    let mut rows = Vec::new();
    let mut entries = Vec::new();
    for (offset, source) in data.iter().enumerate() {
        let store_row = offset as RowNumber + 2;
        let mut row = source.clone();
        if row.len() < headers.len() {
            row.resize(headers.len(), String::new());
        }
        if fold_text(row[prestation].trim()) != PENDING_MARK {
            continue;
        }
        row[prestation].clear();

        if is_pet(&row, &pet_columns) && row[deceased].trim().is_empty() {
            let id = pet_id(&row, &used_pet_ids)?;
            info!(store_row, "Assigned pet ID {}", id);
            row[deceased] = id.clone();
            used_pet_ids.insert(id);
        }

        entries.push((fingerprint(&row), store_row));
        rows.push(row);
    }

    if rows.is_empty() {
        return Ok(None);
    }
    Ok(Some(PendingExport {
        table: CsvTable::new(headers.clone(), rows, b';'),
        row_map: RowMap::build(entries)?,
    }))
}

/// `<output>/YYYY-MM-DD/Prestacion_Pendiente_HHMMSS.csv`.
pub fn export_path(output_dir: &Path, now: NaiveDateTime) -> PathBuf {
    output_dir
        .join(now.format("%Y-%m-%d").to_string())
        .join(format!("Prestacion_Pendiente_{}.csv", now.format("%H%M%S")))
}

/// Reads the store and writes the pending CSV plus its row-map sidecar.
#[instrument(level = "info", skip(store))]
pub fn export_pending(
    store: &mut dyn RowStore,
    output_dir: &Path,
    now: NaiveDateTime,
) -> Result<Option<ExportedCsv>, AutomationError> {
    let all_rows = store.read_all()?;
    let Some(export) = filter_pending(&all_rows)? else {
        info!("No pending rows in the store");
        return Ok(None);
    };
    let csv_path = export_path(output_dir, now);
    export.table.write(&csv_path)?;
    let map_path = export.row_map.save(&csv_path)?;
    info!(rows = export.table.rows.len(), "Exported {}", csv_path.display());
    Ok(Some(ExportedCsv {
        csv_path,
        map_path,
        rows: export.table.rows.len(),
        row_map: export.row_map,
        store_headers: all_rows.first().cloned().unwrap_or_default(),
    }))
}

/// 1-based store column holding the prestation: an exact header first,
/// then any header mentioning "prest".
pub fn store_prestation_column(headers: &[String]) -> Result<u32, AutomationError> {
    find_header_exact(headers, PRESTATION_HEADERS)
        .or_else(|| headers.iter().position(|h| fold_text(h).contains("prest")))
        .map(|index| index as u32 + 1)
        .ok_or_else(|| {
            AutomationError::Artifact(format!("no prestation column in store headers {headers:?}"))
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Prevalidation {
    pub kept: usize,
    pub dropped: usize,
    pub unmapped: usize,
    pub flushed: FlushReport,
}

/// Drops rows without a deceased ID, marking their store rows, and blanks
/// the prestation of the rest so the driven application accepts them.
#[instrument(level = "info", skip(row_map, store))]
pub fn prevalidate(
    csv_path: &Path,
    row_map: &mut RowMap,
    store: &mut dyn RowStore,
    store_column: u32,
    merge_gap: Option<u32>,
) -> Result<Prevalidation, AutomationError> {
    let mut table = CsvTable::read(csv_path)?;
    let prestation = table.require_column(PRESTATION_HEADERS, "prestation")?;
    let deceased = table.require_column(DECEASED_ID_HEADERS, "deceased ID")?;

    let mut batch = PendingBatch::new();
    let mut report = Prevalidation::default();
    let mut kept = Vec::new();
    for mut row in std::mem::take(&mut table.rows) {
        let identity = export_fingerprint(&row, prestation);
        if row[deceased].trim().is_empty() {
            report.dropped += 1;
            match row_map.resolve(&identity) {
                Some(store_row) => batch.push(store_row, store_column, MISSING_ID_MARK),
                None => {
                    report.unmapped += 1;
                    warn!("{}", AutomationError::UnmappedRow(format!(
                        "row without deceased ID, fingerprint {identity}"
                    )));
                }
            }
            continue;
        }
        row[prestation].clear();
        kept.push(row);
    }
    report.kept = kept.len();
    table.rows = kept;
    table.write(csv_path)?;
    info!(kept = report.kept, dropped = report.dropped, "CSV prepared for loading");

    report.flushed = batch.flush(store, merge_gap)?;
    Ok(report)
}
