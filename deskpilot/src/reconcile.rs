//! Maps exported rows back to store rows through a content fingerprint,
//! and batches the resulting cell updates into ranged writes.
//!
//! Rows carry no key of their own. Identical rows share a fingerprint and
//! queue up behind it in store order; every resolution pops the front of
//! the queue, so duplicates are handed out one by one and a store row is
//! never resolved twice.

use crate::store::{CellRange, RowStore, StoreError};
use crate::AutomationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 1-based row number in the store; the header is row 1.
pub type RowNumber = u32;

const SIDECAR_SUFFIX: &str = ".map.json";

/// Hex digest of the trimmed values joined with `|`, in column order.
pub fn fingerprint<S: AsRef<str>>(values: &[S]) -> String {
    let joined = values
        .iter()
        .map(|v| v.as_ref().trim())
        .collect::<Vec<_>>()
        .join("|");
    blake3::hash(joined.as_bytes()).to_hex().to_string()
}

/// Fingerprint → queue of store rows that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowMap {
    queues: BTreeMap<String, VecDeque<RowNumber>>,
}

impl RowMap {
    /// Single pass; queue order follows input order. A row number may only
    /// appear once across all queues.
    pub fn build<I>(entries: I) -> Result<Self, AutomationError>
    where
        I: IntoIterator<Item = (String, RowNumber)>,
    {
        let mut map = Self::default();
        let mut seen = HashSet::new();
        for (fingerprint, row) in entries {
            if !seen.insert(row) {
                return Err(AutomationError::InvalidArgument(format!(
                    "store row {row} appears twice in the row map"
                )));
            }
            map.queues.entry(fingerprint).or_default().push_back(row);
        }
        Ok(map)
    }

    /// Pops the next unresolved row for `fingerprint`.
    pub fn resolve(&mut self, fingerprint: &str) -> Option<RowNumber> {
        let queue = self.queues.get_mut(fingerprint)?;
        let row = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(fingerprint);
        }
        row
    }

    pub fn remaining(&self, fingerprint: &str) -> usize {
        self.queues.get(fingerprint).map_or(0, VecDeque::len)
    }

    /// Unresolved rows across every fingerprint.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// `<csv path>.map.json`.
    pub fn sidecar_path(csv_path: &Path) -> PathBuf {
        let mut name = csv_path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    pub fn save(&self, csv_path: &Path) -> Result<PathBuf, AutomationError> {
        let path = Self::sidecar_path(csv_path);
        std::fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        debug!("Row map with {} entries saved to {}", self.len(), path.display());
        Ok(path)
    }

    pub fn load(csv_path: &Path) -> Result<Self, AutomationError> {
        let path = Self::sidecar_path(csv_path);
        let bytes = std::fs::read(&path).map_err(|e| {
            AutomationError::Artifact(format!("row map {} unreadable: {e}", path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Cell updates collected during one phase, keyed by (column, row).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    cells: BTreeMap<(u32, RowNumber), String>,
}

/// What a flush sent to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub ranges: Vec<CellRange>,
    pub cells: usize,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a value. A row touched twice in one batch keeps the last value.
    pub fn push(&mut self, row: RowNumber, column: u32, value: impl Into<String>) {
        let value = value.into();
        if let Some(previous) = self.cells.insert((column, row), value.clone()) {
            warn!(
                row,
                column, "Row updated twice in one batch; '{}' replaces '{}'", value, previous
            );
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, row: RowNumber, column: u32) -> Option<&str> {
        self.cells.get(&(column, row)).map(String::as_str)
    }

    /// Per column, splits the touched rows into spans. A gap of more than
    /// `merge_gap` untouched rows starts a new span; `None` never splits.
    /// A cell outside the sheet (row or column 0) is a `StoreError::Range`.
    pub fn blocks(
        &self,
        merge_gap: Option<u32>,
    ) -> Result<Vec<(CellRange, BTreeMap<RowNumber, String>)>, StoreError> {
        let mut blocks: Vec<(u32, RowNumber, RowNumber, BTreeMap<RowNumber, String>)> = Vec::new();
        for (&(column, row), value) in &self.cells {
            let extends = blocks.last().is_some_and(|(c, _, last, _)| {
                *c == column && merge_gap.map_or(true, |gap| row - *last - 1 <= gap)
            });
            if extends {
                if let Some((_, _, last, values)) = blocks.last_mut() {
                    *last = row;
                    values.insert(row, value.clone());
                }
                continue;
            }
            let mut values = BTreeMap::new();
            values.insert(row, value.clone());
            blocks.push((column, row, row, values));
        }
        blocks
            .into_iter()
            .map(|(column, first, last, values)| {
                CellRange::column_span(column, first, last).map(|range| (range, values))
            })
            .collect()
    }

    /// Read-modify-write per block: cells of the span that are not in the
    /// batch are written back with the value just read. Empties the batch on
    /// success; on error the batch keeps every queued update.
    pub fn flush(
        &mut self,
        store: &mut dyn RowStore,
        merge_gap: Option<u32>,
    ) -> Result<FlushReport, StoreError> {
        let mut report = FlushReport::default();
        for (range, values) in self.blocks(merge_gap)? {
            let mut current = store.read_range(&range)?;
            for (row, value) in &values {
                let offset = (row - range.first_row) as usize;
                if let Some(cell) = current.get_mut(offset).and_then(|r| r.first_mut()) {
                    *cell = value.clone();
                }
            }
            store.write_range(&range, current)?;
            debug!("Wrote {} cell(s) through {}", values.len(), range.a1());
            report.cells += values.len();
            report.ranges.push(range);
        }
        if report.cells > 0 {
            info!(
                "Flushed {} update(s) in {} ranged write(s)",
                report.cells,
                report.ranges.len()
            );
        }
        self.cells.clear();
        Ok(report)
    }
}
