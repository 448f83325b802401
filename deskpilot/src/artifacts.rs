//! CSV files exchanged with the driven application.
//!
//! Files are UTF-8 with a byte-order mark. The delimiter is sniffed on read
//! and kept, so a rewrite produces the same dialect the file arrived in.

use crate::utils::fold_text;
use crate::AutomationError;
use std::path::{Path, PathBuf};
use tracing::debug;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const SNIFF_BYTES: usize = 4096;

pub const PRESTATION_HEADERS: &[&str] = &[
    "N° Prestacion",
    "N Prestacion",
    "N Prestaciones",
    "N° Prestaciones",
    "N Prestación",
    "N° Prestación",
    "No Prestaciones",
    "No Prestación",
    "Prestaciones",
    "Prestación",
    "Prestacion",
];

pub const DECEASED_ID_HEADERS: &[&str] = &[
    "CC: Del Fallecido",
    "CC Del Fallecido",
    "CC Fallecido",
    "Cedula Fallecido",
    "Cédula Fallecido",
    "Documento Fallecido",
    "Documento del Fallecido",
];

/// `;` wins ties, matching how the driven application writes its own exports.
pub fn sniff_delimiter(sample: &[u8]) -> u8 {
    let sample = &sample[..sample.len().min(SNIFF_BYTES)];
    let semicolons = sample.iter().filter(|b| **b == b';').count();
    let commas = sample.iter().filter(|b| **b == b',').count();
    if semicolons >= commas {
        b';'
    } else {
        b','
    }
}

/// Case-insensitive exact match over `candidates` in order.
pub fn find_header_exact(headers: &[String], candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|candidate| {
        let wanted = candidate.trim().to_lowercase();
        headers
            .iter()
            .position(|h| h.trim().to_lowercase() == wanted)
    })
}

/// Exact match first, then the first header containing any candidate.
pub fn find_header(headers: &[String], candidates: &[&str]) -> Option<usize> {
    find_header_exact(headers, candidates).or_else(|| {
        headers.iter().position(|h| {
            let folded = fold_text(h.trim());
            candidates
                .iter()
                .any(|c| folded.contains(&fold_text(c.trim())))
        })
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    /// Every row padded to the header width.
    pub rows: Vec<Vec<String>>,
    pub delimiter: u8,
}

impl CsvTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>, delimiter: u8) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width.max(row.len()), String::new());
                row
            })
            .collect();
        Self {
            headers,
            rows,
            delimiter,
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, AutomationError> {
        let body = bytes.strip_prefix(BOM).unwrap_or(bytes);
        let delimiter = sniff_delimiter(body);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(true)
            .from_reader(body);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.trim().is_empty()) {
            return Err(AutomationError::Artifact(
                "CSV has no header row".to_string(),
            ));
        }
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self::new(headers, rows, delimiter))
    }

    pub fn read(path: &Path) -> Result<Self, AutomationError> {
        let bytes = std::fs::read(path).map_err(|e| {
            AutomationError::Artifact(format!("cannot read {}: {e}", path.display()))
        })?;
        let table = Self::parse(&bytes)?;
        debug!(
            "Read {} rows from {} (delimiter '{}')",
            table.rows.len(),
            path.display(),
            table.delimiter as char
        );
        Ok(table)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, AutomationError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_writer(BOM.to_vec());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| AutomationError::Artifact(format!("cannot flush CSV: {e}")))
    }

    pub fn write(&self, path: &Path) -> Result<(), AutomationError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        debug!("Wrote {} rows to {}", self.rows.len(), path.display());
        Ok(())
    }

    pub fn column(&self, candidates: &[&str]) -> Option<usize> {
        find_header(&self.headers, candidates)
    }

    /// Like [`column`](Self::column) but a missing header is an error.
    pub fn require_column(&self, candidates: &[&str], what: &str) -> Result<usize, AutomationError> {
        self.column(candidates).ok_or_else(|| {
            AutomationError::Artifact(format!(
                "no {what} column among headers {:?}",
                self.headers
            ))
        })
    }

    pub fn value(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// `<dir>/<stem>_ERRORES.csv` next to `csv_path`.
pub fn errors_csv_path(csv_path: &Path) -> PathBuf {
    let stem = csv_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    csv_path.with_file_name(format!("{stem}_ERRORES.csv"))
}

/// Copies `csv_path` with each error written into the prestation column of
/// the rows in order, and returns the new file's path.
pub fn write_errors_csv(csv_path: &Path, errors: &[String]) -> Result<PathBuf, AutomationError> {
    let mut table = CsvTable::read(csv_path)?;
    let column = table.require_column(PRESTATION_HEADERS, "prestation")?;
    for (row, error) in table.rows.iter_mut().zip(errors) {
        row[column] = error.clone();
    }
    let out = errors_csv_path(csv_path);
    table.write(&out)?;
    Ok(out)
}
