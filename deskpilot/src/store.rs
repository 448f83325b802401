//! The row-oriented system of record.
//!
//! Production talks to a Google Sheets worksheet through the v4 values API;
//! tests use [`MemoryStore`]. Both see the sheet as a grid of strings with
//! 1-based row and column numbers, header in row 1.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cannot decode store response: {0}")]
    Decode(String),

    #[error("invalid range: {0}")]
    Range(String),

    #[error("no access token configured")]
    MissingToken,
}

/// Rectangular block of cells, bounds inclusive and 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub first_row: u32,
    pub last_row: u32,
    pub first_column: u32,
    pub last_column: u32,
}

impl CellRange {
    pub fn new(first_row: u32, last_row: u32, first_column: u32, last_column: u32) -> Result<Self, StoreError> {
        if first_row == 0 || first_column == 0 || last_row < first_row || last_column < first_column {
            return Err(StoreError::Range(format!(
                "rows {first_row}..={last_row}, columns {first_column}..={last_column}"
            )));
        }
        Ok(Self {
            first_row,
            last_row,
            first_column,
            last_column,
        })
    }

    /// A vertical span inside one column.
    pub fn column_span(column: u32, first_row: u32, last_row: u32) -> Result<Self, StoreError> {
        Self::new(first_row, last_row, column, column)
    }

    pub fn rows(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn columns(&self) -> u32 {
        self.last_column - self.first_column + 1
    }

    /// `C2:C10` style reference.
    pub fn a1(&self) -> String {
        format!(
            "{}{}:{}{}",
            column_letters(self.first_column),
            self.first_row,
            column_letters(self.last_column),
            self.last_row
        )
    }
}

/// 1 -> `A`, 26 -> `Z`, 27 -> `AA`.
pub fn column_letters(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = ((column - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        column = (column - 1) / 26;
    }
    letters.iter().rev().collect()
}

pub trait RowStore {
    /// Every row, header included. Rows may be ragged.
    fn read_all(&mut self) -> Result<Vec<Vec<String>>, StoreError>;

    /// Current values of a block, padded to its full shape.
    fn read_range(&mut self, range: &CellRange) -> Result<Vec<Vec<String>>, StoreError>;

    /// Overwrites a block. `values` must match the range's shape.
    fn write_range(&mut self, range: &CellRange, values: Vec<Vec<String>>) -> Result<(), StoreError>;
}

fn pad_block(mut rows: Vec<Vec<String>>, range: &CellRange) -> Vec<Vec<String>> {
    rows.resize(range.rows() as usize, Vec::new());
    for row in rows.iter_mut() {
        row.resize(range.columns() as usize, String::new());
    }
    rows
}

fn check_shape(range: &CellRange, values: &[Vec<String>]) -> Result<(), StoreError> {
    let rows_ok = values.len() == range.rows() as usize;
    let cols_ok = values.iter().all(|r| r.len() == range.columns() as usize);
    if rows_ok && cols_ok {
        Ok(())
    } else {
        Err(StoreError::Range(format!(
            "values do not fill {} exactly",
            range.a1()
        )))
    }
}

/// In-process grid; records every write it receives.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub rows: Vec<Vec<String>>,
    pub writes: Vec<CellRange>,
}

impl MemoryStore {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows,
            writes: Vec::new(),
        }
    }

    pub fn from_str_rows(rows: &[&[&str]]) -> Self {
        Self::new(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    /// Cell value by 1-based coordinates; empty when outside the grid.
    pub fn cell(&self, row: u32, column: u32) -> &str {
        let (Some(r), Some(c)) = ((row as usize).checked_sub(1), (column as usize).checked_sub(1))
        else {
            return "";
        };
        self.rows
            .get(r)
            .and_then(|cells| cells.get(c))
            .map(String::as_str)
            .unwrap_or("")
    }
}

impl RowStore for MemoryStore {
    fn read_all(&mut self) -> Result<Vec<Vec<String>>, StoreError> {
        Ok(self.rows.clone())
    }

    fn read_range(&mut self, range: &CellRange) -> Result<Vec<Vec<String>>, StoreError> {
        let block = (range.first_row..=range.last_row)
            .map(|r| {
                (range.first_column..=range.last_column)
                    .map(|c| self.cell(r, c).to_string())
                    .collect()
            })
            .collect();
        Ok(block)
    }

    fn write_range(&mut self, range: &CellRange, values: Vec<Vec<String>>) -> Result<(), StoreError> {
        check_shape(range, &values)?;
        let needed_rows = range.last_row as usize;
        if self.rows.len() < needed_rows {
            self.rows.resize(needed_rows, Vec::new());
        }
        for (offset, row_values) in values.into_iter().enumerate() {
            let row = &mut self.rows[range.first_row as usize - 1 + offset];
            if row.len() < range.last_column as usize {
                row.resize(range.last_column as usize, String::new());
            }
            for (c, value) in row_values.into_iter().enumerate() {
                row[range.first_column as usize - 1 + c] = value;
            }
        }
        self.writes.push(*range);
        Ok(())
    }
}

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValueRangeBody<'a> {
    range: &'a str,
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

/// One worksheet of a Google spreadsheet, accessed with a bearer token.
pub struct SheetsStore {
    client: reqwest::blocking::Client,
    spreadsheet_id: String,
    sheet_name: String,
    access_token: String,
}

impl SheetsStore {
    pub fn new(spreadsheet_id: &str, sheet_name: &str, access_token: &str) -> Result<Self, StoreError> {
        if access_token.is_empty() {
            return Err(StoreError::MissingToken);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            spreadsheet_id: spreadsheet_id.to_string(),
            sheet_name: sheet_name.to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn qualified(&self, a1: Option<&str>) -> String {
        let sheet = format!("'{}'", self.sheet_name.replace('\'', "''"));
        match a1 {
            Some(a1) => format!("{sheet}!{a1}"),
            None => sheet,
        }
    }

    fn values_url(&self, range: &str) -> Result<reqwest::Url, StoreError> {
        let mut url = reqwest::Url::parse(SHEETS_API)
            .map_err(|e| StoreError::Range(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Range("base URL cannot take segments".to_string()))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.values_url(range)?;
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()?;
        let parsed: ValueRange = Self::check(response)?
            .json()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(parsed.values)
    }
}

impl RowStore for SheetsStore {
    fn read_all(&mut self) -> Result<Vec<Vec<String>>, StoreError> {
        let rows = self.get_values(&self.qualified(None))?;
        info!("Read {} rows from sheet '{}'", rows.len(), self.sheet_name);
        Ok(rows)
    }

    fn read_range(&mut self, range: &CellRange) -> Result<Vec<Vec<String>>, StoreError> {
        let rows = self.get_values(&self.qualified(Some(&range.a1())))?;
        Ok(pad_block(rows, range))
    }

    fn write_range(&mut self, range: &CellRange, values: Vec<Vec<String>>) -> Result<(), StoreError> {
        check_shape(range, &values)?;
        let qualified = self.qualified(Some(&range.a1()));
        let mut url = self.values_url(&qualified)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let body = ValueRangeBody {
            range: &qualified,
            major_dimension: "ROWS",
            values: &values,
        };
        debug!("PUT {} ({} rows)", qualified, values.len());
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()?;
        Self::check(response)?;
        Ok(())
    }
}
