//! Tabular payloads: one `Table`, or a keyed set of tables.
//!
//! A `Table` is rows × named columns with JSON cell values. Dataset
//! payloads are always one of two explicit shapes so consumers branch on
//! the variant instead of probing the value at runtime.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Column used by the date-range post-filter.
pub const DATE_COLUMN: &str = "date";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("row {row} has {actual} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("column `{0}` not found")]
    MissingColumn(String),

    #[error("row {row}: `{column}` value `{value}` is not a date (expected YYYY-MM-DD, YYYY-MM or YYYY)")]
    InvalidDate {
        row: usize,
        column: String,
        value: String,
    },
}

/// A rectangular result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawTable> for Table {
    type Error = TableError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        Table::new(raw.columns, raw.rows)
    }
}

impl Table {
    /// Build a table, checking column uniqueness and row width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let mut table = Self::empty(columns)?;
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// A table with columns and no rows.
    pub fn empty(columns: Vec<String>) -> Result<Self, TableError> {
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].contains(column) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Keep rows whose `column` date lies inside `range`.
    ///
    /// Cells are read as ISO-8601 strings (`YYYY-MM-DD`, optionally followed
    /// by a time part). Null cells are dropped when the range is bounded.
    pub fn filter_date_range(&self, column: &str, range: &DateRange) -> Result<Table, TableError> {
        if range.is_unbounded() {
            return Ok(self.clone());
        }
        let index = self
            .column_index(column)
            .ok_or_else(|| TableError::MissingColumn(column.to_string()))?;

        let mut rows = Vec::new();
        for (row_no, row) in self.rows.iter().enumerate() {
            let date = match &row[index] {
                Value::Null => continue,
                Value::String(text) => parse_date_cell(text).ok_or_else(|| {
                    TableError::InvalidDate {
                        row: row_no,
                        column: column.to_string(),
                        value: text.clone(),
                    }
                })?,
                other => {
                    return Err(TableError::InvalidDate {
                        row: row_no,
                        column: column.to_string(),
                        value: other.to_string(),
                    });
                }
            };
            if range.contains(date) {
                rows.push(row.clone());
            }
        }

        Ok(Table {
            columns: self.columns.clone(),
            rows,
        })
    }
}

/// Day cells (optionally followed by a time), or monthly and yearly
/// periods, which compare as their first day.
fn parse_date_cell(text: &str) -> Option<NaiveDate> {
    if let Some(head) = text.get(..10)
        && let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d")
    {
        return Some(date);
    }
    match text.len() {
        7 => NaiveDate::parse_from_str(&format!("{text}-01"), "%Y-%m-%d").ok(),
        4 if text.bytes().all(|b| b.is_ascii_digit()) => {
            NaiveDate::from_ymd_opt(text.parse().ok()?, 1, 1)
        }
        _ => None,
    }
}

/// Inclusive date bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }
}

/// Which payload variant a value is (or should be).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    Single,
    Multi,
}

impl PayloadShape {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Multi => "multi",
        }
    }
}

impl Display for PayloadShape {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full result of fetching one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DatasetPayload {
    Single(Table),
    Multi(BTreeMap<String, Table>),
}

impl DatasetPayload {
    pub fn shape(&self) -> PayloadShape {
        match self {
            Self::Single(_) => PayloadShape::Single,
            Self::Multi(_) => PayloadShape::Multi,
        }
    }

    /// Table keys in a `Multi` payload (empty for `Single`).
    pub fn table_keys(&self) -> Vec<String> {
        match self {
            Self::Single(_) => Vec::new(),
            Self::Multi(tables) => tables.keys().cloned().collect(),
        }
    }

    /// Total rows across every table.
    pub fn row_count(&self) -> usize {
        match self {
            Self::Single(table) => table.len(),
            Self::Multi(tables) => tables.values().map(Table::len).sum(),
        }
    }
}
