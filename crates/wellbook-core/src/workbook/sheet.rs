//! Sparse named sheet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{CellAddr, CellValue};

/// One named grid of cells.
///
/// Storage is sparse and ordered row-major, so `max_row` is the row of the
/// last entry and serialization is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    name: String,
    #[serde(default)]
    cells: BTreeMap<CellAddr, CellValue>,
}

impl Sheet {
    /// Create an empty sheet.
    pub fn new(name: impl Into<String>) -> Self {
        Sheet {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    /// Sheet name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value at `(row, col)`, if any.
    pub fn cell(&self, row: u32, col: u32) -> Option<&CellValue> {
        self.cells.get(&CellAddr::new(row, col))
    }

    /// Numeric value at `(row, col)`, if the cell holds a number.
    pub fn number(&self, row: u32, col: u32) -> Option<f64> {
        self.cell(row, col).and_then(CellValue::as_number)
    }

    /// Text value at `(row, col)`, if the cell holds text.
    pub fn text(&self, row: u32, col: u32) -> Option<&str> {
        self.cell(row, col).and_then(CellValue::as_text)
    }

    /// Overwrite a cell.
    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        self.cells.insert(CellAddr::new(row, col), value);
    }

    /// Overwrite a cell, or clear it when `value` is `None`.
    pub fn set_opt(&mut self, row: u32, col: u32, value: Option<CellValue>) {
        match value {
            Some(v) => self.set(row, col, v),
            None => self.clear(row, col),
        }
    }

    /// Remove any value at `(row, col)`.
    pub fn clear(&mut self, row: u32, col: u32) {
        self.cells.remove(&CellAddr::new(row, col));
    }

    /// Highest row holding a value, or 0 for an empty sheet.
    pub fn max_row(&self) -> u32 {
        self.cells.keys().next_back().map_or(0, |a| a.row)
    }

    /// Highest column holding a value, or 0 for an empty sheet.
    pub fn max_col(&self) -> u32 {
        self.cells.keys().map(|a| a.col).max().unwrap_or(0)
    }

    /// True when any cell in `row` holds a value.
    pub fn row_has_values(&self, row: u32) -> bool {
        self.row_cells(row).next().is_some()
    }

    /// Cells of one row as `(col, value)`, left to right.
    pub fn row_cells(&self, row: u32) -> impl Iterator<Item = (u32, &CellValue)> {
        self.cells
            .range(CellAddr::new(row, 0)..=CellAddr::new(row, u32::MAX))
            .map(|(addr, v)| (addr.col, v))
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (CellAddr, &CellValue)> {
        self.cells.iter().map(|(a, v)| (*a, v))
    }

    /// Insert an empty row at `at`, moving every cell at or below it down one.
    ///
    /// Only positions move; formula text is left as written.
    pub fn insert_row(&mut self, at: u32) {
        let moved = self.cells.split_off(&CellAddr::new(at, 0));
        self.cells.extend(
            moved
                .into_iter()
                .map(|(addr, v)| (CellAddr::new(addr.row + 1, addr.col), v)),
        );
    }
}
