//! In-memory workbook model shared by the master store and source documents.
//!
//! A [`Workbook`] is an ordered list of named [`Sheet`]s; each sheet is a
//! sparse grid of [`CellValue`]s addressed by [`CellAddr`]. The same model is
//! used for the persistent master store and for dated source extracts, so the
//! resolver, upsert engine and propagator all operate on one owned handle that
//! the caller threads through each stage.
//!
//! ## Encoding
//!
//! Spreadsheet files (`.xlsx`, `.xlsm`) go through [`codec`]. Every other
//! path holds pretty-printed JSON with cells keyed by A1 address:
//!
//! ```json
//! {
//!   "sheets": [
//!     {
//!       "name": "march",
//!       "cells": {
//!         "A1": { "date": "2025-03-15T00:00:00" },
//!         "A2": { "text": "Well_name" },
//!         "H3": { "formula": "=IF(G3=0,0,G3/D3)" }
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Key order is deterministic, so two stores with equal contents encode to
//! identical bytes.

pub mod address;
pub mod cell;
pub mod codec;
pub mod sheet;

use serde::{Deserialize, Serialize};

pub use address::{CellAddr, Column, ParseCellAddrError, column_index, column_letters};
pub use cell::{CellValue, TEXT_DATE_FORMAT, cell_date};
pub use codec::{CodecError, DocumentFormat};
pub use sheet::Sheet;

/// Ordered collection of named sheets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

impl Workbook {
    /// Create an empty workbook.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sheet names in workbook order.
    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(Sheet::name)
    }

    /// Look up a sheet by exact name.
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name() == name)
    }

    /// Return the named sheet, appending an empty one if it does not exist.
    ///
    /// The flag is `true` when the sheet was created by this call.
    pub fn sheet_or_create(&mut self, name: &str) -> (&mut Sheet, bool) {
        match self.sheets.iter().position(|s| s.name() == name) {
            Some(idx) => (&mut self.sheets[idx], false),
            None => {
                self.sheets.push(Sheet::new(name));
                let last = self.sheets.len() - 1;
                (&mut self.sheets[last], true)
            }
        }
    }

    /// Encode as pretty JSON with a trailing newline.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Decode from JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
