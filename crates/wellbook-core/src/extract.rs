//! Typed well records from dated source documents.
//!
//! A source document is a [`Workbook`] decoded from the report spreadsheet
//! (or its JSON encoding). Each extractor reads a fixed region of one named sheet, keeps rows
//! whose name passes its [`WellCategory`], and yields `(EntityId, reading)`
//! pairs ordered by well number.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    sync::OnceLock,
};

use chrono::NaiveDate;
use log::{debug, error};
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    upsert::{EntityId, InjectionReading, ProductionReading, WellCategory},
    workbook::{Column, Sheet, TEXT_DATE_FORMAT, Workbook},
};

/// Errors raised while reading a source document.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExtractError {
    /// The document has no sheet with the expected name.
    #[snafu(display("Source document has no sheet named {sheet:?}"))]
    MissingSheet {
        /// Sheet that was looked up.
        sheet: String,
    },
}

/// Find the first `dd.mm.yyyy` token in a file name and parse it.
///
/// Returns `None` when there is no such token or when the first one is not a
/// valid calendar date.
pub fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let token = date_token()?.find(name)?;
    NaiveDate::parse_from_str(token.as_str(), TEXT_DATE_FORMAT).ok()
}

fn date_token() -> Option<&'static Regex> {
    static DATE_TOKEN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    match DATE_TOKEN.get_or_init(|| Regex::new(r"[0-9]{2}\.[0-9]{2}\.[0-9]{4}")) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("date token pattern failed to compile: {e}");
            None
        }
    }
}

/// Turns a source document into typed records for one store.
pub trait Extractor {
    /// Reading type produced per well.
    type Reading;

    /// Extract every eligible record, ordered by well number.
    fn extract(&self, source: &Workbook) -> Result<Vec<(EntityId, Self::Reading)>, ExtractError>;
}

fn source_sheet<'a>(source: &'a Workbook, name: &str) -> Result<&'a Sheet, ExtractError> {
    source
        .sheet(name)
        .context(MissingSheetSnafu { sheet: name })
}

fn well_at(sheet: &Sheet, category: &WellCategory, row: u32, col: Column) -> Option<EntityId> {
    let raw = sheet.text(row, col.index())?;
    let id = category.parse(raw);
    if id.is_none() {
        debug!("skipping {raw:?} at row {row}: not an eligible well");
    }
    id
}

/// Region of the production report holding per-well readings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionLayout {
    /// Sheet holding the report.
    pub sheet: String,
    /// Header row; data starts on the row below.
    pub header_row: u32,
    /// Maximum number of data rows read below the header.
    pub max_rows: u32,
    /// Well name column.
    pub name: Column,
    /// Oil volume column.
    pub oil: Column,
    /// Water volume column.
    pub water: Column,
    /// Gas volume column.
    pub gas: Column,
    /// Pump speed column.
    pub rpm: Column,
    /// Operating status column, when the report carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Column>,
}

impl Default for ProductionLayout {
    fn default() -> Self {
        ProductionLayout {
            sheet: "CPU_Production_EN".to_string(),
            header_row: 8,
            max_rows: 300,
            name: Column::new(14),
            oil: Column::new(16),
            water: Column::new(18),
            gas: Column::new(19),
            rpm: Column::new(20),
            status: None,
        }
    }
}

/// Reads production records for the column-major store.
///
/// When a well appears more than once, the last row wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionExtractor {
    /// Wells accepted by this store.
    pub category: WellCategory,
    /// Where the readings live in the source.
    pub layout: ProductionLayout,
}

impl Default for ProductionExtractor {
    fn default() -> Self {
        ProductionExtractor {
            category: WellCategory::production(),
            layout: ProductionLayout::default(),
        }
    }
}

impl Extractor for ProductionExtractor {
    type Reading = ProductionReading;

    fn extract(&self, source: &Workbook) -> Result<Vec<(EntityId, ProductionReading)>, ExtractError> {
        let layout = &self.layout;
        let sheet = source_sheet(source, &layout.sheet)?;
        let first = layout.header_row.saturating_add(1);
        let last = layout.header_row.saturating_add(layout.max_rows);

        let mut records = BTreeMap::new();
        for row in first..=last.min(sheet.max_row()) {
            let Some(id) = well_at(sheet, &self.category, row, layout.name) else {
                continue;
            };
            let number = |col: Column| sheet.number(row, col.index());
            let reading = ProductionReading {
                status: layout
                    .status
                    .and_then(|col| sheet.text(row, col.index()))
                    .map(str::to_string),
                rpm: number(layout.rpm),
                oil: number(layout.oil),
                water: number(layout.water),
                gas: number(layout.gas),
            };
            records.insert(id, reading);
        }

        debug!("extracted {} production records", records.len());
        Ok(records.into_iter().collect())
    }
}

/// Region of the daily report holding injection readings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionLayout {
    /// Sheet holding the report.
    pub sheet: String,
    /// First row read (inclusive).
    pub first_row: u32,
    /// Last row read (inclusive).
    pub last_row: u32,
    /// Well name column.
    pub name: Column,
    /// Online hours column.
    pub online_hours: Column,
    /// Tubing head pressure column.
    pub pressure: Column,
    /// Injected volume column.
    pub injection_volume: Column,
}

impl Default for InjectionLayout {
    fn default() -> Self {
        InjectionLayout {
            sheet: "Daily_Production_EN_CB".to_string(),
            first_row: 160,
            last_row: 169,
            name: Column::new(4),
            online_hours: Column::new(6),
            pressure: Column::new(8),
            injection_volume: Column::new(31),
        }
    }
}

/// Reads injection records for the row-major store.
///
/// When a well appears more than once, the first row wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionExtractor {
    /// Wells accepted by this store.
    pub category: WellCategory,
    /// Where the readings live in the source.
    pub layout: InjectionLayout,
}

impl Default for InjectionExtractor {
    fn default() -> Self {
        InjectionExtractor {
            category: WellCategory::injection(),
            layout: InjectionLayout::default(),
        }
    }
}

impl Extractor for InjectionExtractor {
    type Reading = InjectionReading;

    fn extract(&self, source: &Workbook) -> Result<Vec<(EntityId, InjectionReading)>, ExtractError> {
        let layout = &self.layout;
        let sheet = source_sheet(source, &layout.sheet)?;

        let mut records = BTreeMap::new();
        for row in layout.first_row..=layout.last_row.min(sheet.max_row()) {
            let Some(id) = well_at(sheet, &self.category, row, layout.name) else {
                continue;
            };
            if let Entry::Vacant(slot) = records.entry(id) {
                let number = |col: Column| sheet.number(row, col.index());
                slot.insert(InjectionReading {
                    online_hours: number(layout.online_hours),
                    pressure: number(layout.pressure),
                    injection_volume: number(layout.injection_volume),
                });
            }
        }

        debug!("extracted {} injection records", records.len());
        Ok(records.into_iter().collect())
    }
}
