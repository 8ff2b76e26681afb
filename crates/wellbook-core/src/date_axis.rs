//! Mapping dates onto structural slots of the master store.
//!
//! A sheet holds an ordered sequence of time blocks, one per calendar day.
//! Two layouts are supported:
//!
//! - **Column-major** (production): each date owns a block of
//!   [`BLOCK_STRIDE`] columns. Row 1 carries the date at the block's first
//!   column, row 2 carries the metric labels, entity rows start at row 3.
//!   Blocks are laid out left to right from [`ORIGIN_COL`] with no gaps.
//! - **Row-major** (injection): each date owns one row. Column A carries the
//!   date; dated rows start at [`FIRST_DATE_ROW`] and new rows are inserted
//!   directly after the last dated row, cloning its formulas.
//!
//! Sections (sheets) are chosen from the date: a month name for the
//! column-major store, a year for the row-major store.
//!
//! Lookups compare calendar days only, through [`cell_date`], so a header
//! stored as a native date and one typed as `dd.mm.yyyy` text are the same
//! key. When several headers carry the same day the first one scanned wins.

use chrono::{Datelike, NaiveDate};

use crate::{
    formula::clone_row_formulas,
    workbook::{CellValue, Sheet, cell_date},
};

/// Row carrying block dates in the column-major layout.
pub const HEADER_ROW: u32 = 1;
/// Row carrying metric labels in the column-major layout.
pub const LABEL_ROW: u32 = 2;
/// First entity row in the column-major layout.
pub const FIRST_ENTITY_ROW: u32 = 3;
/// Column of the first block in the column-major layout.
pub const ORIGIN_COL: u32 = 1;
/// Width of one column-major block.
pub const BLOCK_STRIDE: u32 = 9;

/// Labels written under the date of a new column-major block.
pub const SCHEMA_LABELS: [&str; BLOCK_STRIDE as usize] = [
    "Well_name",
    "status",
    "RPM",
    "Oil, m3",
    "Fluid, m3",
    "Water, m3",
    "Gas, m3",
    "GOR, m3/m3",
    "WC, %",
];

/// Column carrying the date of each row in the row-major layout.
pub const DATE_KEY_COL: u32 = 1;
/// First dated row (and origin of an empty section) in the row-major layout.
pub const FIRST_DATE_ROW: u32 = 3;

/// Offsets of each metric inside a column-major block.
pub mod slot {
    /// Entity identity (well name).
    pub const IDENTITY: u32 = 0;
    /// Operating status, maintained by hand.
    pub const STATUS: u32 = 1;
    /// Pump speed.
    pub const RPM: u32 = 2;
    /// Oil volume.
    pub const OIL: u32 = 3;
    /// Oil + water.
    pub const FLUID: u32 = 4;
    /// Water volume.
    pub const WATER: u32 = 5;
    /// Gas volume.
    pub const GAS: u32 = 6;
    /// Gas-oil ratio formula.
    pub const GOR: u32 = 7;
    /// Water-cut percentage formula.
    pub const WATER_CUT: u32 = 8;
}

const MONTH_SECTIONS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Outcome of resolving a date to its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockResolution {
    /// First column (column-major) or row (row-major) of the block.
    pub offset: u32,
    /// True when the block did not exist and was created.
    pub created: bool,
    /// Formulas cloned from a template row while creating the block.
    pub cloned_formulas: usize,
}

impl BlockResolution {
    fn existing(offset: u32) -> Self {
        BlockResolution {
            offset,
            created: false,
            cloned_formulas: 0,
        }
    }
}

/// Section (sheet) name for the column-major store: the lowercase month.
pub fn month_section(date: NaiveDate) -> &'static str {
    MONTH_SECTIONS[date.month0() as usize]
}

/// Section (sheet) name for the row-major store: the four-digit year.
pub fn year_section(date: NaiveDate) -> String {
    format!("{:04}", date.year())
}

// ── Column-major ────────────────────────────────────────────────────────────

/// Find the block whose header carries `date`, scanning row 1 left to right.
pub fn find_column_block(sheet: &Sheet, date: NaiveDate) -> Option<u32> {
    (1..=sheet.max_col()).find(|&col| {
        sheet
            .cell(HEADER_ROW, col)
            .and_then(cell_date)
            .is_some_and(|d| d == date)
    })
}

/// Create a block for `date` at the first free stride position.
///
/// Walks header cells from [`ORIGIN_COL`] in steps of [`BLOCK_STRIDE`] until
/// an empty one is found, then writes the date and the metric labels.
pub fn create_column_block(sheet: &mut Sheet, date: NaiveDate) -> u32 {
    let mut col = ORIGIN_COL;
    while sheet.cell(HEADER_ROW, col).is_some() {
        col += BLOCK_STRIDE;
    }

    sheet.set(HEADER_ROW, col, CellValue::date(date));
    for (offset, label) in (0u32..).zip(SCHEMA_LABELS) {
        sheet.set(LABEL_ROW, col + offset, CellValue::text(label));
    }
    col
}

/// Return the block for `date`, creating it if absent.
pub fn resolve_column_block(sheet: &mut Sheet, date: NaiveDate) -> BlockResolution {
    match find_column_block(sheet, date) {
        Some(col) => BlockResolution::existing(col),
        None => BlockResolution {
            offset: create_column_block(sheet, date),
            created: true,
            cloned_formulas: 0,
        },
    }
}

/// First columns of every dated block, left to right.
pub fn column_blocks(sheet: &Sheet) -> impl Iterator<Item = u32> + '_ {
    let last = sheet.max_col();
    (ORIGIN_COL..=last)
        .step_by(BLOCK_STRIDE as usize)
        .filter(move |&col| sheet.cell(HEADER_ROW, col).and_then(cell_date).is_some())
}

// ── Row-major ───────────────────────────────────────────────────────────────

/// Find the row whose key cell carries `date`, scanning top to bottom.
pub fn find_row_block(sheet: &Sheet, date: NaiveDate) -> Option<u32> {
    (FIRST_DATE_ROW..=sheet.max_row()).find(|&row| {
        sheet
            .cell(row, DATE_KEY_COL)
            .and_then(cell_date)
            .is_some_and(|d| d == date)
    })
}

/// Last row whose key cell holds a date, if any.
pub fn last_date_row(sheet: &Sheet) -> Option<u32> {
    (FIRST_DATE_ROW..=sheet.max_row())
        .rev()
        .find(|&row| sheet.cell(row, DATE_KEY_COL).and_then(cell_date).is_some())
}

/// Return the row for `date`, inserting one if absent.
///
/// A new row is inserted directly after the last dated row, which serves as
/// the formula template; everything below shifts down one row. In a section
/// with no dated rows the date lands on [`FIRST_DATE_ROW`] and nothing is
/// cloned.
pub fn resolve_row_block(sheet: &mut Sheet, date: NaiveDate) -> BlockResolution {
    if let Some(row) = find_row_block(sheet, date) {
        return BlockResolution::existing(row);
    }

    let (target, template) = match last_date_row(sheet) {
        Some(last) => (last + 1, Some(last)),
        None => (FIRST_DATE_ROW, None),
    };

    if template.is_some() || sheet.row_has_values(target) {
        sheet.insert_row(target);
    }
    sheet.set(target, DATE_KEY_COL, CellValue::date(date));

    let cloned_formulas = match template {
        Some(template) => clone_row_formulas(sheet, template, target),
        None => 0,
    };

    BlockResolution {
        offset: target,
        created: true,
        cloned_formulas,
    }
}
