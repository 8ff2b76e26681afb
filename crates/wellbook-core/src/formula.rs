//! Derived-ratio formulas and textual formula relocation.
//!
//! Two concerns live here:
//!
//! - Synthesizing the live formulas for the derived fields of a production
//!   block (gas-oil ratio and water cut). They are always written as formulas
//!   over sibling cells, never as precomputed numbers, so later manual edits
//!   to the inputs recalculate.
//! - Relocating formulas when a dated row is cloned from a template row in a
//!   row-major sheet.
//!
//! ## Zero guard
//!
//! Both ratios guard on the *numerator* being zero:
//!
//! ```text
//! GOR = IF(gas = 0, 0, gas / oil)
//! WC% = IF(water = 0, 0, water / fluid * 100)
//! ```
//!
//! A zero denominator with a non-zero numerator is therefore not guarded and
//! surfaces as a division error in the workbook.
//!
//! ## Relocation is textual
//!
//! [`relocate_formula`] does not parse references. It rewrites every match of
//! `[0-9]+` whose value lies in a small window around the template
//! row, shifting it by the template-to-target distance. A numeric literal that
//! happens to fall inside the window (`*8`, `'Sheet2'!`, the `0` of an `IF`
//! guard near the top of a sheet) is shifted too.

use std::sync::OnceLock;

use log::error;
use regex::{Captures, Regex};

use crate::{
    date_axis::slot,
    workbook::{CellAddr, CellValue, Sheet},
};

/// Rows before the template row whose numbers are relocated.
pub const RELOCATION_WINDOW_BEFORE: u32 = 5;
/// Rows from the template row onward (exclusive) whose numbers are relocated.
pub const RELOCATION_WINDOW_AFTER: u32 = 5;

/// A derived field of a production block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedRatio {
    /// Gas divided by oil.
    GasOilRatio,
    /// Water divided by fluid, as a percentage.
    WaterCut,
}

impl DerivedRatio {
    /// Both derived fields, in block order.
    pub const ALL: [DerivedRatio; 2] = [DerivedRatio::GasOilRatio, DerivedRatio::WaterCut];

    /// Block offset of the cell holding this formula.
    pub const fn slot(self) -> u32 {
        match self {
            DerivedRatio::GasOilRatio => slot::GOR,
            DerivedRatio::WaterCut => slot::WATER_CUT,
        }
    }

    const fn numerator(self) -> u32 {
        match self {
            DerivedRatio::GasOilRatio => slot::GAS,
            DerivedRatio::WaterCut => slot::WATER,
        }
    }

    const fn denominator(self) -> u32 {
        match self {
            DerivedRatio::GasOilRatio => slot::OIL,
            DerivedRatio::WaterCut => slot::FLUID,
        }
    }

    const fn scale(self) -> Option<u32> {
        match self {
            DerivedRatio::GasOilRatio => None,
            DerivedRatio::WaterCut => Some(100),
        }
    }

    /// Formula text for `row` of the block starting at `block_col`.
    pub fn formula(self, row: u32, block_col: u32) -> String {
        let num = CellAddr::new(row, block_col + self.numerator());
        let den = CellAddr::new(row, block_col + self.denominator());
        match self.scale() {
            None => format!("=IF({num}=0,0,{num}/{den})"),
            Some(scale) => format!("=IF({num}=0,0,{num}/{den}*{scale})"),
        }
    }

    /// Write this field's formula into its slot.
    pub fn write(self, sheet: &mut Sheet, row: u32, block_col: u32) {
        sheet.set(
            row,
            block_col + self.slot(),
            CellValue::Formula(self.formula(row, block_col)),
        );
    }

    /// Evaluate the guarded ratio against the sheet's current inputs.
    ///
    /// Blank inputs count as zero. Returns `None` where a spreadsheet would
    /// show an error: a non-numeric input, or a zero denominator under a
    /// non-zero numerator.
    pub fn evaluate(self, sheet: &Sheet, row: u32, block_col: u32) -> Option<f64> {
        let num = operand(sheet, row, block_col + self.numerator())?;
        if num == 0.0 {
            return Some(0.0);
        }
        let den = operand(sheet, row, block_col + self.denominator())?;
        if den == 0.0 {
            return None;
        }
        let ratio = num / den;
        Some(match self.scale() {
            None => ratio,
            Some(scale) => ratio * f64::from(scale),
        })
    }
}

fn operand(sheet: &Sheet, row: u32, col: u32) -> Option<f64> {
    match sheet.cell(row, col) {
        None => Some(0.0),
        Some(value) => value.as_number(),
    }
}

/// Write both derived-ratio formulas for `row` of the block at `block_col`.
pub fn write_derived(sheet: &mut Sheet, row: u32, block_col: u32) {
    for ratio in DerivedRatio::ALL {
        ratio.write(sheet, row, block_col);
    }
}

/// Shift row-number tokens in `formula` from `template_row` to `target_row`.
///
/// Every maximal run of ASCII digits whose value `r` satisfies
/// `template_row - 5 <= r < template_row + 5` becomes `r + delta`; other runs
/// are copied unchanged. Each run is rewritten at most once, so shifted values
/// are never shifted again.
pub fn relocate_formula(formula: &str, template_row: u32, target_row: u32) -> String {
    let Some(digit_run) = digit_run() else {
        return formula.to_string();
    };
    let lo = u64::from(template_row.saturating_sub(RELOCATION_WINDOW_BEFORE));
    let hi = u64::from(template_row) + u64::from(RELOCATION_WINDOW_AFTER);
    let delta = i64::from(target_row) - i64::from(template_row);

    digit_run
        .replace_all(formula, |caps: &Captures<'_>| {
            let digits = &caps[0];
            match digits.parse::<u64>() {
                // Leading zeros are not row numbers.
                Ok(value) if (lo..hi).contains(&value) && value.to_string() == digits => {
                    // Window bounds fit in i64.
                    (value as i64 + delta).to_string()
                }
                _ => digits.to_string(),
            }
        })
        .into_owned()
}

fn digit_run() -> Option<&'static Regex> {
    static DIGIT_RUN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    match DIGIT_RUN.get_or_init(|| Regex::new("[0-9]+")) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("digit run pattern failed to compile: {e}");
            None
        }
    }
}

/// Copy every formula of `template_row` into `target_row`, relocated.
///
/// Non-formula cells of the template are not copied. Returns the number of
/// formulas written.
pub fn clone_row_formulas(sheet: &mut Sheet, template_row: u32, target_row: u32) -> usize {
    let formulas: Vec<(u32, String)> = sheet
        .row_cells(template_row)
        .filter_map(|(col, v)| v.as_formula().map(|f| (col, f.to_string())))
        .collect();

    for (col, formula) in &formulas {
        let relocated = relocate_formula(formula, template_row, target_row);
        sheet.set(target_row, *col, CellValue::Formula(relocated));
    }
    formulas.len()
}
