//! Reconciling extracted well records against a resolved time block.
//!
//! This module owns entity identity and the write path for both layouts:
//! - validating well names against a [`WellCategory`] (prefix + number range),
//! - the column-major upsert: update rows already keyed by the well in this
//!   block, then place the remaining wells (reusing the row the well occupies
//!   in other blocks of the sheet when that row is free here, otherwise
//!   appending after the last used row),
//! - the row-major write through an injected [`Roster`] of base columns.
//!
//! Every record targets a disjoint set of cells, and leftovers are placed in
//! well-number order, so the result does not depend on input order.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    date_axis::{FIRST_ENTITY_ROW, LABEL_ROW, column_blocks, slot},
    formula::write_derived,
    workbook::{CellValue, Sheet},
};

/// A validated well identifier.
///
/// Ordered by well number, then by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    number: u32,
    name: String,
}

impl EntityId {
    /// Well number parsed from the name.
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Trimmed well name as written in the grid.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Naming pattern and number range that make a well eligible for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellCategory {
    /// Literal prefix before the well number.
    pub prefix: String,
    /// Lowest accepted number (inclusive).
    pub min: u32,
    /// Highest accepted number (inclusive).
    pub max: u32,
}

impl WellCategory {
    /// Production wells: `well_1` ..= `well_91`.
    pub fn production() -> Self {
        WellCategory {
            prefix: "well_".to_string(),
            min: 1,
            max: 91,
        }
    }

    /// Injection wells: `well_92` ..= `well_101`.
    pub fn injection() -> Self {
        WellCategory {
            prefix: "well_".to_string(),
            min: 92,
            max: 101,
        }
    }

    /// Validate a raw name, returning its identity when eligible.
    ///
    /// Surrounding whitespace is ignored; the remainder must be the prefix
    /// followed only by ASCII digits, with a number inside `min..=max`.
    pub fn parse(&self, raw: &str) -> Option<EntityId> {
        let name = raw.trim();
        let digits = name.strip_prefix(self.prefix.as_str())?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u32 = digits.parse().ok()?;
        (self.min..=self.max)
            .contains(&number)
            .then(|| EntityId {
                number,
                name: name.to_string(),
            })
    }
}

/// One production reading (column-major store).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionReading {
    /// Operating status; `None` leaves the grid's status untouched.
    pub status: Option<String>,
    /// Pump speed.
    pub rpm: Option<f64>,
    /// Oil volume, m3.
    pub oil: Option<f64>,
    /// Water volume, m3.
    pub water: Option<f64>,
    /// Gas volume, m3.
    pub gas: Option<f64>,
}

impl ProductionReading {
    /// Oil + water, with a missing reading counting as zero.
    pub fn fluid(&self) -> f64 {
        self.oil.unwrap_or(0.0) + self.water.unwrap_or(0.0)
    }
}

/// One injection reading (row-major store).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectionReading {
    /// Hours online during the day.
    pub online_hours: Option<f64>,
    /// Tubing head pressure.
    pub pressure: Option<f64>,
    /// Injected water volume.
    pub injection_volume: Option<f64>,
}

/// Fixed well -> base column mapping for the row-major store.
///
/// Each well owns three adjacent columns starting at its base column:
/// online hours, pressure, injection volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    columns: BTreeMap<EntityId, u32>,
}

impl Roster {
    /// Empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a well's base column, returning any previous registration.
    pub fn register(&mut self, id: EntityId, base_col: u32) -> Option<u32> {
        self.columns.insert(id, base_col)
    }

    /// Base column for a well, if registered.
    pub fn base_column(&self, id: &EntityId) -> Option<u32> {
        self.columns.get(id).copied()
    }

    /// Number of registered wells.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when no well is registered.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Counts of what an upsert did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Records written over an existing slot.
    pub updated: usize,
    /// Records that got a new slot in this block.
    pub appended: usize,
    /// Records with no slot in this store.
    pub dropped: usize,
}

/// Upsert production records into the column-major block at `block_col`.
///
/// Each record is written at most once. Wells already named in this block's
/// identity column are updated in place; the rest get a new slot.
pub fn upsert_column_block<I>(sheet: &mut Sheet, block_col: u32, records: I) -> UpsertOutcome
where
    I: IntoIterator<Item = (EntityId, ProductionReading)>,
{
    let identity_col = block_col + slot::IDENTITY;
    let mut pending: HashMap<String, (EntityId, ProductionReading)> = records
        .into_iter()
        .map(|(id, reading)| (id.name.clone(), (id, reading)))
        .collect();
    let mut outcome = UpsertOutcome::default();

    for row in FIRST_ENTITY_ROW..=sheet.max_row() {
        if pending.is_empty() {
            break;
        }
        let Some(name) = sheet.text(row, identity_col) else {
            continue;
        };
        if let Some((id, reading)) = pending.remove(name.trim()) {
            write_production(sheet, row, block_col, &reading);
            debug!("updated {id} at row {row}, block column {block_col}");
            outcome.updated += 1;
        }
    }

    let mut remaining: Vec<(EntityId, ProductionReading)> = pending.into_values().collect();
    remaining.sort_by(|a, b| a.0.cmp(&b.0));

    for (id, reading) in remaining {
        let row = match roster_row(sheet, block_col, &id) {
            Some(row) => row,
            None => sheet.max_row().max(LABEL_ROW) + 1,
        };
        sheet.set(row, identity_col, CellValue::text(id.name()));
        write_production(sheet, row, block_col, &reading);
        debug!("appended {id} at row {row}, block column {block_col}");
        outcome.appended += 1;
    }

    outcome
}

/// Row already used by `id` in another block whose identity cell here is free.
fn roster_row(sheet: &Sheet, block_col: u32, id: &EntityId) -> Option<u32> {
    let identity_col = block_col + slot::IDENTITY;
    let others: Vec<u32> = column_blocks(sheet).filter(|&c| c != block_col).collect();
    if others.is_empty() {
        return None;
    }

    (FIRST_ENTITY_ROW..=sheet.max_row()).find(|&row| {
        sheet.cell(row, identity_col).is_none()
            && others.iter().any(|&col| {
                sheet
                    .text(row, col + slot::IDENTITY)
                    .is_some_and(|n| n.trim() == id.name())
            })
    })
}

fn write_production(sheet: &mut Sheet, row: u32, block_col: u32, reading: &ProductionReading) {
    if let Some(status) = &reading.status {
        sheet.set(row, block_col + slot::STATUS, CellValue::text(status.as_str()));
    }

    let values = [
        (slot::RPM, reading.rpm),
        (slot::OIL, reading.oil),
        (slot::FLUID, Some(reading.fluid())),
        (slot::WATER, reading.water),
        (slot::GAS, reading.gas),
    ];
    for (offset, value) in values {
        sheet.set_opt(row, block_col + offset, value.map(CellValue::Number));
    }

    write_derived(sheet, row, block_col);
}

/// Write injection records into `row` through the roster.
///
/// Wells missing from the roster are dropped without error.
pub fn upsert_row_block<I>(sheet: &mut Sheet, row: u32, roster: &Roster, records: I) -> UpsertOutcome
where
    I: IntoIterator<Item = (EntityId, InjectionReading)>,
{
    let mut outcome = UpsertOutcome::default();

    for (id, reading) in records {
        let Some(base) = roster.base_column(&id) else {
            debug!("{id} is not on the roster; dropped");
            outcome.dropped += 1;
            continue;
        };

        let values = [
            reading.online_hours,
            reading.pressure,
            reading.injection_volume,
        ];
        for (offset, value) in (0u32..).zip(values) {
            sheet.set_opt(row, base + offset, value.map(CellValue::Number));
        }
        outcome.updated += 1;
    }

    outcome
}
