//! Cell values and date normalization.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Text format used for dates typed into header cells by hand.
pub const TEXT_DATE_FORMAT: &str = "%d.%m.%Y";

/// Value held by a non-empty cell.
///
/// Empty cells are not represented; a sheet simply has no entry for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellValue {
    /// A numeric literal.
    Number(f64),
    /// Free text.
    Text(String),
    /// A native date/time value.
    Date(NaiveDateTime),
    /// Formula text including the leading `=`.
    Formula(String),
}

impl CellValue {
    /// Text cell from anything string-like.
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    /// Native date cell at midnight of `date`.
    pub fn date(date: NaiveDate) -> Self {
        CellValue::Date(date.and_time(NaiveTime::MIN))
    }

    /// Numeric content, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text content, if this is a text cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Formula text, if this is a formula cell.
    pub fn as_formula(&self) -> Option<&str> {
        match self {
            CellValue::Formula(f) => Some(f),
            _ => None,
        }
    }
}

/// Normalize a header cell to a calendar day.
///
/// Native dates drop their time of day; text is accepted only in
/// `dd.mm.yyyy` form (surrounding whitespace ignored). Anything else is not a
/// date. Every date comparison against stored headers goes through here.
pub fn cell_date(value: &CellValue) -> Option<NaiveDate> {
    match value {
        CellValue::Date(dt) => Some(dt.date()),
        CellValue::Text(s) => NaiveDate::parse_from_str(s.trim(), TEXT_DATE_FORMAT).ok(),
        CellValue::Number(_) | CellValue::Formula(_) => None,
    }
}
