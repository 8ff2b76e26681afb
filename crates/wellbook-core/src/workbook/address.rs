//! A1-style cell and column addressing.
//!
//! Rows and columns are 1-based, matching what a spreadsheet user sees:
//! `A1` is `(row 1, col 1)`, `AF12` is `(row 12, col 32)`. Addresses order
//! row-major so a sheet's sparse map iterates top-to-bottom, left-to-right.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use snafu::prelude::*;

/// Errors returned when parsing a column or cell address.
#[derive(Debug, Clone, Snafu, PartialEq, Eq)]
pub enum ParseCellAddrError {
    /// Input was empty or whitespace.
    #[snafu(display("cell address is empty"))]
    Empty,

    /// Input did not have the `<letters><digits>` (or `<letters>`) shape.
    #[snafu(display("malformed address '{text}'"))]
    Malformed {
        /// The rejected input.
        text: String,
    },

    /// Row or column was zero or too large to represent.
    #[snafu(display("address '{text}' is out of range"))]
    OutOfRange {
        /// The rejected input.
        text: String,
    },
}

/// Convert a 1-based column index to its letters (`1` -> `A`, `27` -> `AA`).
///
/// Index 0 has no letters and yields an empty string.
pub fn column_letters(mut col: u32) -> String {
    let mut out = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        out.push(b'A' + rem);
        col = (col - 1) / 26;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Convert column letters to a 1-based column index (case-insensitive).
///
/// Returns `None` for empty input, non-letters, or overflow.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() {
        return None;
    }
    letters.bytes().try_fold(0u32, |acc, b| {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        let digit = u32::from(b.to_ascii_uppercase() - b'A') + 1;
        acc.checked_mul(26)?.checked_add(digit)
    })
}

/// A column reference that (de)serializes as its letters.
///
/// Used by configuration so rosters and source layouts read like the
/// spreadsheet they describe (`"AE"` rather than `31`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Column(u32);

impl Column {
    /// Wrap a 1-based column index.
    pub const fn new(index: u32) -> Self {
        Column(index)
    }

    /// The 1-based column index.
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&column_letters(self.0))
    }
}

impl FromStr for Column {
    type Err = ParseCellAddrError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        ensure!(!text.is_empty(), EmptySnafu);
        ensure!(
            text.bytes().all(|b| b.is_ascii_alphabetic()),
            MalformedSnafu { text }
        );
        column_index(text)
            .map(Column)
            .context(OutOfRangeSnafu { text })
    }
}

impl Serialize for Column {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Column {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// A single cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddr {
    /// 1-based row number.
    pub row: u32,
    /// 1-based column index.
    pub col: u32,
}

impl CellAddr {
    /// Build an address from 1-based row and column.
    pub const fn new(row: u32, col: u32) -> Self {
        CellAddr { row, col }
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

impl FromStr for CellAddr {
    type Err = ParseCellAddrError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let text = input.trim();
        ensure!(!text.is_empty(), EmptySnafu);

        let split = text
            .find(|c: char| c.is_ascii_digit())
            .context(MalformedSnafu { text })?;
        let (letters, digits) = text.split_at(split);

        ensure!(
            !letters.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
            MalformedSnafu { text }
        );

        let col: Column = letters.parse()?;
        let row: u32 = digits
            .parse()
            .ok()
            .filter(|r| *r > 0)
            .context(OutOfRangeSnafu { text })?;

        Ok(CellAddr::new(row, col.index()))
    }
}

impl Serialize for CellAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
