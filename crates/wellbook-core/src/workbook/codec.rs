//! On-disk encodings of a [`Workbook`].
//!
//! Two encodings are supported, chosen by file extension:
//!
//! - `.xlsx` / `.xlsm`: Office Open XML spreadsheets, read and written with
//!   `umya-spreadsheet`. Numbers, text and formulas map one to one; numbers
//!   carrying a date number format read as [`CellValue::Date`] and dates are
//!   written back as serial numbers formatted `dd.mm.yyyy`.
//! - anything else: the pretty-printed JSON encoding described in the
//!   [module docs](super).
//!
//! Writing a spreadsheet over an existing file patches that file: sheets the
//! model does not hold, cell styles and the macro project are carried over,
//! and only cell contents of the model's sheets are replaced.

use std::{io::Cursor, path::Path};

use chrono::{Datelike, NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use snafu::prelude::*;
use umya_spreadsheet::{Cell, Spreadsheet, Worksheet};

use super::{CellValue, Sheet, Workbook};

/// Extensions decoded as spreadsheets, compared case-insensitively.
const SPREADSHEET_EXTENSIONS: [&str; 2] = ["xlsx", "xlsm"];

/// Number format applied to date cells written into a spreadsheet.
const DATE_NUMBER_FORMAT: &str = "dd.mm.yyyy";

/// Days from 0001-01-01 to 1899-12-30, the day before spreadsheet serial 1.
const SERIAL_EPOCH_DAYS_FROM_CE: i32 = 693_594;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Errors raised while decoding or encoding a workbook.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CodecError {
    /// Invalid JSON workbook.
    #[snafu(display("invalid JSON workbook: {source}"))]
    Json {
        /// Underlying serde error.
        source: serde_json::Error,
    },

    /// The spreadsheet could not be read or written.
    #[snafu(display("invalid spreadsheet: {source}"))]
    Spreadsheet {
        /// Underlying spreadsheet error.
        source: umya_spreadsheet::XlsxError,
    },

    /// A sheet could not be added to the spreadsheet.
    #[snafu(display("cannot add sheet {name:?}: {message}"))]
    AddSheet {
        /// Requested sheet name.
        name: String,
        /// Reason reported by the spreadsheet library.
        message: String,
    },
}

/// Encoding of a stored workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Pretty-printed JSON.
    Json,
    /// Office Open XML spreadsheet (`.xlsx`, `.xlsm`).
    Spreadsheet,
}

impl DocumentFormat {
    /// Encoding implied by the extension of `path`.
    pub fn from_path(path: &Path) -> Self {
        let is_spreadsheet = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SPREADSHEET_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if is_spreadsheet {
            DocumentFormat::Spreadsheet
        } else {
            DocumentFormat::Json
        }
    }
}

impl Workbook {
    /// Decode `bytes` stored in `format`.
    pub fn decode(format: DocumentFormat, bytes: &[u8]) -> Result<Self, CodecError> {
        match format {
            DocumentFormat::Json => Workbook::from_json_slice(bytes).context(JsonSnafu),
            DocumentFormat::Spreadsheet => Workbook::from_xlsx_slice(bytes),
        }
    }

    /// Encode in `format`.
    ///
    /// `base` is the current content of the file being replaced, if any. It is
    /// only used by the spreadsheet encoding.
    pub fn encode(&self, format: DocumentFormat, base: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
        match format {
            DocumentFormat::Json => self.to_json_bytes().context(JsonSnafu),
            DocumentFormat::Spreadsheet => self.to_xlsx_bytes(base),
        }
    }

    /// Decode an `.xlsx` / `.xlsm` document.
    pub fn from_xlsx_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let book = read_spreadsheet(bytes)?;
        let mut workbook = Workbook::new();
        for worksheet in book.get_sheet_collection() {
            let (sheet, _) = workbook.sheet_or_create(worksheet.get_name());
            for cell in worksheet.get_cell_collection() {
                let (row, col) = position(cell);
                if let Some(value) = read_cell(cell) {
                    sheet.set(row, col, value);
                }
            }
        }
        Ok(workbook)
    }

    /// Encode as an `.xlsx` document, patching `base` when given.
    pub fn to_xlsx_bytes(&self, base: Option<&[u8]>) -> Result<Vec<u8>, CodecError> {
        let mut book = match base {
            Some(bytes) => read_spreadsheet(bytes)?,
            None => umya_spreadsheet::new_file_empty_worksheet(),
        };

        for sheet in &self.sheets {
            write_sheet(worksheet_mut(&mut book, sheet.name())?, sheet);
        }

        let mut out = Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut out).context(SpreadsheetSnafu)?;
        Ok(out.into_inner())
    }
}

fn read_spreadsheet(bytes: &[u8]) -> Result<Spreadsheet, CodecError> {
    umya_spreadsheet::reader::xlsx::read_reader(Cursor::new(bytes), true).context(SpreadsheetSnafu)
}

/// `(row, col)` of a spreadsheet cell, both 1-based.
fn position(cell: &Cell) -> (u32, u32) {
    let coordinate = cell.get_coordinate();
    let row: u32 = coordinate.get_row_num().to_owned();
    let col: u32 = coordinate.get_col_num().to_owned();
    (row, col)
}

fn read_cell(cell: &Cell) -> Option<CellValue> {
    let formula = cell.get_formula();
    if !formula.is_empty() {
        let text = if formula.starts_with('=') {
            formula.to_string()
        } else {
            format!("={formula}")
        };
        return Some(CellValue::Formula(text));
    }

    if cell.get_data_type() == "n" {
        let number = cell.get_value_number()?;
        let is_date = cell
            .get_style()
            .get_number_format()
            .is_some_and(|format| is_date_format(format.get_format_code()));
        if is_date {
            if let Some(datetime) = datetime_from_serial(number) {
                return Some(CellValue::Date(datetime));
            }
        }
        return Some(CellValue::Number(number));
    }

    let text = cell.get_value();
    (!text.is_empty()).then(|| CellValue::Text(text.into_owned()))
}

/// The named worksheet of `book`, added at the end when missing.
fn worksheet_mut<'a>(book: &'a mut Spreadsheet, name: &str) -> Result<&'a mut Worksheet, CodecError> {
    let existing = book
        .get_sheet_collection()
        .iter()
        .position(|ws| ws.get_name() == name);
    match existing {
        Some(idx) => Ok(&mut book.get_sheet_collection_mut()[idx]),
        None => book.new_sheet(name).map_err(|message| {
            AddSheetSnafu {
                name,
                message: message.to_string(),
            }
            .build()
        }),
    }
}

/// Replace the cell contents of `worksheet` with those of `sheet`.
fn write_sheet(worksheet: &mut Worksheet, sheet: &Sheet) {
    let stale: Vec<(u32, u32)> = worksheet
        .get_cell_collection()
        .into_iter()
        .map(position)
        .filter(|&(row, col)| sheet.cell(row, col).is_none())
        .collect();
    for (row, col) in stale {
        worksheet.remove_cell((col, row));
    }

    for (addr, value) in sheet.cells() {
        let coordinate = (addr.col, addr.row);
        // A formula cell keeps its formula under a plain value; start afresh.
        let replaces_formula = !matches!(value, CellValue::Formula(_))
            && worksheet
                .get_cell(coordinate)
                .is_some_and(|cell| !cell.get_formula().is_empty());
        if replaces_formula {
            worksheet.remove_cell(coordinate);
        }

        let cell = worksheet.get_cell_mut(coordinate);
        match value {
            CellValue::Number(n) => {
                cell.set_value_number(*n);
            }
            CellValue::Text(text) => {
                cell.set_value_string(text.as_str());
            }
            CellValue::Date(datetime) => {
                cell.set_value_number(serial_from_datetime(*datetime));
                cell.get_style_mut()
                    .get_number_format_mut()
                    .set_format_code(DATE_NUMBER_FORMAT);
            }
            CellValue::Formula(formula) => {
                cell.set_formula(formula.strip_prefix('=').unwrap_or(formula));
            }
        }
    }
}

/// True when a number format code renders a calendar date.
///
/// Quoted literals and bracketed sections (colours, locales, elapsed time)
/// are ignored; any remaining day or year token marks a date.
fn is_date_format(code: &str) -> bool {
    let mut quoted = false;
    let mut bracketed = false;
    for c in code.chars() {
        match c {
            '"' => quoted = !quoted,
            '[' if !quoted => bracketed = true,
            ']' if !quoted => bracketed = false,
            _ if quoted || bracketed => {}
            'd' | 'D' | 'y' | 'Y' => return true,
            _ => {}
        }
    }
    false
}

fn serial_from_datetime(datetime: NaiveDateTime) -> f64 {
    let days = datetime.date().num_days_from_ce() - SERIAL_EPOCH_DAYS_FROM_CE;
    f64::from(days) + f64::from(datetime.time().num_seconds_from_midnight()) / SECONDS_PER_DAY
}

fn datetime_from_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial > f64::from(i32::MAX) {
        return None;
    }
    let days = serial.floor();
    let seconds = ((serial - days) * SECONDS_PER_DAY).round() as i64;
    let date = NaiveDate::from_num_days_from_ce_opt((days as i32).checked_add(SERIAL_EPOCH_DAYS_FROM_CE)?)?;
    date.and_hms_opt(0, 0, 0)?
        .checked_add_signed(TimeDelta::try_seconds(seconds)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn sample() -> Workbook {
        let mut wb = Workbook::new();
        let (sheet, _) = wb.sheet_or_create("march");
        sheet.set(1, 1, CellValue::date(day(2025, 3, 15)));
        sheet.set(2, 1, CellValue::text("Well_name"));
        sheet.set(3, 1, CellValue::text("well_1"));
        sheet.set(3, 4, CellValue::Number(120.5));
        sheet.set(3, 8, CellValue::Formula("=IF(G3=0,0,G3/D3)".into()));
        wb
    }

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("CPU_update.xlsm")),
            DocumentFormat::Spreadsheet
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("report 15.03.2025.XLSX")),
            DocumentFormat::Spreadsheet
        );
        assert_eq!(DocumentFormat::from_path(Path::new("master.json")), DocumentFormat::Json);
        assert_eq!(DocumentFormat::from_path(Path::new("master")), DocumentFormat::Json);
    }

    #[test]
    fn serial_numbers_match_spreadsheet_dates() {
        let noon = day(2025, 3, 15).and_hms_opt(12, 0, 0).expect("valid time");
        assert_eq!(serial_from_datetime(day(1970, 1, 1).and_hms_opt(0, 0, 0).expect("midnight")), 25_569.0);
        assert_eq!(serial_from_datetime(noon), 45_731.5);
        assert_eq!(datetime_from_serial(45_731.5), Some(noon));
        assert_eq!(datetime_from_serial(f64::NAN), None);
        assert_eq!(datetime_from_serial(-1.0), None);
    }

    #[test]
    fn date_formats_are_told_apart_from_numbers() {
        assert!(is_date_format("dd.mm.yyyy"));
        assert!(is_date_format("mm-dd-yy"));
        assert!(is_date_format("[$-409]d-mmm-yy;@"));
        assert!(!is_date_format("General"));
        assert!(!is_date_format("0.00"));
        assert!(!is_date_format("[h]:mm:ss"));
        assert!(!is_date_format("0.0\" days\""));
    }

    #[test]
    fn xlsx_round_trip_keeps_values_dates_and_formulas() -> TestResult {
        let wb = sample();
        let bytes = wb.to_xlsx_bytes(None)?;
        let decoded = Workbook::from_xlsx_slice(&bytes)?;
        assert_eq!(decoded, wb);
        Ok(())
    }

    #[test]
    fn xlsx_write_over_base_keeps_foreign_sheets_and_drops_stale_cells() -> TestResult {
        let mut base = sample();
        base.sheet_or_create("Dashboard")
            .0
            .set(1, 1, CellValue::text("kept"));
        base.sheet_or_create("march")
            .0
            .set(9, 9, CellValue::Number(1.0));
        let base_bytes = base.to_xlsx_bytes(None)?;

        let bytes = sample().to_xlsx_bytes(Some(&base_bytes))?;
        let decoded = Workbook::from_xlsx_slice(&bytes)?;

        assert_eq!(decoded.sheet("march"), sample().sheet("march"));
        assert_eq!(decoded.sheet("Dashboard").and_then(|s| s.text(1, 1)), Some("kept"));
        Ok(())
    }

    #[test]
    fn number_replacing_a_formula_drops_the_formula() -> TestResult {
        let base_bytes = sample().to_xlsx_bytes(None)?;
        let mut wb = sample();
        wb.sheet_or_create("march").0.set(3, 8, CellValue::Number(5.0));

        let decoded = Workbook::from_xlsx_slice(&wb.to_xlsx_bytes(Some(&base_bytes))?)?;
        assert_eq!(decoded.sheet("march").and_then(|s| s.number(3, 8)), Some(5.0));
        Ok(())
    }

    #[test]
    fn decode_dispatches_on_format() -> TestResult {
        let wb = sample();
        let json = wb.encode(DocumentFormat::Json, None)?;
        assert_eq!(Workbook::decode(DocumentFormat::Json, &json)?, wb);
        assert!(matches!(
            Workbook::decode(DocumentFormat::Spreadsheet, &json),
            Err(CodecError::Spreadsheet { .. })
        ));
        Ok(())
    }
}
