//! End-to-end merges through `Pipeline::ingest` against scratch directories.
//!
//! These tests cover:
//! - the two-day production scenario (new adjacent block, row reuse, append),
//! - idempotent re-ingestion and the single-generation backup,
//! - documents that must abort without touching the master store,
//! - a spreadsheet master patched from a spreadsheet report,
//! - row insertion with formula cloning in the injection store.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tempfile::TempDir;
use wellbook_core::config::PipelineConfig;
use wellbook_core::date_axis::{BLOCK_STRIDE, slot};
use wellbook_core::formula::DerivedRatio;
use wellbook_core::ingest::{IngestError, Pipeline};
use wellbook_core::workbook::{CellValue, Sheet, Workbook, cell_date};

type TestResult = Result<(), Box<dyn std::error::Error>>;

// =============================================================================
// Test Helpers
// =============================================================================

struct ProductionRow {
    name: &'static str,
    oil: f64,
    water: f64,
    gas: f64,
}

fn row(name: &'static str, oil: f64, water: f64, gas: f64) -> ProductionRow {
    ProductionRow {
        name,
        oil,
        water,
        gas,
    }
}

async fn write_workbook(path: &Path, wb: &Workbook) -> TestResult {
    tokio::fs::write(path, wb.to_json_bytes()?).await?;
    Ok(())
}

async fn write_production_source(dir: &Path, date: &str, rows: &[ProductionRow]) -> PathBuf {
    let mut wb = Workbook::new();
    let (sheet, _) = wb.sheet_or_create("CPU_Production_EN");
    sheet.set(8, 14, CellValue::text("Well name"));
    for (r, data) in (9u32..).zip(rows) {
        sheet.set(r, 14, CellValue::text(data.name));
        sheet.set(r, 16, CellValue::Number(data.oil));
        sheet.set(r, 18, CellValue::Number(data.water));
        sheet.set(r, 19, CellValue::Number(data.gas));
        sheet.set(r, 20, CellValue::Number(50.0));
    }

    let path = dir.join(format!("CPU_Production_EN {date}.json"));
    write_workbook(&path, &wb).await.expect("write source");
    path
}

async fn write_injection_source(dir: &Path, date: &str, rows: &[(&str, f64, f64, f64)]) -> PathBuf {
    let mut wb = Workbook::new();
    let (sheet, _) = wb.sheet_or_create("Daily_Production_EN_CB");
    for (r, &(name, hours, pressure, volume)) in (160u32..).zip(rows) {
        sheet.set(r, 4, CellValue::text(name));
        sheet.set(r, 6, CellValue::Number(hours));
        sheet.set(r, 8, CellValue::Number(pressure));
        sheet.set(r, 31, CellValue::Number(volume));
    }

    let path = dir.join(format!("Daily_Production_EN_CB {date}.json"));
    write_workbook(&path, &wb).await.expect("write source");
    path
}

fn production_pipeline(tmp: &TempDir) -> Pipeline {
    let config = PipelineConfig {
        watch_dir: tmp.path().to_path_buf(),
        master: PathBuf::from("CPU_update.json"),
        source_extension: "json".to_string(),
        ..PipelineConfig::production()
    };
    Pipeline::new(config).expect("valid production pipeline")
}

fn injection_pipeline(tmp: &TempDir) -> Pipeline {
    let config = PipelineConfig {
        watch_dir: tmp.path().to_path_buf(),
        master: PathBuf::from("Injection.json"),
        source_extension: "json".to_string(),
        ..PipelineConfig::injection()
    };
    Pipeline::new(config).expect("valid injection pipeline")
}

async fn load_master(pipeline: &Pipeline) -> Workbook {
    pipeline
        .store()
        .load()
        .await
        .expect("readable master")
        .expect("master exists")
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).expect("valid date")
}

fn identity(sheet: &Sheet, row: u32, block: u32) -> Option<&str> {
    sheet.text(row, block + slot::IDENTITY)
}

// =============================================================================
// Production store
// =============================================================================

#[tokio::test]
async fn two_day_scenario_builds_adjacent_blocks() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);

    let first = write_production_source(
        tmp.path(),
        "15.03.2025",
        &[
            row("well_1", 120.0, 30.0, 600.0),
            row("well_2", 80.0, 20.0, 0.0),
            row("well_3", 50.0, 0.0, 100.0),
        ],
    )
    .await;
    let report = pipeline.ingest(&first).await?;
    assert_eq!(report.section, "march");
    assert_eq!(report.block, 1);
    assert!(report.block_created);
    assert_eq!(report.appended, 3);
    assert_eq!(report.date, date(15));

    let second = write_production_source(
        tmp.path(),
        "16.03.2025",
        &[
            row("well_2", 85.0, 15.0, 10.0),
            row("well_3", 55.0, 5.0, 110.0),
            row("well_4", 40.0, 60.0, 0.0),
        ],
    )
    .await;
    let report = pipeline.ingest(&second).await?;
    assert_eq!(report.block, 1 + BLOCK_STRIDE);
    assert!(report.block_created);

    let master = load_master(&pipeline).await;
    let march = master.sheet("march").expect("march section");
    let (b1, b2) = (1, 1 + BLOCK_STRIDE);

    assert_eq!(march.cell(1, b1).and_then(cell_date), Some(date(15)));
    assert_eq!(march.cell(1, b2).and_then(cell_date), Some(date(16)));

    // well_2 and well_3 keep their rows; well_4 is appended below.
    assert_eq!(identity(march, 4, b2), Some("well_2"));
    assert_eq!(identity(march, 5, b2), Some("well_3"));
    assert_eq!(identity(march, 6, b2), Some("well_4"));
    assert_eq!(march.number(4, b2 + slot::OIL), Some(85.0));
    assert_eq!(march.number(6, b2 + slot::FLUID), Some(100.0));

    // well_1 is untouched, and blank for the new date.
    assert_eq!(identity(march, 3, b1), Some("well_1"));
    assert_eq!(march.number(3, b1 + slot::OIL), Some(120.0));
    assert!((b2..b2 + BLOCK_STRIDE).all(|c| march.cell(3, c).is_none()));

    assert_eq!(DerivedRatio::WaterCut.evaluate(march, 6, b2), Some(60.0));
    assert_eq!(DerivedRatio::GasOilRatio.evaluate(march, 6, b2), Some(0.0));
    Ok(())
}

#[tokio::test]
async fn reingesting_a_document_changes_nothing() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);
    let source = write_production_source(
        tmp.path(),
        "15.03.2025",
        &[row("well_1", 120.0, 30.0, 600.0), row("well_7", 10.0, 1.0, 2.0)],
    )
    .await;

    pipeline.ingest(&source).await?;
    let once = tokio::fs::read(pipeline.store().path()).await?;

    let report = pipeline.ingest(&source).await?;
    let twice = tokio::fs::read(pipeline.store().path()).await?;

    assert_eq!(once, twice);
    assert!(!report.block_created);
    assert_eq!(report.updated, 2);
    assert_eq!(report.appended, 0);
    Ok(())
}

#[tokio::test]
async fn backup_holds_the_previous_committed_store() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);

    let first = write_production_source(tmp.path(), "15.03.2025", &[row("well_1", 1.0, 1.0, 1.0)]).await;
    pipeline.ingest(&first).await?;
    assert!(!pipeline.store().backup_path().exists());
    let committed = tokio::fs::read(pipeline.store().path()).await?;

    let second = write_production_source(tmp.path(), "16.03.2025", &[row("well_1", 2.0, 2.0, 2.0)]).await;
    pipeline.ingest(&second).await?;

    assert_eq!(tokio::fs::read(pipeline.store().backup_path()).await?, committed);
    assert!(!pipeline.store().temp_path().exists());

    let mut backups = 0;
    let mut entries = tokio::fs::read_dir(tmp.path()).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().contains("_backup") {
            backups += 1;
        }
    }
    assert_eq!(backups, 1);
    Ok(())
}

#[tokio::test]
async fn ineligible_wells_never_reach_the_store() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);
    let source = write_production_source(
        tmp.path(),
        "15.03.2025",
        &[
            row("well_92", 1.0, 1.0, 1.0),
            row("Total", 1.0, 1.0, 1.0),
            row("well_91", 1.0, 1.0, 1.0),
        ],
    )
    .await;

    let report = pipeline.ingest(&source).await?;
    assert_eq!(report.appended, 1);

    let master = load_master(&pipeline).await;
    let march = master.sheet("march").expect("march section");
    assert_eq!(identity(march, 3, 1), Some("well_91"));
    assert_eq!(march.max_row(), 3);
    Ok(())
}

// =============================================================================
// Aborted documents
// =============================================================================

#[tokio::test]
async fn undated_document_is_rejected_before_any_write() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);
    let path = tmp.path().join("CPU_Production_EN latest.json");
    write_workbook(&path, &Workbook::new()).await?;

    let err = pipeline.ingest(&path).await.expect_err("no date in name");
    assert!(matches!(err, IngestError::UnparseableDate { .. }));
    assert!(!err.is_retryable());
    assert!(!pipeline.store().path().exists());
    Ok(())
}

#[tokio::test]
async fn locked_master_is_skipped_and_retryable() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);
    let first = write_production_source(tmp.path(), "15.03.2025", &[row("well_1", 1.0, 1.0, 1.0)]).await;
    pipeline.ingest(&first).await?;
    let before = tokio::fs::read(pipeline.store().path()).await?;

    tokio::fs::write(tmp.path().join("~$CPU_update.json"), b"owner").await?;
    let second = write_production_source(tmp.path(), "16.03.2025", &[row("well_1", 2.0, 2.0, 2.0)]).await;

    let err = pipeline.ingest(&second).await.expect_err("locked master");
    assert!(matches!(err, IngestError::Locked { .. }));
    assert!(err.is_retryable());
    assert_eq!(tokio::fs::read(pipeline.store().path()).await?, before);
    assert!(!pipeline.store().backup_path().exists());
    Ok(())
}

#[tokio::test]
async fn malformed_source_leaves_master_untouched() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = production_pipeline(&tmp);
    let first = write_production_source(tmp.path(), "15.03.2025", &[row("well_1", 1.0, 1.0, 1.0)]).await;
    pipeline.ingest(&first).await?;
    let before = tokio::fs::read(pipeline.store().path()).await?;

    let wrong_sheet = tmp.path().join("CPU_Production_EN 16.03.2025.json");
    let mut wb = Workbook::new();
    wb.sheet_or_create("Summary");
    write_workbook(&wrong_sheet, &wb).await?;
    let err = pipeline.ingest(&wrong_sheet).await.expect_err("missing sheet");
    assert!(matches!(err, IngestError::Extract { .. }));

    let not_json = tmp.path().join("CPU_Production_EN 17.03.2025.json");
    tokio::fs::write(&not_json, b"PK\x03\x04").await?;
    let err = pipeline.ingest(&not_json).await.expect_err("unreadable source");
    assert!(matches!(err, IngestError::Source { .. }));

    assert_eq!(tokio::fs::read(pipeline.store().path()).await?, before);
    Ok(())
}

#[tokio::test]
async fn spreadsheet_master_is_patched_from_a_spreadsheet_report() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = Pipeline::new(PipelineConfig {
        watch_dir: tmp.path().to_path_buf(),
        ..PipelineConfig::production()
    })?;

    let mut existing = Workbook::new();
    existing
        .sheet_or_create("Dashboard")
        .0
        .set(1, 1, CellValue::text("monthly totals"));
    tokio::fs::write(pipeline.store().path(), existing.to_xlsx_bytes(None)?).await?;

    let mut report = Workbook::new();
    let (sheet, _) = report.sheet_or_create("CPU_Production_EN");
    sheet.set(9, 14, CellValue::text("well_1"));
    sheet.set(9, 16, CellValue::Number(120.0));
    sheet.set(9, 18, CellValue::Number(30.0));
    sheet.set(9, 19, CellValue::Number(600.0));
    let source = tmp.path().join("CPU_Production_EN 15.03.2025.xlsx");
    tokio::fs::write(&source, report.to_xlsx_bytes(None)?).await?;

    let merged = pipeline.ingest(&source).await?;
    assert_eq!(merged.appended, 1);

    let master = load_master(&pipeline).await;
    assert_eq!(
        master.sheet("Dashboard").and_then(|s| s.text(1, 1)),
        Some("monthly totals")
    );
    let march = master.sheet("march").expect("march section");
    assert_eq!(march.cell(1, 1).and_then(cell_date), Some(date(15)));
    assert_eq!(identity(march, 3, 1), Some("well_1"));
    assert_eq!(march.number(3, 1 + slot::FLUID), Some(150.0));
    assert_eq!(DerivedRatio::GasOilRatio.evaluate(march, 3, 1), Some(5.0));
    assert!(pipeline.store().backup_path().exists());
    Ok(())
}

// =============================================================================
// Injection store
// =============================================================================

#[tokio::test]
async fn injection_row_is_inserted_after_last_date_with_cloned_formulas() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = injection_pipeline(&tmp);

    let mut master = Workbook::new();
    let (sheet, _) = master.sheet_or_create("2025");
    sheet.set(1, 2, CellValue::text("well_92"));
    sheet.set(3, 1, CellValue::date(date(14)));
    sheet.set(3, 5, CellValue::Formula("=D3*B3/24".into()));
    sheet.set(4, 1, CellValue::text("Total"));
    sheet.set(4, 4, CellValue::Formula("=SUM(D3:D3)".into()));
    write_workbook(pipeline.store().path(), &master).await?;

    let source = write_injection_source(
        tmp.path(),
        "15.03.2025",
        &[
            ("well_92", 24.0, 110.0, 800.0),
            ("well_101", 12.0, 95.5, 300.0),
            ("well_92", 1.0, 1.0, 1.0),
            ("well_7", 24.0, 1.0, 1.0),
        ],
    )
    .await;
    let report = pipeline.ingest(&source).await?;

    assert_eq!(report.section, "2025");
    assert_eq!(report.block, 4);
    assert!(report.block_created);
    assert_eq!(report.formulas_cloned, 1);
    assert_eq!(report.updated, 2);

    let master = load_master(&pipeline).await;
    let year = master.sheet("2025").expect("year section");
    assert_eq!(year.cell(4, 1).and_then(cell_date), Some(date(15)));
    assert_eq!(year.cell(4, 5).and_then(CellValue::as_formula), Some("=D4*B4/24"));
    // well_92 at B, first occurrence wins.
    assert_eq!(year.number(4, 2), Some(24.0));
    assert_eq!(year.number(4, 3), Some(110.0));
    assert_eq!(year.number(4, 4), Some(800.0));
    // well_101 at AU.
    assert_eq!(year.number(4, 47), Some(12.0));
    assert_eq!(year.number(4, 49), Some(300.0));
    // The totals row moved down.
    assert_eq!(year.text(5, 1), Some("Total"));

    // Same date again reuses the row.
    let report = pipeline.ingest(&source).await?;
    assert_eq!(report.block, 4);
    assert!(!report.block_created);
    Ok(())
}

#[tokio::test]
async fn injection_store_is_created_when_missing() -> TestResult {
    let tmp = TempDir::new()?;
    let pipeline = injection_pipeline(&tmp);
    let source = write_injection_source(tmp.path(), "02.01.2026", &[("well_95", 20.0, 100.0, 500.0)]).await;

    let report = pipeline.ingest(&source).await?;

    assert_eq!(report.section, "2026");
    assert_eq!(report.block, 3);
    assert_eq!(report.formulas_cloned, 0);
    let master = load_master(&pipeline).await;
    let year = master.sheet("2026").expect("year section");
    // well_95 at Q.
    assert_eq!(year.number(3, 17), Some(20.0));
    Ok(())
}
