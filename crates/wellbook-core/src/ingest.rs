//! Merging one dated source document into a master store.
//!
//! [`Pipeline::ingest`] runs the whole sequence for a single document:
//!
//! 1. parse the date from the file name,
//! 2. check that the master store is not locked,
//! 3. load the master (a missing master starts an empty workbook),
//! 4. load the source and extract typed records,
//! 5. resolve the date to a block, creating it if needed,
//! 6. upsert the records and synthesize derived formulas,
//! 7. save atomically.
//!
//! Steps 5 and 6 are pure and exposed as [`merge_column_major`] and
//! [`merge_row_major`] for callers that already hold a workbook.

use std::{path::Path, time::Instant};

use chrono::NaiveDate;
use log::{info, warn};
use snafu::prelude::*;

use crate::{
    config::{ConfigError, LayoutConfig, PipelineConfig},
    date_axis::{
        BlockResolution, month_section, resolve_column_block, resolve_row_block, year_section,
    },
    extract::{
        ExtractError, Extractor, InjectionExtractor, ProductionExtractor, date_from_file_name,
    },
    storage::{MasterStore, StorageError, read_workbook},
    upsert::{
        EntityId, InjectionReading, ProductionReading, Roster, UpsertOutcome, upsert_column_block,
        upsert_row_block,
    },
    workbook::Workbook,
};

/// Errors that abort the merge of one document.
///
/// The master store is never partially written: every variant leaves it as it
/// was before the document was picked up.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IngestError {
    /// The file name carries no `dd.mm.yyyy` date.
    #[snafu(display("Cannot determine the date of {document}"))]
    UnparseableDate {
        /// Source file name.
        document: String,
    },

    /// The master store is open in another program.
    #[snafu(display("Master store {path} is locked; close it and retry"))]
    Locked {
        /// Master store path.
        path: String,
    },

    /// The source document could not be read.
    #[snafu(display("Cannot read source document {document}: {source}"))]
    Source {
        /// Source file name.
        document: String,
        /// Underlying storage error.
        source: StorageError,
    },

    /// The source document does not have the expected shape.
    #[snafu(display("Cannot extract records from {document}: {source}"))]
    Extract {
        /// Source file name.
        document: String,
        /// Underlying extraction error.
        source: ExtractError,
    },

    /// The master store could not be read or written.
    #[snafu(display("Master store error: {source}"))]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// The pipeline configuration is invalid.
    #[snafu(display("Invalid pipeline configuration: {source}"))]
    Config {
        /// Underlying configuration error.
        source: ConfigError,
    },
}

impl IngestError {
    /// True when retrying the same document later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Locked { .. })
    }
}

impl From<StorageError> for IngestError {
    fn from(source: StorageError) -> Self {
        match source {
            StorageError::Locked { path, .. } => IngestError::Locked { path },
            source => IngestError::Storage { source },
        }
    }
}

/// Where one document's records landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMerge {
    /// Sheet the block lives in.
    pub section: String,
    /// The resolved block.
    pub block: BlockResolution,
    /// What the upsert did.
    pub outcome: UpsertOutcome,
}

/// Summary of one successfully merged document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// Source file name.
    pub document: String,
    /// Date parsed from the file name.
    pub date: NaiveDate,
    /// Sheet the document was merged into.
    pub section: String,
    /// First column (column-major) or row (row-major) of the block.
    pub block: u32,
    /// True when the block was created for this document.
    pub block_created: bool,
    /// Formulas cloned from the template row when a row-major block was created.
    pub formulas_cloned: usize,
    /// Wells written over an existing slot.
    pub updated: usize,
    /// Wells given a new slot.
    pub appended: usize,
    /// Wells with no slot in the store.
    pub dropped: usize,
    /// Wall-clock time spent on the document.
    pub elapsed_ms: u128,
}

/// Merge production records into the month sheet for `date`.
pub fn merge_column_major<I>(workbook: &mut Workbook, date: NaiveDate, records: I) -> BlockMerge
where
    I: IntoIterator<Item = (EntityId, ProductionReading)>,
{
    let section = month_section(date);
    let (sheet, created) = workbook.sheet_or_create(section);
    if created {
        info!("created section {section}");
    }
    let block = resolve_column_block(sheet, date);
    let outcome = upsert_column_block(sheet, block.offset, records);
    BlockMerge {
        section: section.to_string(),
        block,
        outcome,
    }
}

/// Merge injection records into the year sheet for `date` through `roster`.
pub fn merge_row_major<I>(
    workbook: &mut Workbook,
    date: NaiveDate,
    roster: &Roster,
    records: I,
) -> BlockMerge
where
    I: IntoIterator<Item = (EntityId, InjectionReading)>,
{
    let section = year_section(date);
    let (sheet, created) = workbook.sheet_or_create(&section);
    if created {
        info!("created section {section}");
    }
    let block = resolve_row_block(sheet, date);
    let outcome = upsert_row_block(sheet, block.offset, roster, records);
    BlockMerge {
        section,
        block,
        outcome,
    }
}

#[derive(Debug, Clone)]
enum Merger {
    ColumnMajor(ProductionExtractor),
    RowMajor(InjectionExtractor, Roster),
}

impl Merger {
    fn merge(
        &self,
        workbook: &mut Workbook,
        date: NaiveDate,
        source: &Workbook,
    ) -> Result<BlockMerge, ExtractError> {
        // Extraction runs before the workbook is touched.
        Ok(match self {
            Merger::ColumnMajor(extractor) => {
                let records = extractor.extract(source)?;
                merge_column_major(workbook, date, records)
            }
            Merger::RowMajor(extractor, roster) => {
                let records = extractor.extract(source)?;
                merge_row_major(workbook, date, roster, records)
            }
        })
    }
}

/// One configured source-to-master merge.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    store: MasterStore,
    merger: Merger,
}

impl Pipeline {
    /// Build a pipeline, validating its roster.
    pub fn new(config: PipelineConfig) -> Result<Self, IngestError> {
        let merger = match &config.layout {
            LayoutConfig::ColumnMajor { category, source } => {
                Merger::ColumnMajor(ProductionExtractor {
                    category: category.clone(),
                    layout: source.clone(),
                })
            }
            LayoutConfig::RowMajor {
                category, source, ..
            } => {
                let roster = config.layout.roster(&config.name).context(ConfigSnafu)?;
                let extractor = InjectionExtractor {
                    category: category.clone(),
                    layout: source.clone(),
                };
                Merger::RowMajor(extractor, roster)
            }
        };
        let store = MasterStore::new(config.master_path());

        Ok(Pipeline {
            config,
            store,
            merger,
        })
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The master store this pipeline merges into.
    pub fn store(&self) -> &MasterStore {
        &self.store
    }

    /// Merge one source document into the master store.
    pub async fn ingest(&self, path: &Path) -> Result<MergeReport, IngestError> {
        let started = Instant::now();
        let document = document_name(path);
        info!("[{}] processing {document}", self.name());

        let date = date_from_file_name(&document).context(UnparseableDateSnafu {
            document: document.as_str(),
        })?;

        if self.store.is_locked().await? {
            warn!(
                "[{}] {} is open in another program; skipping {document}",
                self.name(),
                self.store.path().display()
            );
            return LockedSnafu {
                path: self.store.path().display().to_string(),
            }
            .fail();
        }

        let mut master = match self.store.load().await? {
            Some(master) => master,
            None => {
                warn!(
                    "[{}] {} not found; starting a new master store",
                    self.name(),
                    self.store.path().display()
                );
                Workbook::new()
            }
        };

        let source = read_workbook(path).await.context(SourceSnafu {
            document: document.as_str(),
        })?;
        let merge = self
            .merger
            .merge(&mut master, date, &source)
            .context(ExtractSnafu {
                document: document.as_str(),
            })?;

        self.store.save(&master).await?;

        let report = MergeReport {
            document,
            date,
            section: merge.section,
            block: merge.block.offset,
            block_created: merge.block.created,
            formulas_cloned: merge.block.cloned_formulas,
            updated: merge.outcome.updated,
            appended: merge.outcome.appended,
            dropped: merge.outcome.dropped,
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            "[{}] merged {} for {}: {} updated, {} appended, {} dropped in section {}",
            self.name(),
            report.document,
            report.date.format("%d.%m.%Y"),
            report.updated,
            report.appended,
            report.dropped,
            report.section
        );
        Ok(report)
    }
}

fn document_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
