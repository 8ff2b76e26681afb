//! Pipeline configuration.
//!
//! A configuration file is JSON describing one or more pipelines. Each
//! pipeline watches a directory for dated source documents and merges them
//! into one master store with a fixed layout:
//!
//! ```json
//! {
//!   "debounce_ms": 2000,
//!   "poll_interval_ms": 1000,
//!   "pipelines": [
//!     {
//!       "name": "injection",
//!       "watch_dir": "Injection folder",
//!       "master": "Injection.xlsx",
//!       "source_prefix": "Daily_Production_EN_CB",
//!       "source_extension": "xlsx",
//!       "layout": {
//!         "kind": "row_major",
//!         "category": { "prefix": "well_", "min": 92, "max": 101 },
//!         "roster": { "well_92": "B", "well_93": "G" }
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! A relative `master` is resolved against `watch_dir`. Masters and sources
//! ending in `.xlsx` or `.xlsm` are spreadsheets; any other extension is read
//! and written as JSON.

use std::{
    collections::{BTreeMap, HashSet},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use snafu::{Backtrace, prelude::*};

use crate::{
    extract::{InjectionLayout, ProductionLayout},
    upsert::{Roster, WellCategory},
    workbook::{Column, column_index},
};

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("Cannot read configuration {path}: {source}"))]
    Read {
        /// Configuration file.
        path: String,
        /// Underlying I/O error.
        source: io::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The configuration file is not valid JSON for this schema.
    #[snafu(display("Cannot parse configuration {path}: {source}"))]
    Parse {
        /// Configuration file.
        path: String,
        /// Underlying decode error.
        source: serde_json::Error,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The configuration could not be encoded.
    #[snafu(display("Cannot encode configuration: {source}"))]
    Encode {
        /// Underlying encode error.
        source: serde_json::Error,
    },

    /// No pipeline is configured.
    #[snafu(display("Configuration defines no pipelines"))]
    NoPipelines,

    /// Two pipelines share a name.
    #[snafu(display("Pipeline name {name:?} is used more than once"))]
    DuplicatePipeline {
        /// The repeated name.
        name: String,
    },

    /// A roster entry does not name a well of the pipeline's category.
    #[snafu(display("Pipeline {pipeline:?}: roster entry {well:?} is not an eligible well"))]
    RosterWell {
        /// Pipeline carrying the roster.
        pipeline: String,
        /// Offending roster key.
        well: String,
    },

    /// Debounce or poll interval of zero.
    #[snafu(display("{field} must be greater than zero"))]
    ZeroInterval {
        /// Offending field.
        field: &'static str,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

const fn default_debounce_ms() -> u64 {
    2_000
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_source_extension() -> String {
    "xlsx".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Delay between noticing a new document and merging it.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Interval between directory scans.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Configured pipelines.
    pub pipelines: Vec<PipelineConfig>,
}

/// One watched directory merged into one master store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Unique pipeline name.
    pub name: String,
    /// Directory scanned for source documents.
    pub watch_dir: PathBuf,
    /// Master store file; relative paths live under `watch_dir`.
    pub master: PathBuf,
    /// File-name prefix of source documents.
    pub source_prefix: String,
    /// File extension of source documents, without the dot.
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
    /// Store layout and the matching extraction rules.
    pub layout: LayoutConfig,
}

/// Layout of a master store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutConfig {
    /// Month sheets, one column block per date, one row per well.
    ColumnMajor {
        /// Wells accepted by the store.
        category: WellCategory,
        /// Where readings live in source documents.
        #[serde(default)]
        source: ProductionLayout,
    },
    /// Year sheets, one row per date, fixed columns per well.
    RowMajor {
        /// Wells accepted by the store.
        category: WellCategory,
        /// Base column of each well's three metric columns.
        roster: BTreeMap<String, Column>,
        /// Where readings live in source documents.
        #[serde(default)]
        source: InjectionLayout,
    },
}

impl Default for Config {
    fn default() -> Self {
        Config {
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            pipelines: vec![PipelineConfig::production(), PipelineConfig::injection()],
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let path_str = path.display().to_string();
        let bytes = tokio::fs::read(path).await.context(ReadSnafu {
            path: path_str.clone(),
        })?;
        let config: Config =
            serde_json::from_slice(&bytes).context(ParseSnafu { path: path_str })?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        let mut text = serde_json::to_string_pretty(self).context(EncodeSnafu)?;
        text.push('\n');
        Ok(text)
    }

    /// Reject configurations no pipeline could run with.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure!(!self.pipelines.is_empty(), NoPipelinesSnafu);
        ensure!(
            self.debounce_ms > 0,
            ZeroIntervalSnafu {
                field: "debounce_ms"
            }
        );
        ensure!(
            self.poll_interval_ms > 0,
            ZeroIntervalSnafu {
                field: "poll_interval_ms"
            }
        );

        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            ensure!(
                names.insert(pipeline.name.as_str()),
                DuplicatePipelineSnafu {
                    name: pipeline.name.as_str()
                }
            );
            pipeline.layout.roster(&pipeline.name)?;
        }
        Ok(())
    }

    /// Pipeline with the given name.
    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Debounce delay.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Directory scan interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

const INJECTION_ROSTER: [(&str, &str); 10] = [
    ("well_92", "B"),
    ("well_93", "G"),
    ("well_94", "L"),
    ("well_95", "Q"),
    ("well_96", "V"),
    ("well_97", "AA"),
    ("well_98", "AF"),
    ("well_99", "AK"),
    ("well_100", "AP"),
    ("well_101", "AU"),
];

impl PipelineConfig {
    /// Daily production merged into `CPU_update.xlsm`.
    pub fn production() -> Self {
        PipelineConfig {
            name: "cpu".to_string(),
            watch_dir: PathBuf::from("CPU_update"),
            master: PathBuf::from("CPU_update.xlsm"),
            source_prefix: "CPU_Production_EN".to_string(),
            source_extension: default_source_extension(),
            layout: LayoutConfig::ColumnMajor {
                category: WellCategory::production(),
                source: ProductionLayout::default(),
            },
        }
    }

    /// Daily injection merged into `Injection.xlsx`.
    pub fn injection() -> Self {
        let roster = INJECTION_ROSTER
            .iter()
            .filter_map(|(well, letters)| {
                column_index(letters).map(|col| (well.to_string(), Column::new(col)))
            })
            .collect();

        PipelineConfig {
            name: "injection".to_string(),
            watch_dir: PathBuf::from("Injection folder"),
            master: PathBuf::from("Injection.xlsx"),
            source_prefix: "Daily_Production_EN_CB".to_string(),
            source_extension: default_source_extension(),
            layout: LayoutConfig::RowMajor {
                category: WellCategory::injection(),
                roster,
                source: InjectionLayout::default(),
            },
        }
    }

    /// Master store path, resolved against `watch_dir` when relative.
    pub fn master_path(&self) -> PathBuf {
        self.watch_dir.join(&self.master)
    }
}

impl LayoutConfig {
    /// Wells accepted by the store.
    pub fn category(&self) -> &WellCategory {
        match self {
            LayoutConfig::ColumnMajor { category, .. } | LayoutConfig::RowMajor { category, .. } => {
                category
            }
        }
    }

    /// Validated roster for a row-major layout; empty for column-major.
    pub fn roster(&self, pipeline: &str) -> ConfigResult<Roster> {
        let mut roster = Roster::new();
        if let LayoutConfig::RowMajor {
            category, roster: columns, ..
        } = self
        {
            for (well, col) in columns {
                let id = category.parse(well).context(RosterWellSnafu { pipeline, well })?;
                roster.register(id, col.index());
            }
        }
        Ok(roster)
    }
}
