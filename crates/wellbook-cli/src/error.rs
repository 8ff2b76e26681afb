use wellbook_core::{config::ConfigError, ingest::IngestError, storage::StorageError};

use snafu::Snafu;

pub type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CliError {
    #[snafu(display("{source}"))]
    Config { source: ConfigError },

    #[snafu(display("Unknown pipeline '{name}'. Configured pipelines: {available}"))]
    UnknownPipeline { name: String, available: String },

    #[snafu(display("Invalid pipeline '{name}': {source}"))]
    BuildPipeline { name: String, source: IngestError },

    #[snafu(display("Failed to merge {document}: {source}"))]
    Ingest {
        document: String,
        source: IngestError,
    },

    #[snafu(display("Cannot scan watch directory {dir}: {source}"))]
    Scan { dir: String, source: StorageError },

    #[snafu(display(
        "Refusing to overwrite existing file: {path}. \
         Pass --force to replace it."
    ))]
    DestAlreadyExists { path: String },

    #[snafu(display("Failed to write {path}: {source}"))]
    WriteFile {
        path: String,
        source: std::io::Error,
    },
}
