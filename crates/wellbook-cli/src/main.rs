//! CLI tool that merges dated well reports into master workbooks.

mod error;
mod watch;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use snafu::{OptionExt, ResultExt, ensure};
use tracing_subscriber::EnvFilter;
use wellbook_core::{config::Config, ingest::Pipeline};

use crate::{
    error::{
        BuildPipelineSnafu, CliResult, ConfigSnafu, DestAlreadyExistsSnafu, IngestSnafu,
        UnknownPipelineSnafu, WriteFileSnafu,
    },
    watch::cmd_watch,
};

#[derive(Debug, Subcommand)]
enum Command {
    /// Merge the latest document per pipeline, then merge new documents as they appear
    Watch {
        /// Configuration file (default: built-in CPU and injection pipelines)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Only run the named pipeline(s)
        #[arg(long = "pipeline")]
        pipeline: Vec<String>,

        /// Exit after the start-up merge instead of watching
        #[arg(long, default_value_t = false)]
        once: bool,
    },

    /// Merge a single source document
    Ingest {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        pipeline: String,

        #[arg(long)]
        source: PathBuf,

        /// Print elapsed time for the merge
        #[arg(long, default_value_t = false)]
        timing: bool,
    },

    /// Write the default configuration to a file
    InitConfig {
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn load_config(path: Option<&Path>) -> CliResult<Config> {
    match path {
        Some(path) => Config::load(path).await.context(ConfigSnafu),
        None => Ok(Config::default()),
    }
}

fn find_pipeline(config: &Config, name: &str) -> CliResult<Pipeline> {
    let pipeline = config.pipeline(name).context(UnknownPipelineSnafu {
        name,
        available: config
            .pipelines
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })?;
    Pipeline::new(pipeline.clone()).context(BuildPipelineSnafu { name })
}

/// The named pipelines, or every configured one when no name is given.
fn select_pipelines(config: &Config, names: &[String]) -> CliResult<Vec<Pipeline>> {
    if names.is_empty() {
        return config
            .pipelines
            .iter()
            .map(|p| find_pipeline(config, &p.name))
            .collect();
    }
    names.iter().map(|name| find_pipeline(config, name)).collect()
}

async fn cmd_ingest(
    config: Option<&Path>,
    pipeline: &str,
    source: &Path,
    timing: bool,
) -> CliResult<()> {
    let config = load_config(config).await?;
    let pipeline = find_pipeline(&config, pipeline)?;

    let report = pipeline.ingest(source).await.context(IngestSnafu {
        document: source.display().to_string(),
    })?;

    let summary = format!(
        "Merged {} into {} ({} updated, {} appended, {} dropped)",
        report.document, report.section, report.updated, report.appended, report.dropped
    );
    if timing {
        println!("{summary} (elapsed_ms: {})", report.elapsed_ms);
    } else {
        println!("{summary}");
    }
    Ok(())
}

async fn cmd_init_config(output: &Path, force: bool) -> CliResult<()> {
    ensure!(
        force || !output.exists(),
        DestAlreadyExistsSnafu {
            path: output.display().to_string(),
        }
    );

    let text = Config::default().to_json_pretty().context(ConfigSnafu)?;
    tokio::fs::write(output, text).await.context(WriteFileSnafu {
        path: output.display().to_string(),
    })?;

    println!("Wrote default configuration to {}", output.display());
    Ok(())
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Watch {
            config,
            pipeline,
            once,
        } => {
            let config = load_config(config.as_deref()).await?;
            let selected = select_pipelines(&config, &pipeline)?;
            cmd_watch(&config, selected, once).await
        }
        Command::Ingest {
            config,
            pipeline,
            source,
            timing,
        } => cmd_ingest(config.as_deref(), &pipeline, &source, timing).await,
        Command::InitConfig { output, force } => cmd_init_config(&output, force).await,
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
