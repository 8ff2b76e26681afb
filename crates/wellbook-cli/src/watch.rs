//! Long-running watch loop over every configured pipeline.

use std::{io, path::Path, pin::Pin};

use log::{error, info, warn};
use snafu::ResultExt;
use tokio::time::{self, MissedTickBehavior};
use wellbook_core::{
    config::Config,
    ingest::Pipeline,
    watch::{DirectoryScanner, SourceFilter, latest_source},
};

use crate::error::{CliResult, ScanSnafu};

/// Ctrl-C, with the handler installed as soon as this is created.
struct Shutdown {
    signal: Pin<Box<dyn Future<Output = io::Result<()>> + Send>>,
    requested: bool,
}

impl Shutdown {
    async fn install() -> Self {
        let mut shutdown = Shutdown {
            signal: Box::pin(tokio::signal::ctrl_c()),
            requested: false,
        };
        // The handler is registered on first poll.
        shutdown.requested().await;
        shutdown
    }

    /// True once Ctrl-C has been pressed. Never waits.
    async fn requested(&mut self) -> bool {
        if !self.requested {
            self.requested = tokio::select! {
                biased;
                _ = &mut self.signal => true,
                _ = std::future::ready(()) => false,
            };
        }
        self.requested
    }

    /// Resolve once Ctrl-C has been pressed.
    async fn wait(&mut self) {
        if !self.requested {
            if let Err(e) = (&mut self.signal).await {
                warn!("Ctrl-C handler failed: {e}");
            }
            self.requested = true;
        }
    }
}

struct Watched {
    pipeline: Pipeline,
    scanner: DirectoryScanner,
}

fn source_filter(pipeline: &Pipeline) -> SourceFilter {
    let config = pipeline.config();
    SourceFilter::new(&config.source_prefix, &config.source_extension)
}

/// Merge one document, logging the outcome. Failures never stop the loop.
async fn merge(pipeline: &Pipeline, path: &Path) {
    match pipeline.ingest(path).await {
        Ok(report) => info!(
            "[{}] {} done in {} ms (block {}{})",
            pipeline.name(),
            report.document,
            report.elapsed_ms,
            report.block,
            if report.block_created { ", new" } else { "" }
        ),
        Err(e) if e.is_retryable() => warn!("[{}] {e}", pipeline.name()),
        Err(e) => error!("[{}] {e}", pipeline.name()),
    }
}

/// Merge the newest existing document of a pipeline, if any.
async fn cold_start(pipeline: &Pipeline) {
    let dir = &pipeline.config().watch_dir;
    match latest_source(dir, &source_filter(pipeline)).await {
        Ok(Some(path)) => {
            info!("[{}] processing latest existing document", pipeline.name());
            merge(pipeline, &path).await;
        }
        Ok(None) => warn!(
            "[{}] no {} documents in {}",
            pipeline.name(),
            pipeline.config().source_prefix,
            dir.display()
        ),
        Err(e) => error!("[{}] {e}", pipeline.name()),
    }
}

pub(crate) async fn cmd_watch(config: &Config, pipelines: Vec<Pipeline>, once: bool) -> CliResult<()> {
    let mut shutdown = Shutdown::install().await;

    let mut watched = Vec::with_capacity(pipelines.len());
    for pipeline in pipelines {
        let dir = pipeline.config().watch_dir.clone();
        let scanner = DirectoryScanner::prime(&dir, source_filter(&pipeline))
            .await
            .context(ScanSnafu {
                dir: dir.display().to_string(),
            })?;
        if shutdown.requested().await {
            info!("stopping");
            return Ok(());
        }
        cold_start(&pipeline).await;
        watched.push(Watched { pipeline, scanner });
    }

    if once || shutdown.requested().await {
        return Ok(());
    }

    for w in &watched {
        info!("[{}] watching {}", w.pipeline.name(), w.scanner.dir().display());
    }
    info!("press Ctrl-C to stop");

    let mut ticker = time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'watch: loop {
        tokio::select! {
            _ = shutdown.wait() => break 'watch,
            _ = ticker.tick() => {}
        }

        for w in &mut watched {
            let fresh = match w.scanner.poll().await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("[{}] {e}", w.pipeline.name());
                    continue;
                }
            };
            for path in fresh {
                info!("[{}] new document: {}", w.pipeline.name(), path.display());
                // Let the writer finish before reading.
                tokio::select! {
                    _ = shutdown.wait() => break 'watch,
                    _ = time::sleep(config.debounce()) => {}
                }
                merge(&w.pipeline, &path).await;
                if shutdown.requested().await {
                    break 'watch;
                }
            }
        }
    }

    info!("stopping");
    Ok(())
}
