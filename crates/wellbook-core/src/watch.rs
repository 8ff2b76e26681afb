//! Finding source documents in a watched directory.
//!
//! Detection is polling-based: a [`DirectoryScanner`] lists the directory on
//! demand and reports file names it has not seen before. Names present when
//! the scanner is primed count as seen, and every name is reported at most
//! once for the scanner's lifetime.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::SystemTime,
};

use log::debug;
use snafu::prelude::*;
use tokio::fs;

use crate::storage::{BackendError, OtherIoSnafu, StorageResult};

/// Which files in a watched directory are source documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFilter {
    prefix: String,
    extension: String,
}

impl SourceFilter {
    /// Match names starting with `prefix` and ending with `.<extension>`.
    pub fn new(prefix: impl Into<String>, extension: impl AsRef<str>) -> Self {
        SourceFilter {
            prefix: prefix.into(),
            extension: format!(".{}", extension.as_ref().trim_start_matches('.')),
        }
    }

    /// True when `name` is a source document name.
    pub fn matches(&self, name: &str) -> bool {
        name.starts_with(&self.prefix) && name.ends_with(&self.extension)
    }
}

struct Candidate {
    name: String,
    path: PathBuf,
    stamp: SystemTime,
}

async fn list_sources(dir: &Path, filter: &SourceFilter) -> StorageResult<Vec<Candidate>> {
    let io_context = || OtherIoSnafu {
        path: dir.display().to_string(),
    };

    let mut entries = fs::read_dir(dir)
        .await
        .map_err(BackendError::Local)
        .context(io_context())?;

    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(BackendError::Local)
        .context(io_context())?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !filter.matches(&name) {
            continue;
        }
        let meta = entry
            .metadata()
            .await
            .map_err(BackendError::Local)
            .context(io_context())?;
        if !meta.is_file() {
            continue;
        }
        let stamp = meta
            .created()
            .or_else(|_| meta.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        found.push(Candidate {
            name,
            path: entry.path(),
            stamp,
        });
    }
    Ok(found)
}

/// Newest matching document in `dir`.
///
/// Ordered by creation time, falling back to modification time where the
/// platform does not record creation. Ties go to the greater file name.
pub async fn latest_source(dir: &Path, filter: &SourceFilter) -> StorageResult<Option<PathBuf>> {
    let candidates = list_sources(dir, filter).await?;
    Ok(candidates
        .into_iter()
        .max_by(|a, b| a.stamp.cmp(&b.stamp).then_with(|| a.name.cmp(&b.name)))
        .map(|c| c.path))
}

/// Reports documents that appear in a directory after it was primed.
#[derive(Debug)]
pub struct DirectoryScanner {
    dir: PathBuf,
    filter: SourceFilter,
    seen: HashSet<String>,
}

impl DirectoryScanner {
    /// Record every matching name currently in `dir` as seen.
    pub async fn prime(dir: impl Into<PathBuf>, filter: SourceFilter) -> StorageResult<Self> {
        let dir = dir.into();
        let seen: HashSet<String> = list_sources(&dir, &filter)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();
        debug!("{}: {} existing documents", dir.display(), seen.len());
        Ok(DirectoryScanner { dir, filter, seen })
    }

    /// Watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Matching names that were not seen before, in name order.
    ///
    /// Each returned name is marked seen and will not be reported again.
    pub async fn poll(&mut self) -> StorageResult<Vec<PathBuf>> {
        let mut fresh: Vec<Candidate> = list_sources(&self.dir, &self.filter)
            .await?
            .into_iter()
            .filter(|c| !self.seen.contains(&c.name))
            .collect();
        fresh.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(fresh
            .into_iter()
            .map(|c| {
                debug!("new document: {}", c.name);
                self.seen.insert(c.name);
                c.path
            })
            .collect())
    }
}
