//! Atomic persistence of workbooks on the local filesystem.
//!
//! A [`MasterStore`] is the single file a pipeline merges into. Every save
//! follows the same sequence:
//!
//! 1. Refuse with [`StorageError::Locked`] if another program holds the
//!    target. Nothing is touched in that case.
//! 2. Write the new encoding to `<file name>.tmp` beside the target and sync
//!    it.
//! 3. If the target exists, copy it over `<stem>_backup.<ext>` (one
//!    generation, replaced on each save).
//! 4. Rename the temporary file over the target.
//!
//! A reader therefore only ever observes the old bytes or the new bytes. If
//! anything fails before the rename the temporary file is removed and the
//! target is unchanged.

mod error;

pub use error::{BackendError, StorageError};

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use log::{debug, info};
use snafu::prelude::*;
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

use crate::workbook::{DocumentFormat, Workbook};

pub(crate) use error::OtherIoSnafu;
use error::{CodecSnafu, LockedSnafu, NotFoundSnafu};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Prefix of the owner-lock file an office suite creates beside an open file.
const OWNER_LOCK_PREFIX: &str = "~$";

/// Windows sharing/lock violations surfaced when a file is open elsewhere.
const WINDOWS_SHARING_VIOLATION: i32 = 32;
const WINDOWS_LOCK_VIOLATION: i32 = 33;

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Keep the file; call after it has been renamed into place.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best effort; an error is usually already being returned.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Location of a persistent master workbook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterStore {
    path: PathBuf,
}

/// What a successful save did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    /// Bytes written to the target.
    pub bytes: usize,
    /// Backup refreshed from the previous target, if there was one.
    pub backup: Option<PathBuf>,
}

impl MasterStore {
    /// A store persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MasterStore { path: path.into() }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Single-generation backup: `<stem>_backup.<ext>` in the same directory.
    pub fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_stem()
            .map(OsString::from)
            .unwrap_or_default();
        name.push("_backup");
        if let Some(ext) = self.path.extension() {
            name.push(".");
            name.push(ext);
        }
        self.path.with_file_name(name)
    }

    /// Temporary file the next save is staged in: `<file name>.tmp`.
    pub fn temp_path(&self) -> PathBuf {
        self.sibling("", ".tmp")
    }

    fn owner_lock_path(&self) -> PathBuf {
        self.sibling(OWNER_LOCK_PREFIX, "")
    }

    fn sibling(&self, prefix: &str, suffix: &str) -> PathBuf {
        let mut name = OsString::from(prefix);
        if let Some(file_name) = self.path.file_name() {
            name.push(file_name);
        }
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }

    /// True when another program holds the target open.
    ///
    /// Detected by an office owner-lock sibling (`~$<file name>`) or by a
    /// read-write open of the target failing with a permission or sharing
    /// error. A missing target is never locked.
    pub async fn is_locked(&self) -> StorageResult<bool> {
        let owner_lock = self.owner_lock_path();
        if fs::try_exists(&owner_lock)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: owner_lock.display().to_string(),
            })?
        {
            return Ok(true);
        }

        match OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
        {
            Ok(_) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) if is_lock_error(&e) => Ok(true),
            Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                path: self.display(),
            }),
        }
    }

    /// Load the workbook, or `None` when the target does not exist yet.
    pub async fn load(&self) -> StorageResult<Option<Workbook>> {
        match read_workbook(&self.path).await {
            Ok(wb) => Ok(Some(wb)),
            Err(StorageError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist `workbook` atomically, refreshing the backup first.
    pub async fn save(&self, workbook: &Workbook) -> StorageResult<SaveReport> {
        let staged = self.stage(workbook).await?;
        let backup = self.rotate_backup().await?;
        let bytes = staged.len;
        staged.commit().await?;

        info!("saved {} ({bytes} bytes)", self.display());
        Ok(SaveReport { bytes, backup })
    }

    /// Copy the current target over the backup, if the target exists.
    async fn rotate_backup(&self) -> StorageResult<Option<PathBuf>> {
        let backup = self.backup_path();
        match fs::copy(&self.path, &backup).await {
            Ok(_) => {
                debug!("backup refreshed: {}", backup.display());
                Ok(Some(backup))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                path: backup.display().to_string(),
            }),
        }
    }

    /// Check the lock, then write and sync the encoded workbook to the
    /// temporary file. The target is not touched until [`StagedWrite::commit`].
    pub(crate) async fn stage(&self, workbook: &Workbook) -> StorageResult<StagedWrite> {
        ensure!(
            !self.is_locked().await?,
            LockedSnafu {
                path: self.display()
            }
        );

        let format = DocumentFormat::from_path(&self.path);
        let base = match format {
            DocumentFormat::Spreadsheet => self.read_existing().await?,
            DocumentFormat::Json => None,
        };
        let bytes = workbook
            .encode(format, base.as_deref())
            .context(CodecSnafu {
                path: self.display(),
            })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: parent.display().to_string(),
                })?;
        }

        let tmp_path = self.temp_path();
        let guard = TempFileGuard::new(tmp_path.clone());

        {
            let mut file = fs::File::create(&tmp_path)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: tmp_path.display().to_string(),
                })?;

            file.write_all(&bytes)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: tmp_path.display().to_string(),
                })?;

            file.sync_all()
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: tmp_path.display().to_string(),
                })?;
        }

        Ok(StagedWrite {
            target: self.path.clone(),
            len: bytes.len(),
            guard,
        })
    }
}

impl MasterStore {
    /// Current bytes of the target, or `None` when it does not exist.
    async fn read_existing(&self) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                path: self.display(),
            }),
        }
    }
}

/// A synced temporary file waiting to be renamed over its target.
///
/// Dropping it without committing removes the temporary file.
pub(crate) struct StagedWrite {
    target: PathBuf,
    len: usize,
    guard: TempFileGuard,
}

impl StagedWrite {
    /// Rename the temporary file over the target.
    pub(crate) async fn commit(mut self) -> StorageResult<()> {
        fs::rename(&self.guard.path, &self.target)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: self.target.display().to_string(),
            })?;

        self.guard.disarm();
        Ok(())
    }
}

fn is_lock_error(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    cfg!(windows)
        && matches!(
            e.raw_os_error(),
            Some(WINDOWS_SHARING_VIOLATION | WINDOWS_LOCK_VIOLATION)
        )
}

/// Read and decode a workbook from `path`, in the encoding its extension
/// implies.
///
/// A missing file yields [`StorageError::NotFound`].
pub async fn read_workbook(path: &Path) -> StorageResult<Workbook> {
    let path_str = path.display().to_string();
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(BackendError::Local(e)).context(NotFoundSnafu { path: path_str });
        }
        Err(e) => return Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str }),
    };

    Workbook::decode(DocumentFormat::from_path(path), &bytes).context(CodecSnafu { path: path_str })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::CellValue;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn sample(marker: f64) -> Workbook {
        let mut wb = Workbook::new();
        let (sheet, _) = wb.sheet_or_create("march");
        sheet.set(3, 4, CellValue::Number(marker));
        wb
    }

    #[test]
    fn sibling_paths_follow_target_name() {
        let store = MasterStore::new("/data/CPU_update.json");
        assert_eq!(store.backup_path(), PathBuf::from("/data/CPU_update_backup.json"));
        assert_eq!(store.temp_path(), PathBuf::from("/data/CPU_update.json.tmp"));
        assert_eq!(store.owner_lock_path(), PathBuf::from("/data/~$CPU_update.json"));

        let bare = MasterStore::new("store");
        assert_eq!(bare.backup_path(), PathBuf::from("store_backup"));
    }

    #[tokio::test]
    async fn load_missing_target_is_none() -> TestResult {
        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("master.json"));
        assert!(store.load().await?.is_none());
        assert!(!store.is_locked().await?);
        Ok(())
    }

    #[tokio::test]
    async fn first_save_writes_target_without_backup() -> TestResult {
        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("master.json"));

        let report = store.save(&sample(1.0)).await?;

        assert_eq!(report.backup, None);
        assert!(!store.backup_path().exists());
        assert!(!store.temp_path().exists());
        assert_eq!(store.load().await?, Some(sample(1.0)));
        Ok(())
    }

    #[tokio::test]
    async fn save_refreshes_backup_with_previous_bytes() -> TestResult {
        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("master.json"));

        store.save(&sample(1.0)).await?;
        let before = tokio::fs::read(store.path()).await?;
        store.save(&sample(2.0)).await?;
        store.save(&sample(3.0)).await?;

        let backup = tokio::fs::read(store.backup_path()).await?;
        assert_ne!(backup, before);
        assert_eq!(Workbook::from_json_slice(&backup)?, sample(2.0));
        assert_eq!(store.load().await?, Some(sample(3.0)));
        Ok(())
    }

    #[tokio::test]
    async fn uncommitted_stage_leaves_target_and_removes_temp() -> TestResult {
        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("master.json"));
        store.save(&sample(1.0)).await?;
        let before = tokio::fs::read(store.path()).await?;

        let staged = store.stage(&sample(9.0)).await?;
        assert!(store.temp_path().exists());
        drop(staged);

        assert!(!store.temp_path().exists());
        assert_eq!(tokio::fs::read(store.path()).await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn owner_lock_refuses_save_and_touches_nothing() -> TestResult {
        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("master.json"));
        store.save(&sample(1.0)).await?;
        let before = tokio::fs::read(store.path()).await?;
        tokio::fs::write(tmp.path().join("~$master.json"), b"owner").await?;

        assert!(store.is_locked().await?);
        let err = store
            .save(&sample(2.0))
            .await
            .expect_err("save must refuse a locked target");

        assert!(err.is_locked());
        assert_eq!(tokio::fs::read(store.path()).await?, before);
        assert!(!store.backup_path().exists());
        assert!(!store.temp_path().exists());
        Ok(())
    }

    #[test]
    fn permission_and_sharing_errors_count_as_locks() {
        assert!(is_lock_error(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_lock_error(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_lock_error(&io::Error::from(io::ErrorKind::InvalidData)));
        assert_eq!(
            is_lock_error(&io::Error::from_raw_os_error(WINDOWS_SHARING_VIOLATION)),
            cfg!(windows)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn read_only_target_is_locked() -> TestResult {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("master.json"));
        store.save(&sample(1.0)).await?;
        std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o444))?;

        // Privileged users open read-only files for writing anyway.
        if std::fs::OpenOptions::new().write(true).open(store.path()).is_ok() {
            return Ok(());
        }

        assert!(store.is_locked().await?);
        let err = store.save(&sample(2.0)).await.expect_err("read-only target");
        assert!(err.is_locked());
        assert_eq!(store.load().await?, Some(sample(1.0)));
        Ok(())
    }

    #[tokio::test]
    async fn spreadsheet_target_is_saved_as_xlsx_and_backed_up() -> TestResult {
        let tmp = TempDir::new()?;
        let store = MasterStore::new(tmp.path().join("CPU_update.xlsm"));

        store.save(&sample(1.0)).await?;
        store.save(&sample(2.0)).await?;

        let bytes = tokio::fs::read(store.path()).await?;
        assert!(bytes.starts_with(b"PK"));
        assert_eq!(store.load().await?, Some(sample(2.0)));
        let backup = tokio::fs::read(store.backup_path()).await?;
        assert_eq!(Workbook::from_xlsx_slice(&backup)?, sample(1.0));
        Ok(())
    }

    #[tokio::test]
    async fn read_workbook_reports_missing_and_corrupt_files() -> TestResult {
        let tmp = TempDir::new()?;
        let missing = tmp.path().join("nope.json");
        let err = read_workbook(&missing).await.expect_err("missing file");
        assert!(matches!(err, StorageError::NotFound { .. }));

        let corrupt = tmp.path().join("bad.json");
        tokio::fs::write(&corrupt, b"{ not json").await?;
        let err = read_workbook(&corrupt).await.expect_err("corrupt file");
        assert!(matches!(err, StorageError::Codec { .. }));
        Ok(())
    }
}
