use std::{error::Error, fmt, io};

use snafu::{Backtrace, prelude::*};

use crate::workbook::CodecError;

/// Errors produced by the storage backend implementation.
///
/// Only the local filesystem is supported; its I/O errors are wrapped here so
/// [`StorageError`] variants can attach the path they occurred at.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur while reading or persisting a workbook.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The target is held open by another program; nothing was written.
    #[snafu(display("Workbook is locked by another program: {path}"))]
    Locked {
        /// The locked target.
        path: String,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend I/O error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The file exists but does not hold a valid workbook encoding.
    #[snafu(display("Invalid workbook encoding in {path}: {source}"))]
    Codec {
        /// The offending file.
        path: String,
        /// Underlying decode/encode error.
        source: CodecError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

impl StorageError {
    /// True for [`StorageError::Locked`].
    pub fn is_locked(&self) -> bool {
        matches!(self, StorageError::Locked { .. })
    }
}
