//! Merge engine for well time-series workbooks.
//!
//! Dated source documents carry one day of per-well readings. This crate
//! merges each of them into a persistent master workbook that accumulates a
//! time series per well:
//!
//! - An owned, sparse grid model shared by master stores and sources
//!   (`workbook` module).
//! - Mapping a date to its time block, creating the block when missing, for
//!   a column-major (month sheets, 9-column blocks) and a row-major (year
//!   sheets, one row per day) layout (`date_axis` module).
//! - Reconciling well records against a block without duplication or loss
//!   (`upsert` module).
//! - Synthesizing derived-ratio formulas and relocating formulas into newly
//!   inserted rows (`formula` module).
//! - Backup, lock detection and write-then-rename persistence (`storage`
//!   module).
//! - Typed record extraction from source documents (`extract` module), the
//!   single-document pipeline (`ingest` module), pipeline configuration
//!   (`config` module) and directory scanning (`watch` module).
//!
//! The binary crate wires these into a command line tool that watches
//! directories and merges new documents as they appear.
#![deny(missing_docs)]
pub mod config;
pub mod date_axis;
pub mod extract;
pub mod formula;
pub mod ingest;
pub mod storage;
pub mod upsert;
pub mod watch;
pub mod workbook;

#[cfg(test)]
pub(crate) mod test_util;
