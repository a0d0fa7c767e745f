//! # xlsx-mend
//!
//! Restore what a lossy spreadsheet save dropped.
//!
//! Some OOXML writers load a workbook, change a cell, and save a package that
//! has silently lost drawings, diagrams, media, rich comments or worksheet
//! extension lists. This library extracts the original package, lets the save
//! run, then merges the missing parts back, re-wires the worksheet
//! relationships, and fixes the content type manifest before repackaging.
//!
//! ## Quick Start
//!
//! ```no_run
//! use xlsx_mend::{stamp_datetime, PipelineOptions};
//!
//! let now = chrono::Local::now().naive_local();
//! let outcome = stamp_datetime("book.xlsx", "out.xlsx", "B1", now, &PipelineOptions::default())?;
//! if let Some(report) = outcome.report {
//!     println!("{}", report.to_json(true)?);
//! }
//! # Ok::<(), xlsx_mend::Error>(())
//! ```
//!
//! ## Working on part stores
//!
//! ```no_run
//! use xlsx_mend::container::extract_archive;
//! use xlsx_mend::package::MemoryStore;
//! use xlsx_mend::restore::{reconcile, RestoreMode};
//!
//! let mut original = MemoryStore::new();
//! extract_archive("before.xlsx", &mut original)?;
//! let mut working = MemoryStore::new();
//! extract_archive("after.xlsx", &mut working)?;
//!
//! let report = reconcile(&original, &mut working, RestoreMode::Comments)?;
//! # Ok::<(), xlsx_mend::Error>(())
//! ```

pub mod container;
pub mod content_types;
pub mod detect;
pub mod error;
pub mod package;
pub mod pipeline;
pub mod relationships;
pub mod restore;
pub mod workbook;
pub mod xml;

// Re-exports
pub use container::OoxmlContainer;
pub use detect::{detect_kind_from_bytes, detect_kind_from_path, SpreadsheetKind};
pub use error::{Error, Result};
pub use package::{DirStore, MemoryStore, PartStore};
pub use pipeline::{save_plain, save_with_restoration, PackageSaver, PipelineOptions, PipelineOutcome};
pub use relationships::{IdAllocator, Relationship, RelationshipFamily, Relationships};
pub use restore::{reconcile, RestoreMode, RestoreReport};
pub use workbook::Workbook;

use chrono::NaiveDateTime;
use std::path::Path;

/// Write `when` into `cell` of the first worksheet of `src`, save to `dest`,
/// and restore what the save dropped.
pub fn stamp_datetime(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    cell: &str,
    when: NaiveDateTime,
    options: &PipelineOptions,
) -> Result<PipelineOutcome> {
    let src = src.as_ref();
    detect_kind_from_path(src)?;
    let mut workbook = Workbook::open(src)?;
    workbook.set_datetime(cell, when)?;
    save_with_restoration(&workbook, src, dest, options)
}

/// Load `src` and save it to `dest` without any change or restoration.
pub fn resave(
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: &PipelineOptions,
) -> Result<PipelineOutcome> {
    let src = src.as_ref();
    detect_kind_from_path(src)?;
    let workbook = Workbook::open(src)?;
    save_plain(&workbook, src, dest, options)
}
