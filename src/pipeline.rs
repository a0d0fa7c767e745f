//! Save-and-restore pipeline.
//!
//! The original package is extracted into a scratch area before the external
//! save runs, so the source and destination may be the same file. The
//! destination is only rewritten with the restored package after every
//! restorer has succeeded.

use crate::container::{extract_archive, write_package};
use crate::detect::detect_kind_from_path;
use crate::error::{Error, Result};
use crate::package::DirStore;
use crate::restore::{reconcile, RestoreMode, RestoreReport};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The black-box save that produces the rewritten package.
pub trait PackageSaver {
    /// Write the package to `dest`.
    fn save(&self, dest: &Path) -> Result<()>;
}

impl<F> PackageSaver for F
where
    F: Fn(&Path) -> Result<()>,
{
    fn save(&self, dest: &Path) -> Result<()> {
        self(dest)
    }
}

/// Options for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Which families to restore
    pub mode: RestoreMode,

    /// Leave the scratch area on disk after the run
    pub keep_scratch: bool,

    /// Directory the scratch area is created in (None = system temp dir)
    pub scratch_parent: Option<PathBuf>,

    /// Name prefix of the scratch directory
    pub scratch_prefix: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            mode: RestoreMode::default(),
            keep_scratch: false,
            scratch_parent: None,
            scratch_prefix: "temp_".to_string(),
        }
    }
}

impl PipelineOptions {
    /// Create new pipeline options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the restore mode.
    pub fn with_mode(mut self, mode: RestoreMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keep the scratch area for diagnostics.
    pub fn with_keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    /// Create the scratch area under `dir`.
    pub fn with_scratch_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    /// Set the scratch directory name prefix.
    pub fn with_scratch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.scratch_prefix = prefix.into();
        self
    }
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// What was restored; `None` for a plain save.
    pub report: Option<RestoreReport>,

    /// The retained scratch area, when retention was requested.
    pub scratch_dir: Option<PathBuf>,
}

/// Run `work` inside a fresh scratch directory, removed afterwards unless
/// `options.keep_scratch` is set. Retention applies on failure too.
fn with_scratch<T>(
    options: &PipelineOptions,
    work: impl FnOnce(&Path) -> Result<T>,
) -> Result<(T, Option<PathBuf>)> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(&options.scratch_prefix);
    let dir = match &options.scratch_parent {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)?
        }
        None => builder.tempdir()?,
    };
    debug!(scratch = %dir.path().display(), "created scratch area");

    let result = work(dir.path());

    let kept = if options.keep_scratch {
        let path = dir.keep();
        info!(scratch = %path.display(), "keeping scratch area");
        Some(path)
    } else {
        if let Err(e) = dir.close() {
            warn!(error = %e, "failed to remove scratch area");
        }
        None
    };

    result.map(|value| (value, kept))
}

fn save_to(saver: &dyn PackageSaver, dest: &Path) -> Result<()> {
    info!(dest = %dest.display(), "saving package");
    saver.save(dest)?;
    if !dest.is_file() {
        return Err(Error::Save(format!(
            "no package was written to {}",
            dest.display()
        )));
    }
    Ok(())
}

/// Save through `saver` to `dest`, then restore what the save dropped from
/// `src` and rewrite `dest` with the restored package.
///
/// # Example
///
/// ```no_run
/// use xlsx_mend::pipeline::{save_with_restoration, PipelineOptions};
/// use xlsx_mend::workbook::Workbook;
///
/// let workbook = Workbook::open("book.xlsx")?;
/// let outcome = save_with_restoration(&workbook, "book.xlsx", "out.xlsx", &PipelineOptions::new())?;
/// # Ok::<(), xlsx_mend::Error>(())
/// ```
pub fn save_with_restoration(
    saver: &dyn PackageSaver,
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: &PipelineOptions,
) -> Result<PipelineOutcome> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    let kind = detect_kind_from_path(src)?;
    info!(src = %src.display(), %kind, mode = %options.mode, "starting restoration pipeline");

    let (report, scratch_dir) = with_scratch(options, |scratch| {
        info!("extracting original package");
        let mut original = DirStore::create(scratch.join("before"))?;
        let count = extract_archive(src, &mut original)?;
        debug!(parts = count, "original extracted");

        save_to(saver, dest)?;

        info!("extracting rewritten package");
        let mut working = DirStore::create(scratch.join("after"))?;
        let count = extract_archive(dest, &mut working)?;
        debug!(parts = count, "rewritten package extracted");

        let report = reconcile(&original, &mut working, options.mode)?;

        info!(dest = %dest.display(), "recompressing package");
        write_package(&working, dest)?;
        Ok(report)
    })?;

    Ok(PipelineOutcome {
        report: Some(report),
        scratch_dir,
    })
}

/// Save through `saver` to `dest` with no restoration.
///
/// With `keep_scratch`, the original is still extracted into a retained
/// scratch area so the two packages can be compared by hand.
pub fn save_plain(
    saver: &dyn PackageSaver,
    src: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    options: &PipelineOptions,
) -> Result<PipelineOutcome> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    let kind = detect_kind_from_path(src)?;
    info!(src = %src.display(), %kind, "plain save");

    if !options.keep_scratch {
        save_to(saver, dest)?;
        return Ok(PipelineOutcome {
            report: None,
            scratch_dir: None,
        });
    }

    let ((), scratch_dir) = with_scratch(options, |scratch| {
        let mut original = DirStore::create(scratch.join("before"))?;
        extract_archive(src, &mut original)?;
        save_to(saver, dest)
    })?;

    Ok(PipelineOutcome {
        report: None,
        scratch_dir,
    })
}
