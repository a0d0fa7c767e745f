//! Reconciliation of a lossy save against the original package.
//!
//! [`reconcile`] runs the restorers over two part stores, `original` (read
//! only) and `working` (the rewritten package, mutated in place), in a fixed
//! order:
//!
//! 1. diagrams and media folders ([`folders`])
//! 2. drawings, and in [`RestoreMode::Comments`] the comment parts ([`comments`])
//! 3. worksheet relationship graph ([`graph`])
//! 4. worksheet extension lists ([`ext_lst`])
//! 5. content type declarations ([`crate::content_types`])

pub mod comments;
pub mod ext_lst;
pub mod folders;
pub mod graph;

use crate::content_types::{sync_content_types, ContentTypeChanges};
use crate::error::{Error, Result};
use crate::package::PartStore;
use crate::relationships::RelationshipFamily;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub use ext_lst::ExtensionListRestore;
pub use graph::{MergedRelationship, WorksheetMerge};

/// Which parts a lossy save is expected to damage, and so which get restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    /// Drawing parts are restored file by file; comments are left to the save.
    Drawings,
    /// The whole drawings folder is replaced and original comments reinstated.
    #[default]
    Comments,
}

impl RestoreMode {
    /// Relationship families re-admitted by the graph merge.
    pub fn tracked_families(self) -> &'static [RelationshipFamily] {
        match self {
            RestoreMode::Drawings => &[RelationshipFamily::Drawing],
            RestoreMode::Comments => &[
                RelationshipFamily::Drawing,
                RelationshipFamily::Vml,
                RelationshipFamily::Comment,
            ],
        }
    }

    pub fn tracks(self, family: RelationshipFamily) -> bool {
        self.tracked_families().contains(&family)
    }

    /// Whether relationships the save generated for its own comments are
    /// removed, along with stale `legacyDrawing` references.
    pub fn purges_synthesized(self) -> bool {
        self == RestoreMode::Comments
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RestoreMode::Drawings => "drawings",
            RestoreMode::Comments => "comments",
        }
    }
}

impl fmt::Display for RestoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestoreMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "drawings" => Ok(RestoreMode::Drawings),
            "comments" => Ok(RestoreMode::Comments),
            other => Err(Error::InvalidData(format!("unknown restore mode '{other}'"))),
        }
    }
}

/// A folder copied from the original package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FolderRestore {
    pub folder: String,
    pub replaced: bool,
    pub parts_copied: usize,
}

/// Everything a reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub mode: RestoreMode,
    pub folders: Vec<FolderRestore>,
    /// Drawing parts copied one by one ([`RestoreMode::Drawings`] only).
    pub drawing_parts: usize,
    /// Comment parts reinstated ([`RestoreMode::Comments`] only).
    pub comment_parts: usize,
    pub worksheets: Vec<WorksheetMerge>,
    pub extension_lists: Vec<ExtensionListRestore>,
    pub content_types: ContentTypeChanges,
}

impl RestoreReport {
    fn new(mode: RestoreMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Total number of parts copied from the original package.
    pub fn parts_restored(&self) -> usize {
        self.folders.iter().map(|f| f.parts_copied).sum::<usize>()
            + self.drawing_parts
            + self.comment_parts
    }

    /// Relationships added across all worksheets.
    pub fn relationships_admitted(&self) -> usize {
        self.worksheets.iter().map(|w| w.admitted.len()).sum()
    }

    /// Serialize the report as JSON.
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

fn restore_folder_step(
    original: &dyn PartStore,
    working: &mut dyn PartStore,
    folder: &str,
    replace: bool,
    report: &mut RestoreReport,
) -> Result<()> {
    let parts_copied = folders::restore_folder(original, working, folder, replace)?;
    if parts_copied > 0 {
        report.folders.push(FolderRestore {
            folder: folder.to_string(),
            replaced: replace,
            parts_copied,
        });
    }
    Ok(())
}

/// Restore into `working` what the save dropped from `original`.
///
/// The first fatal condition aborts the run; `working` may then be partially
/// restored and should not be packaged.
pub fn reconcile(
    original: &dyn PartStore,
    working: &mut dyn PartStore,
    mode: RestoreMode,
) -> Result<RestoreReport> {
    let mut report = RestoreReport::new(mode);

    info!(%mode, "restoring folders");
    restore_folder_step(original, working, "xl/diagrams/", false, &mut report)?;
    restore_folder_step(original, working, "xl/media/", false, &mut report)?;

    match mode {
        RestoreMode::Drawings => {
            info!("restoring drawing parts");
            report.drawing_parts = folders::restore_drawing_parts(original, working)?;
        }
        RestoreMode::Comments => {
            info!("restoring drawings folder and comments");
            restore_folder_step(original, working, "xl/drawings/", true, &mut report)?;
            report.comment_parts = comments::restore_comments(original, working)?;
        }
    }

    info!("merging worksheet relationships");
    report.worksheets = graph::merge_relationship_graph(original, working, mode)?;

    info!("restoring extension lists");
    report.extension_lists = ext_lst::restore_extension_lists(original, working)?;

    info!("synchronizing content types");
    report.content_types = sync_content_types(working, mode == RestoreMode::Comments)?;

    info!(
        parts = report.parts_restored(),
        relationships = report.relationships_admitted(),
        "reconciliation finished"
    );
    Ok(report)
}
