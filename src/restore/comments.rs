//! Reinstate the original comment parts.

use crate::error::Result;
use crate::package::PartStore;
use tracing::debug;

/// Folder a lossy save writes its regenerated comments into.
const SYNTHESIZED_FOLDER: &str = "xl/comments/";

/// Whether `name` is an original comment part (`xl/comments*.xml` directly under `xl/`).
pub fn is_comment_part(name: &str) -> bool {
    name.strip_prefix("xl/")
        .is_some_and(|rest| rest.starts_with("comments") && !rest.contains('/') && rest.ends_with(".xml"))
}

/// Drop the working package's comments folder and copy every original comment
/// part back verbatim. Returns the number of parts reinstated.
pub fn restore_comments(original: &dyn PartStore, working: &mut dyn PartStore) -> Result<usize> {
    let removed = working.remove_folder(SYNTHESIZED_FOLDER)?;
    if removed > 0 {
        debug!(removed, "discarded regenerated comment parts");
    }

    let mut copied = 0;
    for name in original.files_in_folder("xl/")? {
        if is_comment_part(&name) {
            working.copy_part_from(original, &name)?;
            copied += 1;
        }
    }
    debug!(copied, "reinstated comment parts");
    Ok(copied)
}
