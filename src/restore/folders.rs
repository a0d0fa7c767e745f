//! Whole-folder and per-file restoration of binary and drawing parts.

use crate::error::Result;
use crate::package::PartStore;
use tracing::debug;

/// Copy `folder` from `original` into `working`.
///
/// Nothing happens when `original` has no such folder. With `replace`, the
/// working copy of the folder is removed first (a missing folder is fine).
/// The copy only takes place when `working` has no such folder afterwards, so
/// a folder the save kept is left as it is. Returns the number of parts copied.
pub fn restore_folder(
    original: &dyn PartStore,
    working: &mut dyn PartStore,
    folder: &str,
    replace: bool,
) -> Result<usize> {
    if !original.contains_folder(folder)? {
        return Ok(0);
    }

    if replace {
        let removed = working.remove_folder(folder)?;
        debug!(folder, removed, "cleared folder before restore");
    }

    if working.contains_folder(folder)? {
        return Ok(0);
    }

    let parts = original.parts_in_folder(folder)?;
    for name in &parts {
        working.copy_part_from(original, name)?;
    }
    debug!(folder, copied = parts.len(), "restored folder");
    Ok(parts.len())
}

/// Restore the drawing XML parts and their `_rels` from `original`,
/// overwriting what the save wrote under the same names.
///
/// Other files in the working drawings folder (VML the save generated for its
/// own comments, for instance) are left alone.
pub fn restore_drawing_parts(original: &dyn PartStore, working: &mut dyn PartStore) -> Result<usize> {
    const FOLDER: &str = "xl/drawings/";

    let mut copied = 0;
    for name in original.parts_in_folder(FOLDER)? {
        let rest = &name[FOLDER.len()..];
        let is_rels = rest.starts_with("_rels/");
        let is_top_level_xml = !rest.contains('/') && rest.ends_with(".xml");
        if is_rels || is_top_level_xml {
            working.copy_part_from(original, &name)?;
            copied += 1;
        }
    }
    if copied > 0 {
        debug!(copied, "restored drawing parts");
    }
    Ok(copied)
}
