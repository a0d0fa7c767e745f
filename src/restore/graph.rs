//! Worksheet relationship-graph merge.
//!
//! For every worksheet relationship part in the original package, the entries
//! whose family the [`RestoreMode`] tracks are re-admitted into the rewritten
//! collection under fresh identifiers, and the matching back-reference element
//! (`drawing`, `legacyDrawing`) is inserted into the worksheet body at the
//! position the consuming application requires.

use super::RestoreMode;
use crate::error::{Error, Result};
use crate::package::PartStore;
use crate::relationships::{
    is_synthesized_comment_target, part_for_rels, resolve_path, IdAllocator, Relationship,
    RelationshipFamily, Relationships, OFFICE_REL_NS,
};
use crate::xml::{Element, XmlDocument};
use serde::Serialize;
use tracing::{debug, warn};

const WORKSHEET_RELS_FOLDER: &str = "xl/worksheets/_rels/";

/// Trailing worksheet children, in the order the schema requires them.
pub const WORKSHEET_TAIL: [&str; 10] = [
    "drawing",
    "legacyDrawing",
    "legacyDrawingHF",
    "drawingHF",
    "picture",
    "oleObjects",
    "controls",
    "webPublishItems",
    "tableParts",
    "extLst",
];

/// Elements that must come after `local` in a worksheet body.
fn followers_of(local: &str) -> &'static [&'static str] {
    WORKSHEET_TAIL
        .iter()
        .position(|name| *name == local)
        .map_or(&[][..], |pos| &WORKSHEET_TAIL[pos + 1..])
}

/// One relationship carried over from the original package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedRelationship {
    pub family: RelationshipFamily,
    /// Identifier in the rewritten collection.
    pub id: String,
    /// Target resolved to a part name.
    pub target: String,
}

/// What the merge did to one worksheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorksheetMerge {
    pub worksheet: String,
    /// Relationships added under freshly allocated identifiers.
    pub admitted: Vec<MergedRelationship>,
    /// Relationships already present in the rewritten collection.
    pub reused: Vec<MergedRelationship>,
    /// Synthesized comment relationships removed.
    pub purged: usize,
    /// Stale `legacyDrawing` elements removed from the body.
    pub stale_references_removed: usize,
    /// Back-reference elements inserted into the body.
    pub references_inserted: usize,
}

impl WorksheetMerge {
    fn new(worksheet: &str) -> Self {
        Self {
            worksheet: worksheet.to_string(),
            ..Self::default()
        }
    }
}

/// Merge the tracked relationship families of every original worksheet into
/// `working`. Worksheets without tracked entries are not touched.
pub fn merge_relationship_graph(
    original: &dyn PartStore,
    working: &mut dyn PartStore,
    mode: RestoreMode,
) -> Result<Vec<WorksheetMerge>> {
    let mut merges = Vec::new();

    for rels_part in original.files_in_folder(WORKSHEET_RELS_FOLDER)? {
        if !rels_part.ends_with(".xml.rels") {
            continue;
        }
        let Some(sheet_part) = part_for_rels(&rels_part) else {
            continue;
        };

        let original_rels = Relationships::parse(&original.read_part(&rels_part)?, &rels_part)?;
        let preserved = tracked_relationships(&original_rels, &sheet_part, mode);
        if preserved.is_empty() {
            continue;
        }

        let merge = merge_worksheet(working, &sheet_part, &rels_part, &preserved, mode)?;
        merges.push(merge);
    }

    Ok(merges)
}

/// Entries of `rels` whose family `mode` tracks, in document order.
fn tracked_relationships<'a>(
    rels: &'a Relationships,
    sheet_part: &str,
    mode: RestoreMode,
) -> Vec<(RelationshipFamily, &'a Relationship)> {
    rels.iter()
        .filter(|rel| !rel.is_external())
        .map(|rel| {
            let family = RelationshipFamily::classify(&resolve_path(sheet_part, &rel.target));
            (family, rel)
        })
        .filter(|(family, _)| mode.tracks(*family))
        .collect()
}

fn merge_worksheet(
    working: &mut dyn PartStore,
    sheet_part: &str,
    rels_part: &str,
    preserved: &[(RelationshipFamily, &Relationship)],
    mode: RestoreMode,
) -> Result<WorksheetMerge> {
    let mut rels = match working.read_part_opt(rels_part)? {
        Some(bytes) => Relationships::parse(&bytes, rels_part)?,
        None => Relationships::new(),
    };
    let sheet_bytes = working
        .read_part_opt(sheet_part)?
        .ok_or_else(|| Error::MissingComponent(sheet_part.to_string()))?;
    let mut sheet = XmlDocument::parse(&sheet_bytes, sheet_part)?;

    let mut merge = WorksheetMerge::new(sheet_part);
    let mut ids = IdAllocator::for_collection(&rels);

    if mode.purges_synthesized() {
        merge.purged = rels.retain(|rel| {
            rel.is_external() || !is_synthesized_comment_target(&resolve_path(sheet_part, &rel.target))
        });
        merge.stale_references_removed = sheet.root.remove_children("legacyDrawing");
    }

    let (prefix, declared) = ensure_relationship_prefix(&mut sheet.root);
    let id_attribute = format!("{prefix}:id");

    for (family, original_rel) in preserved {
        let target = resolve_path(sheet_part, &original_rel.target);

        let existing = rels
            .iter()
            .find(|rel| {
                !rel.is_external()
                    && rel.rel_type == original_rel.rel_type
                    && resolve_path(sheet_part, &rel.target) == target
            })
            .map(|rel| rel.id.clone());

        let record = |id: String| MergedRelationship {
            family: *family,
            id,
            target: target.clone(),
        };

        let id = match existing {
            Some(id) => {
                warn!(worksheet = sheet_part, %id, %target, "relationship already present, reusing it");
                merge.reused.push(record(id.clone()));
                id
            }
            None => {
                let id = ids.next_id();
                rels.add(Relationship {
                    id: id.clone(),
                    ..(*original_rel).clone()
                });
                debug!(worksheet = sheet_part, %id, family = %family, %target, "admitted relationship");
                merge.admitted.push(record(id.clone()));
                id
            }
        };

        let Some(element) = family.back_reference() else {
            continue;
        };
        let referenced = sheet
            .root
            .child_elements()
            .any(|e| e.local_name() == element && e.attribute(&id_attribute) == Some(id.as_str()));
        if !referenced {
            let name = match sheet.root.prefix() {
                Some(p) => format!("{p}:{element}"),
                None => element.to_string(),
            };
            let reference = Element::new(name).with_attribute(id_attribute.as_str(), id);
            sheet.root.insert_before_first_of(reference, followers_of(element));
            merge.references_inserted += 1;
        }
    }

    let rels_changed = merge.purged > 0 || !merge.admitted.is_empty();
    let sheet_changed = merge.stale_references_removed > 0 || merge.references_inserted > 0;

    if rels_changed {
        working.write_part(rels_part, &rels.to_bytes()?)?;
    }
    if sheet_changed {
        if declared {
            debug!(worksheet = sheet_part, prefix = %prefix, "declared relationship namespace");
        }
        working.write_part(sheet_part, &sheet.to_bytes()?)?;
    }

    Ok(merge)
}

/// Prefix bound to the office relationships namespace on `root`, declaring one
/// when absent. The flag tells whether a declaration was added.
fn ensure_relationship_prefix(root: &mut Element) -> (String, bool) {
    if let Some(Some(prefix)) = root.namespace_prefix_for(OFFICE_REL_NS) {
        return (prefix, false);
    }

    let mut prefix = "r".to_string();
    let mut n = 1;
    while root.attribute(&format!("xmlns:{prefix}")).is_some() {
        prefix = format!("r{n}");
        n += 1;
    }
    root.declare_namespace(Some(&prefix), OFFICE_REL_NS);
    (prefix, true)
}
