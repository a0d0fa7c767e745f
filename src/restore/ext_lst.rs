//! Reinstate worksheet extension lists (`extLst`) dropped by a lossy save.

use crate::error::{Error, Result};
use crate::package::PartStore;
use crate::xml::{Element, NamespaceBinding, Node, ScopedMatch, XmlDocument};
use serde::Serialize;
use tracing::{debug, warn};

const WORKSHEETS_FOLDER: &str = "xl/worksheets/";
const EXT_LST: &str = "extLst";

/// One extension list placed into a rewritten worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionListRestore {
    pub worksheet: String,
    /// Local name of the element the fragment was placed under.
    pub parent: String,
    /// Which element of that name (0-based, document order) received it.
    pub occurrence: usize,
    /// The original parent was not found and the fragment went under the root.
    pub root_fallback: bool,
    /// Number of `ext` entries (or whole fragments) added.
    pub entries_added: usize,
}

/// Copy every outermost `extLst` of each original worksheet into the matching
/// rewritten worksheet, under the element with the same local name and position as
/// the original parent, or under the root when there is none.
///
/// Entries whose `uri` is already present under the destination are skipped,
/// so replaying the restore does not duplicate anything.
pub fn restore_extension_lists(
    original: &dyn PartStore,
    working: &mut dyn PartStore,
) -> Result<Vec<ExtensionListRestore>> {
    let mut restored = Vec::new();

    for part in original.files_in_folder(WORKSHEETS_FOLDER)? {
        if !part.ends_with(".xml") {
            continue;
        }
        let source = XmlDocument::parse(&original.read_part(&part)?, &part)?;
        let fragments = source.root.collect_outermost(EXT_LST);
        if fragments.is_empty() {
            continue;
        }

        let bytes = working
            .read_part_opt(&part)?
            .ok_or_else(|| Error::MissingComponent(part.clone()))?;
        let mut target = XmlDocument::parse(&bytes, &part)?;

        let mut changed = false;
        for fragment in fragments {
            let record = place_fragment(&mut target, &part, fragment)?;
            changed |= record.entries_added > 0;
            restored.push(record);
        }

        if changed {
            working.write_part(&part, &target.to_bytes()?)?;
        }
    }

    Ok(restored)
}

fn place_fragment(
    target: &mut XmlDocument,
    part: &str,
    fragment: ScopedMatch,
) -> Result<ExtensionListRestore> {
    let root_name = target.root.local_name().to_string();
    let mut destination_scope = target.root.namespace_declarations();

    let mut occurrence = fragment.parent_occurrence;
    let path = if fragment.parent == root_name {
        occurrence = 0;
        Some(Vec::new())
    } else {
        match target
            .root
            .path_to_nth_descendant(&fragment.parent, occurrence, EXT_LST)
        {
            Some(path) => Some(path),
            None if occurrence == 0 => None,
            None => {
                debug!(
                    worksheet = part,
                    parent = %fragment.parent,
                    occurrence,
                    "matching parent not found, using the first one"
                );
                occurrence = 0;
                target.root.path_to_nth_descendant(&fragment.parent, 0, EXT_LST)
            }
        }
    };
    let root_fallback = path.is_none();
    if root_fallback {
        warn!(
            worksheet = part,
            parent = %fragment.parent,
            "parent of extension list not found, appending under the root"
        );
    }

    let path = path.unwrap_or_default();

    let mut node = &target.root;
    for &idx in &path {
        if let Some(Node::Element(child)) = node.children.get(idx) {
            destination_scope.extend(child.namespace_declarations());
            node = child;
        }
    }

    let parent = target
        .root
        .at_path_mut(&path)
        .ok_or_else(|| Error::InvalidData(format!("{part}: lost track of <{}>", fragment.parent)))?;

    let entries_added = merge_into(parent, fragment.element, &fragment.namespaces, &destination_scope);
    if entries_added > 0 {
        debug!(worksheet = part, parent = %parent.local_name(), entries_added, "restored extension list");
    }

    Ok(ExtensionListRestore {
        worksheet: part.to_string(),
        parent: parent.local_name().to_string(),
        occurrence,
        root_fallback,
        entries_added,
    })
}

/// Merge `fragment` under `parent`: appended whole when `parent` has no
/// `extLst`, otherwise entry by entry keyed on `ext@uri`.
fn merge_into(
    parent: &mut Element,
    mut fragment: Element,
    source_scope: &[NamespaceBinding],
    destination_scope: &[NamespaceBinding],
) -> usize {
    if parent.find_child(EXT_LST).is_none() {
        fragment.carry_namespaces(source_scope, destination_scope);
        parent.append(fragment);
        return 1;
    }
    let Some(existing) = parent.find_child_mut(EXT_LST) else {
        return 0;
    };

    let mut entry_scope = source_scope.to_vec();
    entry_scope.extend(fragment.namespace_declarations());

    let mut added = 0;
    for entry in fragment.child_elements() {
        let present = existing.child_elements().any(|e| match entry.attribute("uri") {
            Some(uri) => e.local_name() == entry.local_name() && e.attribute("uri") == Some(uri),
            None => e == entry,
        });
        if present {
            continue;
        }
        let mut entry = entry.clone();
        entry.carry_namespaces(&entry_scope, destination_scope);
        existing.append(entry);
        added += 1;
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::MemoryStore;
    use pretty_assertions::assert_eq;

    const PART: &str = "xl/worksheets/sheet1.xml";

    const ORIGINAL: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:x14="http://schemas.microsoft.com/office/spreadsheetml/2009/9/main" xmlns:xm="http://schemas.microsoft.com/office/excel/2006/main"><sheetData/><extLst><ext uri="{CCE6A557-97BC-4b89-ADB6-D9C93CAAB3DF}"><x14:dataValidations count="1"><x14:dataValidation type="list"><x14:formula1><xm:f>Lists!$A$1:$A$3</xm:f></x14:formula1><xm:sqref>B2</xm:sqref></x14:dataValidation></x14:dataValidations></ext></extLst></worksheet>"#;

    const REWRITTEN: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData/></worksheet>"#;

    fn ext_lists(store: &MemoryStore) -> Vec<Element> {
        let doc = XmlDocument::parse(&store.read_part(PART).unwrap(), PART).unwrap();
        doc.root.collect_outermost(EXT_LST).into_iter().map(|m| m.element).collect()
    }

    #[test]
    fn test_restores_with_namespaces() {
        let original = MemoryStore::new().with_part(PART, ORIGINAL);
        let mut working = MemoryStore::new().with_part(PART, REWRITTEN);

        let restored = restore_extension_lists(&original, &mut working).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].parent, "worksheet");
        assert!(!restored[0].root_fallback);

        let lists = ext_lists(&working);
        assert_eq!(lists.len(), 1);
        assert_eq!(
            lists[0].attribute("xmlns:x14"),
            Some("http://schemas.microsoft.com/office/spreadsheetml/2009/9/main")
        );
        assert_eq!(
            lists[0].attribute("xmlns:xm"),
            Some("http://schemas.microsoft.com/office/excel/2006/main")
        );
    }

    #[test]
    fn test_replay_does_not_duplicate() {
        let original = MemoryStore::new().with_part(PART, ORIGINAL);
        let mut working = MemoryStore::new().with_part(PART, REWRITTEN);

        restore_extension_lists(&original, &mut working).unwrap();
        let once = working.read_part(PART).unwrap();
        let replay = restore_extension_lists(&original, &mut working).unwrap();

        assert_eq!(replay[0].entries_added, 0);
        assert_eq!(working.read_part(PART).unwrap(), once);
        assert_eq!(ext_lists(&working)[0].child_elements().count(), 1);
    }

    #[test]
    fn test_nested_parent_and_root_fallback() {
        let original = r#"<worksheet xmlns="urn:main"><conditionalFormatting sqref="A1"><extLst><ext uri="a"/></extLst></conditionalFormatting><dataValidations><extLst><ext uri="b"/></extLst></dataValidations></worksheet>"#;
        let rewritten = r#"<worksheet xmlns="urn:main"><conditionalFormatting sqref="A1"/></worksheet>"#;
        let original = MemoryStore::new().with_part(PART, original);
        let mut working = MemoryStore::new().with_part(PART, rewritten);

        let restored = restore_extension_lists(&original, &mut working).unwrap();
        assert_eq!(restored[0].parent, "conditionalFormatting");
        assert!(!restored[0].root_fallback);
        assert_eq!(restored[1].parent, "worksheet");
        assert!(restored[1].root_fallback);

        let doc = XmlDocument::parse(&working.read_part(PART).unwrap(), PART).unwrap();
        let cf = doc.root.find_child("conditionalFormatting").unwrap();
        assert!(cf.find_child(EXT_LST).is_some());
        assert!(doc.root.find_child(EXT_LST).is_some());
    }

    #[test]
    fn test_sibling_rules_keep_their_own_lists() {
        let original = r#"<worksheet xmlns="urn:main" xmlns:x14="urn:x14"><conditionalFormatting sqref="A1"><cfRule type="dataBar" priority="1"><extLst><ext uri="{B025F937-C7B1-47D3-B67F-A62EFF666E3E}"><x14:id>{ID-ONE}</x14:id></ext></extLst></cfRule></conditionalFormatting><conditionalFormatting sqref="B1"><cfRule type="dataBar" priority="2"><extLst><ext uri="{B025F937-C7B1-47D3-B67F-A62EFF666E3E}"><x14:id>{ID-TWO}</x14:id></ext></extLst></cfRule></conditionalFormatting></worksheet>"#;
        let rewritten = r#"<worksheet xmlns="urn:main"><conditionalFormatting sqref="A1"><cfRule type="dataBar" priority="1"/></conditionalFormatting><conditionalFormatting sqref="B1"><cfRule type="dataBar" priority="2"/></conditionalFormatting></worksheet>"#;
        let original = MemoryStore::new().with_part(PART, original);
        let mut working = MemoryStore::new().with_part(PART, rewritten);

        let restored = restore_extension_lists(&original, &mut working).unwrap();
        let added: Vec<_> = restored.iter().map(|r| r.entries_added).collect();
        assert_eq!(added, vec![1, 1]);
        let occurrences: Vec<_> = restored.iter().map(|r| r.occurrence).collect();
        assert_eq!(occurrences, vec![0, 1]);
        assert!(restored.iter().all(|r| r.parent == "cfRule" && !r.root_fallback));

        let doc = XmlDocument::parse(&working.read_part(PART).unwrap(), PART).unwrap();
        let ids: Vec<_> = doc
            .root
            .child_elements()
            .map(|cf| {
                let rule = cf.find_child("cfRule").unwrap();
                let ext = rule.find_child(EXT_LST).unwrap().find_child("ext").unwrap();
                match ext.find_child("id").unwrap().children.first() {
                    Some(Node::Text(id)) => id.clone(),
                    other => panic!("unexpected id content: {other:?}"),
                }
            })
            .collect();
        assert_eq!(ids, vec!["{ID-ONE}", "{ID-TWO}"]);

        let once = working.read_part(PART).unwrap();
        let replay = restore_extension_lists(&original, &mut working).unwrap();
        assert!(replay.iter().all(|r| r.entries_added == 0));
        assert_eq!(working.read_part(PART).unwrap(), once);
    }

    #[test]
    fn test_merges_into_existing_list() {
        let original = r#"<worksheet xmlns="urn:main"><extLst><ext uri="a"><kept/></ext><ext uri="b"/></extLst></worksheet>"#;
        let rewritten = r#"<worksheet xmlns="urn:main"><extLst><ext uri="a"/></extLst></worksheet>"#;
        let original = MemoryStore::new().with_part(PART, original);
        let mut working = MemoryStore::new().with_part(PART, rewritten);

        let restored = restore_extension_lists(&original, &mut working).unwrap();
        assert_eq!(restored[0].entries_added, 1);

        let uris: Vec<_> = ext_lists(&working)[0]
            .child_elements()
            .map(|e| e.attribute("uri").unwrap().to_string())
            .collect();
        assert_eq!(uris, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_rewritten_worksheet_is_fatal() {
        let original = MemoryStore::new().with_part(PART, ORIGINAL);
        let mut working = MemoryStore::new();
        assert!(matches!(
            restore_extension_lists(&original, &mut working),
            Err(Error::MissingComponent(_))
        ));
    }

    #[test]
    fn test_worksheets_without_lists_are_untouched() {
        let original = MemoryStore::new().with_part(PART, REWRITTEN);
        let mut working = MemoryStore::new();
        assert!(restore_extension_lists(&original, &mut working).unwrap().is_empty());
    }
}
