//! Relationship parts (`_rels/*.rels`), identifier allocation and target families.

use crate::error::{Error, Result};
use crate::xml::{Element, XmlDocument};
use std::fmt;
use std::path::Path;

/// Namespace of `.rels` parts.
pub const PACKAGE_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

/// Namespace of `r:id` back-reference attributes inside parts.
pub const OFFICE_REL_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// A relationship entry from a .rels file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship ID (e.g., "rId1")
    pub id: String,
    /// Relationship type URI
    pub rel_type: String,
    /// Target path (relative or absolute)
    pub target: String,
    /// `TargetMode` attribute, usually absent or `External`
    pub target_mode: Option<String>,
}

impl Relationship {
    /// Whether the target lives outside the package.
    pub fn is_external(&self) -> bool {
        self.target_mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("external"))
    }
}

/// Relationships of one part, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationships {
    entries: Vec<Relationship>,
}

impl Relationships {
    /// Create a new empty relationships collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `.rels` part.
    pub fn parse(bytes: &[u8], part_name: &str) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }

        let doc = XmlDocument::parse(bytes, part_name)?;
        if doc.root.local_name() != "Relationships" {
            return Err(Error::InvalidData(format!(
                "{part_name}: root element is <{}>, expected <Relationships>",
                doc.root.name
            )));
        }

        let mut rels = Self::new();
        for e in doc
            .root
            .child_elements()
            .filter(|e| e.local_name() == "Relationship")
        {
            let Some(id) = e.attribute("Id").filter(|id| !id.is_empty()) else {
                continue;
            };
            rels.add(Relationship {
                id: id.to_string(),
                rel_type: e.attribute("Type").unwrap_or_default().to_string(),
                target: e.attribute("Target").unwrap_or_default().to_string(),
                target_mode: e.attribute("TargetMode").map(str::to_string),
            });
        }
        Ok(rels)
    }

    /// Serialize as a standalone `.rels` part.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut root = Element::new("Relationships").with_attribute("xmlns", PACKAGE_REL_NS);
        for rel in &self.entries {
            let mut e = Element::new("Relationship")
                .with_attribute("Id", rel.id.as_str())
                .with_attribute("Type", rel.rel_type.as_str())
                .with_attribute("Target", rel.target.as_str());
            if let Some(mode) = &rel.target_mode {
                e.set_attribute("TargetMode", mode.as_str());
            }
            root.append(e);
        }
        XmlDocument::new(root).to_bytes()
    }

    /// Get a relationship by ID.
    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Get relationships by type.
    pub fn get_by_type(&self, rel_type: &str) -> Vec<&Relationship> {
        self.entries.iter().filter(|r| r.rel_type == rel_type).collect()
    }

    /// Add a relationship.
    pub fn add(&mut self, rel: Relationship) {
        self.entries.push(rel);
    }

    /// Keep only the relationships matching `keep`; returns how many were removed.
    pub fn retain(&mut self, keep: impl FnMut(&Relationship) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(keep);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relationship> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest number found as the first digit run of any identifier, or 0.
    /// Identifiers without digits are ignored.
    pub fn max_numeric_id(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|r| first_digit_run(&r.id))
            .max()
            .unwrap_or(0)
    }
}

fn first_digit_run(id: &str) -> Option<u64> {
    let start = id.find(|c: char| c.is_ascii_digit())?;
    let digits: &str = &id[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().ok()
}

/// Issues fresh `rId<n>` identifiers for one relationship collection.
///
/// Seeded from the collection's largest numeric suffix, so every issued id is
/// strictly greater than any id that existed when the allocator was created.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    last: u64,
}

impl IdAllocator {
    pub fn for_collection(rels: &Relationships) -> Self {
        Self {
            last: rels.max_numeric_id(),
        }
    }

    /// Allocate the next identifier.
    pub fn next_id(&mut self) -> String {
        self.last += 1;
        format!("rId{}", self.last)
    }
}

/// Classification of a worksheet relationship by its resolved target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipFamily {
    /// `xl/drawings/drawing*`
    Drawing,
    /// `xl/drawings/vmlDrawing*`
    Vml,
    /// `xl/comments*` directly under `xl/`
    Comment,
    Other,
}

impl RelationshipFamily {
    /// Classify a resolved part name such as `xl/drawings/drawing1.xml`.
    pub fn classify(part_name: &str) -> Self {
        let Some(rest) = part_name.strip_prefix("xl/") else {
            return RelationshipFamily::Other;
        };
        if rest.starts_with("drawings/drawing") {
            RelationshipFamily::Drawing
        } else if rest.starts_with("drawings/vmlDrawing") {
            RelationshipFamily::Vml
        } else if rest.starts_with("comments") && !rest.contains('/') {
            RelationshipFamily::Comment
        } else {
            RelationshipFamily::Other
        }
    }

    /// Worksheet element that must point at relationships of this family.
    pub fn back_reference(self) -> Option<&'static str> {
        match self {
            RelationshipFamily::Drawing => Some("drawing"),
            RelationshipFamily::Vml => Some("legacyDrawing"),
            RelationshipFamily::Comment | RelationshipFamily::Other => None,
        }
    }
}

impl fmt::Display for RelationshipFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipFamily::Drawing => "drawing",
            RelationshipFamily::Vml => "vml",
            RelationshipFamily::Comment => "comment",
            RelationshipFamily::Other => "other",
        };
        f.write_str(name)
    }
}

/// Whether a resolved target is one of the comment parts a lossy save generates
/// on its own (`xl/comments/comment*`, `xl/drawings/commentsDrawing*`).
pub fn is_synthesized_comment_target(part_name: &str) -> bool {
    part_name.starts_with("xl/comments/comment")
        || part_name.starts_with("xl/drawings/commentsDrawing")
}

/// Relationship part belonging to `part` (`xl/a.xml` -> `xl/_rels/a.xml.rels`).
pub fn rels_for_part(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file_name)) => format!("{dir}/_rels/{file_name}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Part that a relationship part describes (`xl/_rels/a.xml.rels` -> `xl/a.xml`).
pub fn part_for_rels(rels_part: &str) -> Option<String> {
    let without_ext = rels_part.strip_suffix(".rels")?;
    let (dir, file_name) = without_ext.rsplit_once('/')?;
    let dir = dir.strip_suffix("_rels")?;
    Some(format!("{dir}{file_name}"))
}

/// Resolve a relationship target against the part that owns the relationship.
pub fn resolve_path(base: &str, relative: &str) -> String {
    let relative = relative.split('#').next().unwrap_or(relative);
    if let Some(stripped) = relative.strip_prefix('/') {
        return normalize(stripped);
    }

    let base_dir = Path::new(base)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();
    normalize(&format!("{base_dir}/{relative}"))
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}
