//! `[Content_Types].xml`: the package content type manifest.

use crate::container::CONTENT_TYPES_PART;
use crate::error::{Error, Result};
use crate::package::PartStore;
use crate::restore::comments::is_comment_part;
use crate::xml::{Element, XmlDocument};
use serde::Serialize;
use tracing::debug;

/// Namespace of the content type manifest.
pub const CONTENT_TYPES_NS: &str = "http://schemas.openxmlformats.org/package/2006/content-types";

/// Content type of DrawingML drawing parts (`xl/drawings/drawing*.xml`).
pub const DRAWING_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";

/// Content type of legacy comment parts (`xl/comments*.xml`).
pub const COMMENTS_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.comments+xml";

/// Folders whose file extensions must be declared as defaults.
pub const TRACKED_FOLDERS: [&str; 3] = ["xl/diagrams/", "xl/media/", "xl/drawings/"];

/// How a file extension maps to a default MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionClass {
    /// png, jpg, jpeg, gif, bmp, tiff, tif: `image/<ext>`
    RasterImage,
    /// emf: `image/x-emf`
    Emf,
    /// Anything else: `application/<ext>`
    Other,
}

impl ExtensionClass {
    pub fn of(ext: &str) -> Self {
        match ext {
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" | "tif" => ExtensionClass::RasterImage,
            "emf" => ExtensionClass::Emf,
            _ => ExtensionClass::Other,
        }
    }

    /// Default content type for `ext`.
    pub fn content_type(ext: &str) -> String {
        match Self::of(ext) {
            ExtensionClass::RasterImage => format!("image/{ext}"),
            ExtensionClass::Emf => "image/x-emf".to_string(),
            ExtensionClass::Other => format!("application/{ext}"),
        }
    }
}

/// Logical role of a SmartArt diagram part, from its filename stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagramRole {
    Colors,
    Data,
    Layout,
    QuickStyle,
    Drawing,
}

impl DiagramRole {
    /// Role of a diagram part such as `xl/diagrams/quickStyle3.xml`.
    pub fn from_part_name(part: &str) -> Result<Self> {
        let file_name = part.rsplit('/').next().unwrap_or(part);
        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem);
        let role = stem.trim_end_matches(|c: char| c.is_ascii_digit());
        match role {
            "colors" => Ok(DiagramRole::Colors),
            "data" => Ok(DiagramRole::Data),
            "layout" => Ok(DiagramRole::Layout),
            "quickStyle" => Ok(DiagramRole::QuickStyle),
            "drawing" => Ok(DiagramRole::Drawing),
            other => Err(Error::UnknownDiagramRole {
                part: part.to_string(),
                role: other.to_string(),
            }),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            DiagramRole::Colors => {
                "application/vnd.openxmlformats-officedocument.drawingml.diagramColors+xml"
            }
            DiagramRole::Data => {
                "application/vnd.openxmlformats-officedocument.drawingml.diagramData+xml"
            }
            DiagramRole::Layout => {
                "application/vnd.openxmlformats-officedocument.drawingml.diagramLayout+xml"
            }
            DiagramRole::QuickStyle => {
                "application/vnd.openxmlformats-officedocument.drawingml.diagramStyle+xml"
            }
            DiagramRole::Drawing => "application/vnd.ms-office.drawingml.diagramDrawing+xml",
        }
    }
}

/// The parsed manifest. Declarations are only ever appended.
#[derive(Debug, Clone)]
pub struct ContentTypes {
    doc: XmlDocument,
}

impl ContentTypes {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let doc = XmlDocument::parse(bytes, CONTENT_TYPES_PART)?;
        if doc.root.local_name() != "Types" {
            return Err(Error::InvalidData(format!(
                "{CONTENT_TYPES_PART}: root element is <{}>, expected <Types>",
                doc.root.name
            )));
        }
        Ok(Self { doc })
    }

    /// An empty manifest.
    pub fn new() -> Self {
        Self {
            doc: XmlDocument::new(Element::new("Types").with_attribute("xmlns", CONTENT_TYPES_NS)),
        }
    }

    fn entries<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.doc
            .root
            .child_elements()
            .filter(move |e| e.local_name() == local)
    }

    /// Extensions declared by `Default` entries.
    pub fn default_extensions(&self) -> Vec<String> {
        self.entries("Default")
            .filter_map(|e| e.attribute("Extension"))
            .map(str::to_string)
            .collect()
    }

    pub fn has_default(&self, ext: &str) -> bool {
        self.entries("Default")
            .filter_map(|e| e.attribute("Extension"))
            .any(|declared| declared.eq_ignore_ascii_case(ext))
    }

    /// Content type declared for an exact part name (`/xl/...`).
    pub fn override_for(&self, part_name: &str) -> Option<&str> {
        self.entries("Override")
            .find(|e| e.attribute("PartName") == Some(part_name))
            .and_then(|e| e.attribute("ContentType"))
    }

    /// Count of override entries for `part_name`.
    pub fn override_count(&self, part_name: &str) -> usize {
        self.entries("Override")
            .filter(|e| e.attribute("PartName") == Some(part_name))
            .count()
    }

    /// Declare a default unless the extension is already declared. Returns whether it was added.
    pub fn add_default(&mut self, ext: &str, content_type: &str) -> bool {
        if self.has_default(ext) {
            return false;
        }
        let name = self.child_name("Default");
        self.doc.root.append(
            Element::new(name)
                .with_attribute("Extension", ext)
                .with_attribute("ContentType", content_type),
        );
        true
    }

    /// Declare an override unless the part already has one. Returns whether it was added.
    pub fn add_override(&mut self, part_name: &str, content_type: &str) -> bool {
        if self.override_for(part_name).is_some() {
            return false;
        }
        let name = self.child_name("Override");
        self.doc.root.append(
            Element::new(name)
                .with_attribute("PartName", part_name)
                .with_attribute("ContentType", content_type),
        );
        true
    }

    fn child_name(&self, local: &str) -> String {
        match self.doc.root.prefix() {
            Some(prefix) => format!("{prefix}:{local}"),
            None => local.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.doc.to_bytes()
    }
}

impl Default for ContentTypes {
    fn default() -> Self {
        Self::new()
    }
}

/// What the synchronizer appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContentTypeChanges {
    pub defaults_added: Vec<String>,
    pub overrides_added: Vec<String>,
}

fn extension_of(part: &str) -> Option<&str> {
    let file_name = part.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then_some(ext)
}

/// Bring the manifest in `store` in line with the parts physically present.
///
/// Every extension found directly under the diagrams, media and drawings
/// folders gets a `Default`; every diagram and drawing XML part gets an
/// `Override`. With `declare_comments`, `xl/comments*.xml` parts get one too.
/// An unrecognized diagram role aborts before anything is written.
pub fn sync_content_types(
    store: &mut dyn PartStore,
    declare_comments: bool,
) -> Result<ContentTypeChanges> {
    let mut manifest = match store.read_part_opt(CONTENT_TYPES_PART)? {
        Some(bytes) => ContentTypes::parse(&bytes)?,
        None => ContentTypes::new(),
    };
    let mut changes = ContentTypeChanges::default();

    let mut extensions: Vec<String> = Vec::new();
    for folder in TRACKED_FOLDERS {
        for part in store.files_in_folder(folder)? {
            if let Some(ext) = extension_of(&part) {
                if !extensions.iter().any(|e| e == ext) {
                    extensions.push(ext.to_string());
                }
            }
        }
    }
    extensions.sort();
    for ext in extensions {
        if manifest.add_default(&ext, &ExtensionClass::content_type(&ext)) {
            debug!(extension = %ext, "declared default content type");
            changes.defaults_added.push(ext);
        }
    }

    let mut overrides: Vec<(String, &'static str)> = Vec::new();
    for part in store.files_in_folder("xl/diagrams/")? {
        if extension_of(&part) == Some("xml") {
            let role = DiagramRole::from_part_name(&part)?;
            overrides.push((part, role.content_type()));
        }
    }
    for part in store.files_in_folder("xl/drawings/")? {
        if extension_of(&part) == Some("xml") {
            overrides.push((part, DRAWING_CONTENT_TYPE));
        }
    }
    if declare_comments {
        for part in store.files_in_folder("xl/")? {
            if is_comment_part(&part) {
                overrides.push((part, COMMENTS_CONTENT_TYPE));
            }
        }
    }

    for (part, content_type) in overrides {
        let part_name = format!("/{part}");
        if manifest.add_override(&part_name, content_type) {
            debug!(part = %part_name, "declared override content type");
            changes.overrides_added.push(part_name);
        }
    }

    if !changes.defaults_added.is_empty() || !changes.overrides_added.is_empty() {
        store.write_part(CONTENT_TYPES_PART, &manifest.to_bytes()?)?;
    }
    Ok(changes)
}
