//! Spreadsheet package detection.

use crate::container::{decode_xml_bytes, CONTENT_TYPES_PART};
use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// ZIP file magic bytes: PK\x03\x04
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Main part content types, most specific first.
const SPREADSHEET_CONTENT_TYPES: [(&str, SpreadsheetKind); 4] = [
    (
        "application/vnd.ms-excel.sheet.macroEnabled.main+xml",
        SpreadsheetKind::Xlsm,
    ),
    (
        "application/vnd.ms-excel.template.macroEnabled.main+xml",
        SpreadsheetKind::Xltm,
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.template.main+xml",
        SpreadsheetKind::Xltx,
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
        SpreadsheetKind::Xlsx,
    ),
];

/// Main part content types of the other Office formats.
const OTHER_CONTENT_TYPES: [(&str, &str); 2] = [
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document.main+xml",
        "Word document",
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation.main+xml",
        "PowerPoint presentation",
    ),
];

/// Detected spreadsheet package flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetKind {
    /// Workbook (.xlsx)
    Xlsx,
    /// Macro-enabled workbook (.xlsm)
    Xlsm,
    /// Template (.xltx)
    Xltx,
    /// Macro-enabled template (.xltm)
    Xltm,
}

impl SpreadsheetKind {
    /// Returns the file extension for this kind.
    pub fn extension(&self) -> &'static str {
        match self {
            SpreadsheetKind::Xlsx => "xlsx",
            SpreadsheetKind::Xlsm => "xlsm",
            SpreadsheetKind::Xltx => "xltx",
            SpreadsheetKind::Xltm => "xltm",
        }
    }

    /// Returns a human-readable name for this kind.
    pub fn name(&self) -> &'static str {
        match self {
            SpreadsheetKind::Xlsx => "Excel Workbook",
            SpreadsheetKind::Xlsm => "Excel Macro-Enabled Workbook",
            SpreadsheetKind::Xltx => "Excel Template",
            SpreadsheetKind::Xltm => "Excel Macro-Enabled Template",
        }
    }

    /// Whether the package carries a VBA project.
    pub fn is_macro_enabled(&self) -> bool {
        matches!(self, SpreadsheetKind::Xlsm | SpreadsheetKind::Xltm)
    }
}

impl std::fmt::Display for SpreadsheetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Detect the spreadsheet kind of the package at `path`.
///
/// # Example
///
/// ```no_run
/// use xlsx_mend::detect::detect_kind_from_path;
///
/// let kind = detect_kind_from_path("book.xlsx")?;
/// println!("Detected: {}", kind);
/// # Ok::<(), xlsx_mend::Error>(())
/// ```
pub fn detect_kind_from_path(path: impl AsRef<Path>) -> Result<SpreadsheetKind> {
    let mut file = File::open(path.as_ref())?;
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || magic != ZIP_MAGIC {
        return Err(Error::UnknownFormat);
    }
    file.rewind()?;
    detect_kind_from_reader(BufReader::new(file))
}

/// Detect the spreadsheet kind from a byte slice.
pub fn detect_kind_from_bytes(data: &[u8]) -> Result<SpreadsheetKind> {
    if !is_zip_file(data) {
        return Err(Error::UnknownFormat);
    }
    detect_kind_from_reader(std::io::Cursor::new(data))
}

/// Detect the spreadsheet kind from a reader over a ZIP archive.
pub fn detect_kind_from_reader<R: Read + Seek>(reader: R) -> Result<SpreadsheetKind> {
    let mut archive = zip::ZipArchive::new(reader)?;

    let content_types = match archive.by_name(CONTENT_TYPES_PART) {
        Ok(mut file) => {
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            decode_xml_bytes(&bytes)?
        }
        Err(_) => return Err(Error::MissingComponent(CONTENT_TYPES_PART.to_string())),
    };

    if let Some((_, kind)) = SPREADSHEET_CONTENT_TYPES
        .iter()
        .find(|(mime, _)| content_types.contains(mime))
    {
        return Ok(*kind);
    }
    if let Some((_, name)) = OTHER_CONTENT_TYPES
        .iter()
        .find(|(mime, _)| content_types.contains(mime))
    {
        return Err(Error::UnsupportedFormat((*name).to_string()));
    }

    detect_by_folder_structure(&archive)
}

/// Fallback detection by checking folder structure.
fn detect_by_folder_structure<R: Read + Seek>(
    archive: &zip::ZipArchive<R>,
) -> Result<SpreadsheetKind> {
    let has = |prefix: &str| archive.file_names().any(|n| n.starts_with(prefix));

    if has("xl/") {
        Ok(SpreadsheetKind::Xlsx)
    } else if has("word/") || has("ppt/") {
        Err(Error::UnsupportedFormat(
            "not a spreadsheet package".to_string(),
        ))
    } else {
        Err(Error::UnknownFormat)
    }
}

/// Check if data starts with ZIP magic bytes.
pub fn is_zip_file(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == ZIP_MAGIC
}
