//! Error types for the xlsx-mend library.

use std::io;
use thiserror::Error;

/// Result type alias for xlsx-mend operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling a package.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not a ZIP-based package at all.
    #[error("Unknown file format")]
    UnknownFormat,

    /// The package is recognized but is not a spreadsheet.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Error reading or writing the ZIP archive.
    #[error("ZIP archive error: {0}")]
    ZipArchive(String),

    /// Error parsing or serializing XML content.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// Invalid or malformed data in the package.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A part required to complete a restoration is missing.
    #[error("Missing component: {0}")]
    MissingComponent(String),

    /// A diagram part whose role has no known content type.
    #[error("Unknown diagram role '{role}' for part {part}")]
    UnknownDiagramRole {
        /// Part name, e.g. `xl/diagrams/foo1.xml`.
        part: String,
        /// Filename stem with trailing digits stripped.
        role: String,
    },

    /// A cell reference such as `B1` could not be parsed.
    #[error("Invalid cell reference: {0}")]
    InvalidCellReference(String),

    /// The external save did not produce a package.
    #[error("Save failed: {0}")]
    Save(String),

    /// The restoration report could not be serialized.
    #[error("Report serialization error: {0}")]
    Report(#[from] serde_json::Error),
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::ZipArchive(err.to_string())
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::XmlParse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::XmlParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnknownFormat;
        assert_eq!(err.to_string(), "Unknown file format");

        let err = Error::MissingComponent("xl/worksheets/sheet1.xml".to_string());
        assert_eq!(err.to_string(), "Missing component: xl/worksheets/sheet1.xml");

        let err = Error::UnknownDiagramRole {
            part: "xl/diagrams/foo1.xml".to_string(),
            role: "foo".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unknown diagram role 'foo' for part xl/diagrams/foo1.xml"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
