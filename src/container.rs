//! ZIP container handling for OOXML packages.

use crate::error::{Error, Result};
use crate::package::PartStore;
use std::cell::RefCell;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::{Component, Path};
use tracing::debug;
use zip::write::SimpleFileOptions;

/// Name of the package-level content type manifest.
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// Decode XML bytes to a string, honouring UTF-8 and UTF-16 byte order marks.
pub fn decode_xml_bytes(bytes: &[u8]) -> Result<String> {
    let invalid = |e: &dyn std::fmt::Display| Error::InvalidData(format!("undecodable XML: {e}"));

    if let Some(rest) = bytes.strip_prefix(b"\xEF\xBB\xBF") {
        return String::from_utf8(rest.to_vec()).map_err(|e| invalid(&e));
    }

    let utf16 = |rest: &[u8], from: fn([u8; 2]) -> u16| -> Result<String> {
        let units = rest.chunks_exact(2).map(|c| from([c[0], c[1]]));
        let content = char::decode_utf16(units)
            .collect::<std::result::Result<String, _>>()
            .map_err(|e| invalid(&e))?;
        // The declaration still claims UTF-16; the string is UTF-8 now.
        Ok(content
            .replacen("encoding=\"UTF-16\"", "encoding=\"UTF-8\"", 1)
            .replacen("encoding=\"utf-16\"", "encoding=\"UTF-8\"", 1))
    };

    if let Some(rest) = bytes.strip_prefix(b"\xFF\xFE") {
        return utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(b"\xFE\xFF") {
        return utf16(rest, u16::from_be_bytes);
    }

    String::from_utf8(bytes.to_vec()).map_err(|e| invalid(&e))
}

/// OOXML container abstraction over a ZIP archive.
pub struct OoxmlContainer {
    archive: RefCell<zip::ZipArchive<Cursor<Vec<u8>>>>,
}

impl OoxmlContainer {
    /// Open an OOXML container from a file path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use xlsx_mend::container::OoxmlContainer;
    ///
    /// let container = OoxmlContainer::open("book.xlsx")?;
    /// assert!(container.exists("[Content_Types].xml"));
    /// # Ok::<(), xlsx_mend::Error>(())
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    /// Create an OOXML container from a byte vector.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let archive = zip::ZipArchive::new(Cursor::new(data))?;
        Ok(Self {
            archive: RefCell::new(archive),
        })
    }

    /// Read an XML part as a string.
    pub fn read_xml(&self, path: &str) -> Result<String> {
        decode_xml_bytes(&self.read_binary(path)?)
    }

    /// Read a part as raw bytes.
    pub fn read_binary(&self, path: &str) -> Result<Vec<u8>> {
        let mut archive = self.archive.borrow_mut();
        let mut file = archive
            .by_name(path)
            .map_err(|_| Error::MissingComponent(path.to_string()))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Check if a part exists in the archive.
    pub fn exists(&self, path: &str) -> bool {
        let archive = self.archive.borrow();
        let found = archive.file_names().any(|n| n == path);
        found
    }

    /// List all entries in the archive.
    pub fn list_files(&self) -> Vec<String> {
        let archive = self.archive.borrow();
        archive.file_names().map(String::from).collect()
    }

    /// Extract every file entry into `store`, returning the number of parts written.
    ///
    /// Directory entries are skipped, as are names that would escape the package
    /// root (`../`, absolute paths).
    pub fn extract_into(&self, store: &mut dyn PartStore) -> Result<usize> {
        let mut archive = self.archive.borrow_mut();
        let mut count = 0;
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let Some(enclosed) = file.enclosed_name() else {
                debug!(entry = file.name(), "skipping unsafe zip entry");
                continue;
            };
            let name = enclosed
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/");
            if name.is_empty() {
                continue;
            }

            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)?;
            store.write_part(&name, &data)?;
            count += 1;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for OoxmlContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OoxmlContainer")
            .field("files", &self.list_files().len())
            .finish()
    }
}

/// Extract the package at `path` into `store`.
pub fn extract_archive(path: impl AsRef<Path>, store: &mut dyn PartStore) -> Result<usize> {
    OoxmlContainer::open(path)?.extract_into(store)
}

/// Package part order: content types first, package relationships next, then lexical.
fn package_order(store: &dyn PartStore) -> Result<Vec<String>> {
    let mut names = store.list_parts()?;
    names.sort_by_key(|name| {
        let rank = match name.as_str() {
            CONTENT_TYPES_PART => 0,
            "_rels/.rels" => 1,
            _ => 2,
        };
        (rank, name.clone())
    });
    Ok(names)
}

/// Write every part of `store` as a deflated ZIP to `writer`.
pub fn write_zip<W: Write + Seek>(store: &dyn PartStore, writer: W) -> Result<W> {
    let mut zip = zip::ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for name in package_order(store)? {
        let data = store.read_part(&name)?;
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&data)?;
    }

    Ok(zip.finish()?)
}

/// Serialize `store` to an in-memory package.
pub fn package_to_bytes(store: &dyn PartStore) -> Result<Vec<u8>> {
    Ok(write_zip(store, Cursor::new(Vec::new()))?.into_inner())
}

/// Write `store` as a package at `dest`.
///
/// The archive is built in a temp file beside `dest` and renamed into place, so
/// a failure never leaves a half-written package behind.
pub fn write_package(store: &dyn PartStore, dest: impl AsRef<Path>) -> Result<()> {
    let dest = dest.as_ref();
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp = tempfile::NamedTempFile::new_in(dir)?;
    let mut file = write_zip(store, tmp.reopen()?)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
    debug!(dest = %dest.display(), "package written");
    Ok(())
}
