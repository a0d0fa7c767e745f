//! Part stores: the narrow archive interface the restorers work against.
//!
//! Part names are package-relative and `/`-separated (`xl/media/image1.png`),
//! never starting with a slash. Folder arguments may be given with or without a
//! trailing slash.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn folder_prefix(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// A mutable collection of named parts.
pub trait PartStore {
    /// All part names, sorted.
    fn list_parts(&self) -> Result<Vec<String>>;

    /// Read a part; fails with [`Error::MissingComponent`] when absent.
    fn read_part(&self, name: &str) -> Result<Vec<u8>>;

    /// Create or overwrite a part.
    fn write_part(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Remove a part; returns whether it existed.
    fn remove_part(&mut self, name: &str) -> Result<bool>;

    fn contains_part(&self, name: &str) -> bool;

    /// Read a part if it exists.
    fn read_part_opt(&self, name: &str) -> Result<Option<Vec<u8>>> {
        if self.contains_part(name) {
            self.read_part(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Every part below `folder`, at any depth.
    fn parts_in_folder(&self, folder: &str) -> Result<Vec<String>> {
        let prefix = folder_prefix(folder);
        Ok(self
            .list_parts()?
            .into_iter()
            .filter(|name| name.starts_with(&prefix))
            .collect())
    }

    /// Parts directly inside `folder` (no subfolders such as `_rels/`).
    fn files_in_folder(&self, folder: &str) -> Result<Vec<String>> {
        let prefix = folder_prefix(folder);
        Ok(self
            .parts_in_folder(folder)?
            .into_iter()
            .filter(|name| !name[prefix.len()..].contains('/'))
            .collect())
    }

    fn contains_folder(&self, folder: &str) -> Result<bool> {
        Ok(!self.parts_in_folder(folder)?.is_empty())
    }

    /// Remove a folder and everything below it; returns the number of parts removed.
    fn remove_folder(&mut self, folder: &str) -> Result<usize> {
        let parts = self.parts_in_folder(folder)?;
        for name in &parts {
            self.remove_part(name)?;
        }
        Ok(parts.len())
    }

    /// Copy one part verbatim from another store.
    fn copy_part_from(&mut self, source: &dyn PartStore, name: &str) -> Result<()> {
        let data = source.read_part(name)?;
        self.write_part(name, &data)
    }
}

/// Parts held in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    parts: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, mostly for tests.
    pub fn with_part(mut self, name: &str, data: impl Into<Vec<u8>>) -> Self {
        self.parts.insert(name.to_string(), data.into());
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl PartStore for MemoryStore {
    fn list_parts(&self) -> Result<Vec<String>> {
        Ok(self.parts.keys().cloned().collect())
    }

    fn read_part(&self, name: &str) -> Result<Vec<u8>> {
        self.parts
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingComponent(name.to_string()))
    }

    fn write_part(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.parts.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn remove_part(&mut self, name: &str) -> Result<bool> {
        Ok(self.parts.remove(name).is_some())
    }

    fn contains_part(&self, name: &str) -> bool {
        self.parts.contains_key(name)
    }
}

/// Parts extracted into a directory, one file per part.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    /// Use `root` as the store, creating it if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in name.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::InvalidData(format!("unsafe part name: {name}")));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

impl PartStore for DirStore {
    fn list_parts(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| Error::InvalidData(e.to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn read_part(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        if !path.is_file() {
            return Err(Error::MissingComponent(name.to_string()));
        }
        Ok(fs::read(path)?)
    }

    fn write_part(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_of(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    fn remove_part(&mut self, name: &str) -> Result<bool> {
        let path = self.path_of(name)?;
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }

    fn contains_part(&self, name: &str) -> bool {
        self.path_of(name).is_ok_and(|p| p.is_file())
    }

    fn contains_folder(&self, folder: &str) -> Result<bool> {
        let trimmed = folder.trim_matches('/');
        Ok(self.path_of(trimmed)?.is_dir())
    }

    fn remove_folder(&mut self, folder: &str) -> Result<usize> {
        let count = self.parts_in_folder(folder)?.len();
        let path = self.path_of(folder.trim_matches('/'))?;
        match fs::remove_dir_all(&path) {
            Ok(()) => Ok(count),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &mut dyn PartStore) {
        store.write_part("xl/media/image1.png", b"png").unwrap();
        store.write_part("xl/drawings/drawing1.xml", b"<d/>").unwrap();
        store
            .write_part("xl/drawings/_rels/drawing1.xml.rels", b"<r/>")
            .unwrap();

        assert_eq!(
            store.files_in_folder("xl/drawings/").unwrap(),
            vec!["xl/drawings/drawing1.xml".to_string()]
        );
        assert_eq!(store.parts_in_folder("xl/drawings").unwrap().len(), 2);
        assert!(store.contains_folder("xl/media/").unwrap());
        assert!(!store.contains_folder("xl/diagrams/").unwrap());

        assert_eq!(store.remove_folder("xl/drawings/").unwrap(), 2);
        assert!(!store.contains_part("xl/drawings/drawing1.xml"));
        assert_eq!(store.remove_folder("xl/drawings/").unwrap(), 0);

        assert!(matches!(
            store.read_part("missing.xml"),
            Err(Error::MissingComponent(_))
        ));
        assert_eq!(store.read_part_opt("missing.xml").unwrap(), None);
        assert_eq!(store.list_parts().unwrap(), vec!["xl/media/image1.png"]);
    }

    #[test]
    fn test_memory_store() {
        exercise(&mut MemoryStore::new());
    }

    #[test]
    fn test_dir_store() {
        let dir = tempfile::tempdir().unwrap();
        exercise(&mut DirStore::create(dir.path().join("pkg")).unwrap());
    }

    #[test]
    fn test_dir_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::create(dir.path()).unwrap();
        assert!(store.write_part("../escape.xml", b"x").is_err());
        assert!(!store.contains_part("../escape.xml"));
    }

    #[test]
    fn test_names_with_brackets() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DirStore::create(dir.path()).unwrap();
        store.write_part("[Content_Types].xml", b"<Types/>").unwrap();
        assert_eq!(store.list_parts().unwrap(), vec!["[Content_Types].xml"]);
    }
}
